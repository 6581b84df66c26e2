//! Bounded execution of service commands.
//!
//! The executor spawns a command with a clean environment plus an explicit
//! overlay, polls the child until it exits or the caller's timeout budget
//! runs out, and captures a bounded slice of its output for the event
//! message. It takes no engine context; shutdown is signalled through a
//! plain atomic flag.
use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::service::CommandSpec;

/// Microseconds between child polls. Bounds the latency between child exit
/// and the engine noticing it.
pub const POLL_INTERVAL_US: i64 = 100_000;

/// Cap on captured child output. Keeps programs with endless output (e.g.
/// `yes`) from pinning the collector.
pub const OUTPUT_CAP: usize = 2048;

/// Result of one command execution.
#[derive(Debug)]
pub struct ExecOutcome {
    /// The child's exit status, or -1 if it was never observed to exit.
    pub status: i32,
    /// Captured output or failure description for the event message.
    pub message: String,
}

/// Runs `spec` with the given environment overlay, decrementing
/// `timeout_us` as it waits. The remaining budget is left for the caller's
/// convergence wait; after a timeout it is never positive.
pub fn execute(
    spec: &CommandSpec,
    env: &[(String, String)],
    timeout_us: &mut i64,
    stop: &AtomicBool,
) -> ExecOutcome {
    let program = spec.program();
    if let Err(reason) = check_program(program) {
        return ExecOutcome {
            status: -1,
            message: format!("Program {program} failed: {reason}"),
        };
    }

    let mut cmd = Command::new(program);
    cmd.args(&spec.argv[1..])
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(uid) = spec.uid {
        cmd.uid(uid);
    }
    if let Some(gid) = spec.gid {
        cmd.gid(gid);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return ExecOutcome {
                status: -1,
                message: format!("Program {program} failed: {e}"),
            };
        }
    };

    let mut status = -1;
    loop {
        thread::sleep(Duration::from_micros(POLL_INTERVAL_US as u64));
        *timeout_us -= POLL_INTERVAL_US;
        match child.try_wait() {
            Ok(Some(exit)) => {
                status = exit.code().unwrap_or(-1);
                break;
            }
            Ok(None) => {}
            Err(_) => break,
        }
        if *timeout_us <= 0 || stop.load(Ordering::SeqCst) {
            break;
        }
    }

    let timed_out = *timeout_us <= 0 && status < 0;
    let mut message = if timed_out {
        format!("Program {program} timed out")
    } else {
        String::new()
    };

    if status < 0 {
        // Kill the child so the pipes close and the process is reaped.
        let _ = child.kill();
        let _ = child.wait();
    }

    let output = drain_output(&mut child);
    if !output.is_empty() {
        debug!("{output}");
        let prefix = if timed_out { "Program timed out -- " } else { "" };
        message = format!("{program}: {prefix}{output}");
    }

    ExecOutcome { status, message }
}

fn check_program(program: &str) -> Result<(), String> {
    let meta = fs::metadata(program).map_err(|e| e.to_string())?;
    if !meta.is_file() {
        return Err("not a regular file".to_string());
    }
    if meta.permissions().mode() & 0o111 == 0 {
        return Err("not executable".to_string());
    }
    Ok(())
}

/// Reads up to [`OUTPUT_CAP`] bytes of child output, preferring stderr.
fn drain_output(child: &mut std::process::Child) -> String {
    let mut buf = Vec::with_capacity(OUTPUT_CAP);
    if let Some(stderr) = child.stderr.take() {
        let _ = stderr.take(OUTPUT_CAP as u64).read_to_end(&mut buf);
    }
    if buf.is_empty()
        && let Some(stdout) = child.stdout.take()
    {
        let _ = stdout.take(OUTPUT_CAP as u64).read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).trim_end().to_string()
}
