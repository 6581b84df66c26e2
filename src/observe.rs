//! Process liveness probes and start/stop convergence.
//!
//! Start convergence polls with exponential back-off (process-table scans
//! are expensive and a heavy service may take seconds to come up); stop
//! convergence re-checks a single pid every 100 ms, which is cheap.
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::{Pid, getpgid};
use regex::Regex;
use sysinfo::{ProcessesToUpdate, System};
use tracing::debug;

use crate::service::{Service, ServiceType};

/// First start-convergence wait in microseconds.
pub const INITIAL_BACKOFF_US: i64 = 50_000;

/// Ceiling for the doubling back-off.
pub const MAX_BACKOFF_US: i64 = 1_000_000;

/// Stop-convergence poll interval in microseconds.
pub const STOP_POLL_US: i64 = 100_000;

/// Outcome of a convergence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converged {
    Started,
    Stopped,
}

/// Returns the pid of the service's process when it is alive, else 0.
///
/// Only Process services have a liveness notion here; for every other type
/// the executor's exit code is the sole signal and this returns 0. With
/// `resolve_pid` unset a still-valid cached pid is reused instead of
/// resolving from scratch.
pub fn is_running(service: &Service, resolve_pid: bool) -> u32 {
    if service.kind != ServiceType::Process {
        return 0;
    }
    if !resolve_pid && service.info.pid != 0 && pid_alive(service.info.pid) {
        return service.info.pid;
    }
    resolve(service)
}

fn resolve(service: &Service) -> u32 {
    if let Some(pidfile) = &service.pidfile {
        let pid = match read_pid_file(pidfile) {
            Some(pid) => pid,
            None => return 0,
        };
        if !pid_alive(pid) {
            return 0;
        }
        if let Some(pattern) = &service.match_pattern
            && !pid_matches(pid, pattern)
        {
            debug!("'{}' pid {} does not match pattern", service.name, pid);
            return 0;
        }
        return pid;
    }

    if let Some(pattern) = &service.match_pattern {
        return match_process_table(pattern).first().map(|m| m.pid).unwrap_or(0);
    }

    0
}

/// True while the kernel still knows the pid. Losing permission to query
/// the process group means the process exists but belongs to someone else,
/// so it still counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    match getpgid(Some(Pid::from_raw(pid as i32))) {
        Ok(_) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

fn read_pid_file(path: &std::path::Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}

fn pid_matches(pid: u32, pattern: &Regex) -> bool {
    let mut system = System::new();
    system.refresh_processes(
        ProcessesToUpdate::Some(&[sysinfo::Pid::from_u32(pid)]),
        true,
    );
    system
        .process(sysinfo::Pid::from_u32(pid))
        .map(|proc| pattern.is_match(&command_line(proc)))
        .unwrap_or(false)
}

/// A process-table match for `procmatch` output.
#[derive(Debug, Clone)]
pub struct ProcessMatch {
    pub pid: u32,
    pub command: String,
}

/// Scans the process table for commands matching `pattern`, skipping the
/// calling process itself.
pub fn match_process_table(pattern: &Regex) -> Vec<ProcessMatch> {
    let own_pid = std::process::id();
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut matches = Vec::new();
    for (pid, proc) in system.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let command = command_line(proc);
        if pattern.is_match(&command) {
            matches.push(ProcessMatch {
                pid: pid.as_u32(),
                command,
            });
        }
    }
    matches.sort_by_key(|m| m.pid);
    matches
}

fn command_line(proc: &sysinfo::Process) -> String {
    let cmd = proc.cmd();
    if cmd.is_empty() {
        proc.name().to_string_lossy().to_string()
    } else {
        cmd.iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Next wait in the doubling back-off, capped at one second.
pub fn next_backoff(wait_us: i64) -> i64 {
    if wait_us < MAX_BACKOFF_US {
        (wait_us * 2).min(MAX_BACKOFF_US)
    } else {
        MAX_BACKOFF_US
    }
}

/// Polls for the service's process to appear, with exponential back-off.
/// Returns [`Converged::Stopped`] when the timeout budget runs out or
/// shutdown was requested.
pub fn wait_start(service: &Service, timeout_us: &mut i64, stop: &AtomicBool) -> Converged {
    let mut wait = INITIAL_BACKOFF_US;
    loop {
        if is_running(service, true) != 0 {
            return Converged::Started;
        }
        thread::sleep(Duration::from_micros(wait as u64));
        *timeout_us -= wait;
        wait = next_backoff(wait);
        if *timeout_us <= 0 || stop.load(Ordering::SeqCst) {
            return Converged::Stopped;
        }
    }
}

/// Polls every 100 ms for `pid` to disappear. Returns
/// [`Converged::Started`] when the process is still there after the budget
/// runs out or shutdown was requested.
pub fn wait_stop(pid: u32, timeout_us: &mut i64, stop: &AtomicBool) -> Converged {
    loop {
        if pid == 0 || !pid_alive(pid) {
            return Converged::Stopped;
        }
        thread::sleep(Duration::from_micros(STOP_POLL_US as u64));
        *timeout_us -= STOP_POLL_US;
        if *timeout_us <= 0 || stop.load(Ordering::SeqCst) {
            return Converged::Started;
        }
    }
}
