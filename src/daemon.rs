//! Daemon runtime: signal handling, the poll loop, reload and shutdown.
//!
//! Signal handlers only flip atomic flags; the loop and every long wait
//! poll them, so shutdown propagates within one polling quantum.
use std::fs::File;
use std::os::unix::io::IntoRawFd;
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::Pid;
use tracing::{error, info, warn};

use crate::config::{self, RunConfig};
use crate::error::VigilError;
use crate::event::{Event, EventKind, EventState};
use crate::files;
use crate::heartbeat::Heartbeat;
use crate::http::HttpControl;
use crate::run::{Engine, RunFlags};
use crate::sample::Sampler;
use crate::service::{Action, ServiceTable};
use crate::state::StateFile;
use crate::validate;

/// Service name used for daemon lifecycle events.
const INSTANCE: &str = "vigil";

static FLAGS: OnceLock<Arc<RunFlags>> = OnceLock::new();

extern "C" fn handle_signal(sig: libc::c_int) {
    let Some(flags) = FLAGS.get() else {
        return;
    };
    match Signal::try_from(sig) {
        Ok(Signal::SIGTERM) | Ok(Signal::SIGINT) => {
            flags.stopped.store(true, Ordering::SeqCst)
        }
        Ok(Signal::SIGHUP) => flags.doreload.store(true, Ordering::SeqCst),
        Ok(Signal::SIGUSR1) => flags.dowakeup.store(true, Ordering::SeqCst),
        _ => {}
    }
}

/// Installs the flag-flipping handlers and ignores SIGPIPE.
pub fn install_signal_handlers(flags: &Arc<RunFlags>) -> Result<(), VigilError> {
    let _ = FLAGS.set(Arc::clone(flags));
    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        signal::sigaction(Signal::SIGTERM, &action)?;
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGHUP, &action)?;
        signal::sigaction(Signal::SIGUSR1, &action)?;
        signal::sigaction(Signal::SIGPIPE, &ignore)?;
    }
    Ok(())
}

/// Detaches from the controlling terminal: double fork, new session,
/// working directory `/`, standard descriptors on `/dev/null`.
pub fn daemonize() -> std::io::Result<()> {
    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }
    unsafe {
        libc::setsid();
    }
    if unsafe { libc::fork() } > 0 {
        std::process::exit(0);
    }

    std::env::set_current_dir("/")?;
    let devnull = File::open("/dev/null")?;
    let fd = devnull.into_raw_fd();
    unsafe {
        let _ = libc::dup2(fd, libc::STDIN_FILENO);
        let _ = libc::dup2(fd, libc::STDOUT_FILENO);
        let _ = libc::dup2(fd, libc::STDERR_FILENO);
        libc::close(fd);
    }
    Ok(())
}

/// Sends a signal to a running daemon found through the pid file.
pub fn kill_daemon(conf: &RunConfig, signal: Signal) -> Result<(), VigilError> {
    match files::daemon_pid(&conf.pidfile) {
        Some(pid) => {
            signal::kill(Pid::from_raw(pid as i32), signal)?;
            Ok(())
        }
        None => Err(VigilError::UnknownService(
            "no running daemon found".to_string(),
        )),
    }
}

/// Wakes a sleeping daemon; true when one was signalled.
pub fn wakeup_call(conf: &RunConfig) -> bool {
    if let Some(pid) = files::daemon_pid(&conf.pidfile) {
        if signal::kill(Pid::from_raw(pid as i32), Signal::SIGUSR1).is_ok() {
            info!("vigil daemon with pid {pid} awakened");
            return true;
        }
    }
    false
}

/// The daemon runtime owning the engine and its background workers.
pub struct Daemon {
    engine: Arc<Engine>,
    sampler: Sampler,
    http: Option<HttpControl>,
    heartbeat: Option<Heartbeat>,
    /// Held open for the lock; dropped on shutdown.
    pid_file: Option<File>,
}

impl Daemon {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            sampler: Sampler::new(),
            http: None,
            heartbeat: None,
            pid_file: None,
        }
    }

    /// Runs the daemon until shutdown. In non-daemon mode a single cycle
    /// is validated instead.
    pub fn run(&mut self) -> Result<(), VigilError> {
        install_signal_handlers(&self.engine.flags)?;
        self.load_state()?;

        if !self.engine.conf.daemon {
            validate::validate(&self.engine, &mut self.sampler)?;
            self.save_state();
            return Ok(());
        }

        if !self.engine.conf.foreground {
            daemonize()?;
        }
        self.pid_file = Some(files::create_pid_file(&self.engine.conf.pidfile)?);
        info!(
            "starting vigil daemon with poll interval {}s",
            self.engine.conf.polltime
        );

        if self.engine.conf.start_delay > 0 {
            info!(
                "start delay set -- pause for {}s",
                self.engine.conf.start_delay
            );
            self.interruptible_sleep(Duration::from_secs(self.engine.conf.start_delay));
        }

        self.open_workers()?;
        Event::new(
            INSTANCE,
            EventKind::Instance,
            EventState::Changed,
            Action::Alert,
            "daemon started",
        )
        .post();

        while !self.engine.flags.stopped() {
            validate::validate(&self.engine, &mut self.sampler)?;
            self.save_state();

            if !self.engine.flags.doaction.swap(false, Ordering::SeqCst) {
                self.interruptible_sleep(Duration::from_secs(self.engine.conf.polltime));
            }
            if self.engine.flags.dowakeup.swap(false, Ordering::SeqCst) {
                info!("awakened by user defined signal 1");
            }
            if self.engine.flags.stopped() {
                break;
            }
            if self.engine.flags.doreload() {
                self.reinit()?;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// Sleeps in one-second quanta so signals take effect promptly; the
    /// pause is re-entered until the full duration elapsed or a flag was
    /// raised.
    fn interruptible_sleep(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline {
            if self.engine.flags.stopped()
                || self.engine.flags.doreload()
                || self.engine.flags.dowakeup()
            {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            thread::sleep(remaining.min(Duration::from_secs(1)));
        }
    }

    fn load_state(&self) -> Result<(), VigilError> {
        let persisted = StateFile::load(&self.engine.conf.statefile)?;
        let mut table = self.engine.services.lock()?;
        persisted.apply(&mut table);
        Ok(())
    }

    /// Snapshots the table to disk; failures are logged and the next
    /// cycle retries.
    fn save_state(&self) {
        let snapshot = {
            match self.engine.services.lock() {
                Ok(table) => StateFile::snapshot(&table, self.engine.cycle()),
                Err(e) => {
                    error!("state snapshot failed: {e}");
                    return;
                }
            }
        };
        if let Err(e) = snapshot.save(&self.engine.conf.statefile) {
            error!("could not save state: {e}");
        }
    }

    fn open_workers(&mut self) -> Result<(), VigilError> {
        if let Some(httpd) = self.engine.conf.httpd.clone() {
            self.http = Some(HttpControl::spawn(Arc::clone(&self.engine), httpd)?);
        }
        if !self.engine.conf.collectors.is_empty() {
            self.heartbeat = Some(Heartbeat::spawn(Arc::clone(&self.engine)));
        }
        Ok(())
    }

    fn close_workers(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        if let Some(http) = self.http.take() {
            http.stop();
        }
    }

    /// Re-initialisation after SIGHUP: workers are joined, state is
    /// snapshotted and closed, the control file re-parsed, and everything
    /// reopened on the new catalogue.
    fn reinit(&mut self) -> Result<(), VigilError> {
        info!(
            "reinitializing daemon -- control file {:?}",
            self.engine.conf.controlfile
        );
        self.close_workers();
        self.save_state();

        let controlfile = self.engine.conf.controlfile.clone();
        let (mut conf, services) = match config::load(controlfile.to_str()) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("reload failed, daemon died -- {e}");
                return Err(e);
            }
        };
        conf.daemon = true;
        conf.foreground = self.engine.conf.foreground;
        conf.debug = self.engine.conf.debug;

        if conf.pidfile != self.engine.conf.pidfile {
            drop(self.pid_file.take());
            files::remove_pid_file(&self.engine.conf.pidfile);
            self.pid_file = Some(files::create_pid_file(&conf.pidfile)?);
        }

        let id = files::instance_id(&conf.idfile)?;
        self.engine.flags.doreload.store(false, Ordering::SeqCst);
        let engine = Engine::reloaded(
            conf,
            ServiceTable::new(services),
            id,
            Arc::clone(&self.engine.flags),
            self.engine.cycle(),
        );
        self.engine = Arc::new(engine);
        self.load_state()?;

        self.open_workers()?;
        Event::new(
            INSTANCE,
            EventKind::Instance,
            EventState::Changed,
            Action::Alert,
            "daemon reloaded",
        )
        .post();
        Ok(())
    }

    fn shutdown(&mut self) {
        self.close_workers();
        self.save_state();
        Event::new(
            INSTANCE,
            EventKind::Instance,
            EventState::Changed,
            Action::Alert,
            "daemon stopped",
        )
        .post();
        if self.pid_file.take().is_some() {
            files::remove_pid_file(&self.engine.conf.pidfile);
        }
        info!(
            "vigil daemon with pid {} stopped",
            std::process::id()
        );
    }
}

/// Asks a running daemon to re-read its control file (`reload` verb).
pub fn request_reload(conf: &RunConfig) -> Result<(), VigilError> {
    info!("reinitializing daemon");
    kill_daemon(conf, Signal::SIGHUP)
}

/// Asks a running daemon to terminate (`quit` verb).
pub fn request_quit(conf: &RunConfig) -> Result<(), VigilError> {
    match kill_daemon(conf, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("no daemon to stop");
            Err(e)
        }
    }
}
