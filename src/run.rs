//! Engine context threaded through the daemon loop, validator, dispatcher
//! and control listener in place of process-wide globals.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::config::RunConfig;
use crate::service::ServiceTable;

/// Flags flipped by signal handlers and polled by every long wait. The
/// handlers do nothing else.
#[derive(Debug, Default)]
pub struct RunFlags {
    /// SIGTERM/SIGINT: shut down cleanly.
    pub stopped: AtomicBool,
    /// SIGHUP: re-read the control file.
    pub doreload: AtomicBool,
    /// SIGUSR1: wake from the inter-cycle sleep.
    pub dowakeup: AtomicBool,
    /// A control request ran an action; skip the next sleep and
    /// re-validate immediately.
    pub doaction: AtomicBool,
}

impl RunFlags {
    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn doreload(&self) -> bool {
        self.doreload.load(Ordering::SeqCst)
    }

    pub fn dowakeup(&self) -> bool {
        self.dowakeup.load(Ordering::SeqCst)
    }
}

/// The engine: configuration, the service table behind its single mutex,
/// the signal flags and the cycle counter.
pub struct Engine {
    pub conf: RunConfig,
    pub services: Mutex<ServiceTable>,
    pub flags: Arc<RunFlags>,
    pub cycle: AtomicU64,
    /// Unique instance id from the id file.
    pub id: String,
    pub started_at: Instant,
}

impl Engine {
    pub fn new(conf: RunConfig, services: ServiceTable, id: String) -> Self {
        Self {
            conf,
            services: Mutex::new(services),
            flags: Arc::new(RunFlags::default()),
            cycle: AtomicU64::new(0),
            id,
            started_at: Instant::now(),
        }
    }

    /// Rebuilds the engine after a reload, carrying over the signal flags
    /// (the installed handlers keep pointing at them) and the cycle
    /// counter.
    pub fn reloaded(
        conf: RunConfig,
        services: ServiceTable,
        id: String,
        flags: Arc<RunFlags>,
        cycle: u64,
    ) -> Self {
        Self {
            conf,
            services: Mutex::new(services),
            flags,
            cycle: AtomicU64::new(cycle),
            id,
            started_at: Instant::now(),
        }
    }

    /// Current cycle number.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::SeqCst)
    }

    /// Advances to the next cycle and returns it.
    pub fn next_cycle(&self) -> u64 {
        self.cycle.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Seconds since the engine came up.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
