//! Periodic status push to remote collectors.
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::run::Engine;

/// Background worker pushing one status document per poll interval to
/// every configured collector. It sleeps on a condition variable with a
/// deadline so reload and shutdown interrupt the wait promptly.
pub struct Heartbeat {
    handle: JoinHandle<()>,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl Heartbeat {
    /// Spawns the worker. The thread exits on shutdown, on reload, or when
    /// [`stop`](Self::stop) is called.
    pub fn spawn(engine: Arc<Engine>) -> Self {
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let gate_worker = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            info!("heartbeat started");
            let polltime = Duration::from_secs(engine.conf.polltime);
            let (lock, cvar) = &*gate_worker;
            let mut quit = lock.lock().unwrap_or_else(|e| e.into_inner());
            while !*quit && !engine.flags.stopped() && !engine.flags.doreload() {
                push(&engine);
                let (guard, _) = cvar
                    .wait_timeout(quit, polltime)
                    .unwrap_or_else(|e| e.into_inner());
                quit = guard;
            }
            info!("heartbeat stopped");
        });
        Self { handle, gate }
    }

    /// Wakes the worker and joins it.
    pub fn stop(self) {
        let (lock, cvar) = &*self.gate;
        if let Ok(mut quit) = lock.lock() {
            *quit = true;
        }
        cvar.notify_all();
        let _ = self.handle.join();
    }

    /// Interrupts the current sleep without shutting the worker down; the
    /// worker re-checks the engine flags and exits if reload or shutdown
    /// was requested.
    pub fn interrupt(&self) {
        let (_, cvar) = &*self.gate;
        cvar.notify_all();
    }
}

/// Sends the status document to every collector. Failures are logged and
/// the next interval retries.
fn push(engine: &Arc<Engine>) {
    if engine.conf.collectors.is_empty() {
        return;
    }
    let body = match status_document(engine) {
        Ok(body) => body,
        Err(e) => {
            warn!("heartbeat payload failed: {e}");
            return;
        }
    };
    for collector in &engine.conf.collectors {
        if let Err(e) = deliver(collector, &body) {
            warn!("heartbeat to {collector} failed: {e}");
        } else {
            debug!("heartbeat delivered to {collector}");
        }
    }
}

fn status_document(engine: &Arc<Engine>) -> Result<String, crate::error::VigilError> {
    let table = engine.services.lock()?;
    let services: Vec<serde_json::Value> = table
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "type": s.kind.to_string(),
                "monitor": s.monitor,
                "pid": s.info.pid,
            })
        })
        .collect();
    let doc = json!({
        "id": engine.id,
        "host": engine.conf.hostname,
        "timestamp": crate::clock::gmt_stamp(chrono::Utc::now()),
        "uptime": engine.uptime_secs(),
        "uptime_human": crate::clock::uptime_string(engine.uptime_secs()),
        "cycle": engine.cycle(),
        "services": services,
    });
    Ok(doc.to_string())
}

fn deliver(collector: &str, body: &str) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(collector)?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    stream.set_write_timeout(Some(Duration::from_secs(5)))?;
    write!(
        stream,
        "POST /collector HTTP/1.0\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        body.len(),
        body
    )?;
    stream.flush()?;
    // Drain whatever the collector answers; delivery is fire-and-forget.
    let mut sink = [0u8; 512];
    let _ = stream.read(&mut sink);
    Ok(())
}
