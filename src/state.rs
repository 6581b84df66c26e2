//! Persisted per-service monitoring state.
//!
//! One JSON document, rewritten atomically (temp file, fsync, rename) at
//! the end of every cycle so the file always reflects exactly one cycle's
//! in-memory state.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StateFileError;
use crate::service::{Monitor, ServiceTable};

/// State carried across reloads for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedService {
    pub monitor: Monitor,
    /// Starts inside the restart-budget window at snapshot time.
    pub nstart: u32,
    /// Cycle counter at snapshot time.
    pub ncycle: u64,
}

/// Snapshot of the whole service table after one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    pub cycle: u64,
    pub services: BTreeMap<String, PersistedService>,
}

impl StateFile {
    /// Captures the current monitor state and restart counters.
    pub fn snapshot(table: &ServiceTable, cycle: u64) -> Self {
        let services = table
            .iter()
            .map(|s| {
                (
                    s.name.clone(),
                    PersistedService {
                        monitor: s.monitor,
                        nstart: s.budget.count_in_window(cycle),
                        ncycle: cycle,
                    },
                )
            })
            .collect();
        Self { cycle, services }
    }

    /// Writes the snapshot as a full rewrite with fsync, then renames it
    /// into place so readers never observe a partial file.
    pub fn save(&self, path: &Path) -> Result<(), StateFileError> {
        let tmp = path.with_extension("tmp");
        let mut file = File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a previously saved snapshot. A missing file is a first run
    /// and yields the empty state; a corrupt file is an error, and the
    /// daemon refuses to start on it.
    pub fn load(path: &Path) -> Result<Self, StateFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies persisted state onto a freshly parsed service table.
    /// Services unknown to the file default to `Init`; entries for
    /// services that no longer exist are ignored.
    pub fn apply(&self, table: &mut ServiceTable) {
        for service in table.iter_mut() {
            match self.services.get(&service.name) {
                Some(persisted) => {
                    service.monitor = match persisted.monitor {
                        // An action was in flight when the snapshot was
                        // taken; treat it as freshly enabled.
                        Monitor::Waiting => Monitor::Init,
                        other => other,
                    };
                    service.budget.seed(persisted.nstart, persisted.ncycle);
                }
                None => {
                    debug!("'{}' has no persisted state, starting fresh", service.name);
                    service.monitor = Monitor::Init;
                }
            }
        }
    }
}
