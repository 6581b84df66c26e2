#![allow(dead_code)]

//! Shared helpers for integration tests.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use vigild::config;
use vigild::run::Engine;
use vigild::service::ServiceTable;

/// Writes a control file with absolute runtime paths into `dir` and
/// returns its path.
pub fn write_config(dir: &Path, services_yaml: &str) -> PathBuf {
    let config_path = dir.join("vigil.yaml");
    let body = format!(
        r#"daemon:
  polltime: 1
pidfile: {dir}/vigil.pid
statefile: {dir}/vigil.state
idfile: {dir}/vigil.id
{services_yaml}
"#,
        dir = dir.display()
    );
    fs::write(&config_path, body).expect("write control file");
    config_path
}

/// Loads a control file and builds an engine around it.
pub fn engine_from(config_path: &Path) -> Arc<Engine> {
    let (conf, services) = config::load(config_path.to_str()).expect("load control file");
    Arc::new(Engine::new(
        conf,
        ServiceTable::new(services),
        "test-instance".to_string(),
    ))
}

/// Polls until `predicate` holds or the timeout elapses.
pub fn wait_until(timeout: Duration, predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    predicate()
}

/// Reads the newline-separated entries of a marker file, empty when the
/// file does not exist yet.
pub fn read_order(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}
