#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{engine_from, write_config};
use tempfile::tempdir;
use vigild::control;
use vigild::service::{Action, Monitor};
use vigild::state::StateFile;

fn two_service_config(dir: &std::path::Path) -> std::path::PathBuf {
    write_config(
        dir,
        &format!(
            r#"services:
  web:
    type: file
    path: {dir}/web.marker
  db:
    type: file
    path: {dir}/db.marker
"#,
            dir = dir.display()
        ),
    )
}

#[test]
fn monitor_state_survives_a_reload() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let config_path = two_service_config(dir);

    // First engine: user disables 'web', state is snapshotted.
    let engine = engine_from(&config_path);
    control::control(&engine, "web", Action::Unmonitor).expect("unmonitor");
    let snapshot = {
        let table = engine.services.lock().expect("lock");
        StateFile::snapshot(&table, engine.cycle())
    };
    snapshot.save(&engine.conf.statefile).expect("save");

    // Second engine, as after SIGHUP: the parsed table starts from Init
    // and the persisted state brings 'web' back to Not.
    let engine = engine_from(&config_path);
    let persisted = StateFile::load(&engine.conf.statefile).expect("load");
    {
        let mut table = engine.services.lock().expect("lock");
        persisted.apply(&mut table);
        assert_eq!(table.get("web").expect("web").monitor, Monitor::Not);
        assert_eq!(table.get("db").expect("db").monitor, Monitor::Init);
    }
}

#[test]
fn state_file_reflects_exactly_the_in_memory_state() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let config_path = two_service_config(dir);

    let engine = engine_from(&config_path);
    control::control(&engine, "db", Action::Unmonitor).expect("unmonitor");

    let table = engine.services.lock().expect("lock");
    let snapshot = StateFile::snapshot(&table, 3);
    snapshot.save(&engine.conf.statefile).expect("save");
    let reloaded = StateFile::load(&engine.conf.statefile).expect("load");
    assert_eq!(snapshot, reloaded);
}

#[test]
fn corrupt_state_file_refuses_to_load() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("vigil.state");
    fs::write(&path, "county fair").expect("write");
    assert!(StateFile::load(&path).is_err());
}

#[test]
fn services_added_by_a_reload_default_to_init() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let config_path = two_service_config(dir);

    let engine = engine_from(&config_path);
    let snapshot = {
        let table = engine.services.lock().expect("lock");
        StateFile::snapshot(&table, 1)
    };
    snapshot.save(&engine.conf.statefile).expect("save");

    // The reloaded control file grows a third service.
    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  web:
    type: file
    path: {dir}/web.marker
  db:
    type: file
    path: {dir}/db.marker
  cache:
    type: file
    path: {dir}/cache.marker
"#,
            dir = dir.display()
        ),
    );
    let engine = engine_from(&config_path);
    let persisted = StateFile::load(&engine.conf.statefile).expect("load");
    let mut table = engine.services.lock().expect("lock");
    persisted.apply(&mut table);
    assert_eq!(table.get("cache").expect("cache").monitor, Monitor::Init);
}
