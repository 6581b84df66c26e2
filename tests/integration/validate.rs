#[path = "common/mod.rs"]
mod common;

use std::fs;
use std::time::Duration;

use common::{engine_from, wait_until, write_config};
use tempfile::tempdir;
use vigild::sample::Sampler;
use vigild::service::Monitor;
use vigild::validate::validate;

#[test]
fn failing_exist_rule_triggers_the_start_action() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let marker = dir.join("observed.marker");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  watched:
    type: file
    path: {marker}
    start: {{ command: ["/bin/sh", "-c", "touch {marker}"], timeout: 5 }}
    rules:
      - test: exist
        action: start
"#,
            marker = marker.display()
        ),
    );

    let engine = engine_from(&config_path);
    let mut sampler = Sampler::new();

    // Cycle 1 moves the service out of Init, cycle 2 evaluates the rule
    // and heals the missing file.
    validate(&engine, &mut sampler).expect("cycle 1");
    assert!(!marker.exists());
    validate(&engine, &mut sampler).expect("cycle 2");
    assert!(
        wait_until(Duration::from_secs(2), || marker.exists()),
        "exist rule should have started the service"
    );
}

#[test]
fn unmonitored_services_are_never_evaluated() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let marker = dir.join("observed.marker");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  watched:
    type: file
    path: {marker}
    start: {{ command: ["/bin/sh", "-c", "touch {marker}"], timeout: 5 }}
    rules:
      - test: exist
        action: start
"#,
            marker = marker.display()
        ),
    );

    let engine = engine_from(&config_path);
    {
        let mut table = engine.services.lock().expect("lock");
        table.get_mut("watched").expect("watched").monitor_unset();
    }
    let mut sampler = Sampler::new();
    validate(&engine, &mut sampler).expect("cycle");
    validate(&engine, &mut sampler).expect("cycle");
    assert!(!marker.exists());
}

#[test]
fn restart_budget_exhaustion_unmonitors_the_service() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    // The start command never creates the file, so the exist rule fails
    // every cycle and each retry burns the budget.
    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  flapping:
    type: file
    path: {dir}/never.marker
    start: {{ command: ["/bin/true"], timeout: 5 }}
    restart_limit: {{ count: 1, cycles: 10 }}
    rules:
      - test: exist
        action: start
"#,
            dir = dir.display()
        ),
    );

    let engine = engine_from(&config_path);
    let mut sampler = Sampler::new();
    for _ in 0..4 {
        validate(&engine, &mut sampler).expect("cycle");
    }

    let table = engine.services.lock().expect("lock");
    assert_eq!(
        table.get("flapping").expect("flapping").monitor,
        Monitor::Not,
        "budget exhaustion must disable monitoring"
    );
}

#[test]
fn cron_gated_rules_are_skipped_outside_their_window() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let marker = dir.join("observed.marker");

    // The gate can never match: no minute is both 0-29 and 31.
    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  gated:
    type: file
    path: {marker}
    start: {{ command: ["/bin/sh", "-c", "touch {marker}"], timeout: 5 }}
    rules:
      - test: exist
        action: start
        every: "61 * * * *"
"#,
            marker = marker.display()
        ),
    );

    let engine = engine_from(&config_path);
    let mut sampler = Sampler::new();
    validate(&engine, &mut sampler).expect("cycle");
    validate(&engine, &mut sampler).expect("cycle");
    assert!(!marker.exists(), "gated rule must not run outside its window");
}

#[test]
fn threshold_rule_fires_and_recovers() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let observed = dir.join("observed");
    fs::write(&observed, vec![0u8; 2048]).expect("write");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  sized:
    type: file
    path: {observed}
    rules:
      - test: {{ size: {{ operator: gt, bytes: 1024 }} }}
        action: alert
"#,
            observed = observed.display()
        ),
    );

    let engine = engine_from(&config_path);
    let mut sampler = Sampler::new();
    validate(&engine, &mut sampler).expect("cycle 1");
    validate(&engine, &mut sampler).expect("cycle 2");
    {
        let table = engine.services.lock().expect("lock");
        assert_eq!(
            table.get("sized").expect("sized").rule_state[0],
            Some(true),
            "oversized file must mark the rule violated"
        );
    }

    fs::write(&observed, b"small").expect("shrink");
    validate(&engine, &mut sampler).expect("cycle 3");
    let table = engine.services.lock().expect("lock");
    assert_eq!(table.get("sized").expect("sized").rule_state[0], Some(false));
}
