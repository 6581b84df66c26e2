#[path = "common/mod.rs"]
mod common;

use std::fs;
use std::time::{Duration, Instant};

use common::{engine_from, read_order, write_config};
use tempfile::tempdir;
use vigild::control;
use vigild::service::{Action, Monitor};

#[test]
fn start_walks_prerequisites_before_the_target() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let order = dir.join("order");

    // C depends on B depends on A; all file-typed so commands run
    // without process convergence waits.
    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  a:
    type: file
    path: {dir}/a.marker
    start: {{ command: ["/bin/sh", "-c", "echo a >> {order}"], timeout: 5 }}
  b:
    type: file
    path: {dir}/b.marker
    depends_on: [a]
    start: {{ command: ["/bin/sh", "-c", "echo b >> {order}"], timeout: 5 }}
  c:
    type: file
    path: {dir}/c.marker
    depends_on: [b]
    start: {{ command: ["/bin/sh", "-c", "echo c >> {order}"], timeout: 5 }}
"#,
            dir = dir.display(),
            order = order.display()
        ),
    );

    let engine = engine_from(&config_path);
    control::control(&engine, "c", Action::Start).expect("start c");

    assert_eq!(read_order(&order), vec!["a", "b", "c"]);
}

#[test]
fn restart_with_failing_stop_skips_the_start_and_keeps_monitoring() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let order = dir.join("order");
    let pidfile = dir.join("svc.pid");

    // The pid file points at this test process, which stays alive, so the
    // stop never converges within its one-second budget.
    fs::write(&pidfile, format!("{}\n", std::process::id())).expect("write pidfile");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  svc:
    type: process
    pidfile: {pidfile}
    start: {{ command: ["/bin/sh", "-c", "echo started >> {order}"], timeout: 5 }}
    stop: {{ command: ["/bin/sh", "-c", "exit 2"], timeout: 1 }}
"#,
            pidfile = pidfile.display(),
            order = order.display()
        ),
    );

    let engine = engine_from(&config_path);
    control::control(&engine, "svc", Action::Restart).expect("restart");

    assert!(
        read_order(&order).is_empty(),
        "start must not run after a failed stop"
    );
    let table = engine.services.lock().expect("lock");
    assert_ne!(
        table.get("svc").expect("svc").monitor,
        Monitor::Not,
        "service must stay monitored so the next cycle retries"
    );
}

#[test]
fn shared_prerequisite_starts_exactly_once() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let order = dir.join("order");
    let z_pidfile = dir.join("z.pid");

    // Z is a process whose start leaves a live child behind; X and Y both
    // depend on it. The second batch observes Z running and skips it.
    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  z:
    type: process
    pidfile: {z_pidfile}
    start:
      command: ["/bin/sh", "-c", "sleep 30 & echo $! > {z_pidfile}; echo z >> {order}"]
      timeout: 5
  x:
    type: file
    path: {dir}/x.marker
    depends_on: [z]
    start: {{ command: ["/bin/sh", "-c", "echo x >> {order}"], timeout: 5 }}
  y:
    type: file
    path: {dir}/y.marker
    depends_on: [z]
    start: {{ command: ["/bin/sh", "-c", "echo y >> {order}"], timeout: 5 }}
"#,
            dir = dir.display(),
            order = order.display(),
            z_pidfile = z_pidfile.display()
        ),
    );

    let engine = engine_from(&config_path);
    control::control(&engine, "x", Action::Start).expect("start x");
    control::control(&engine, "y", Action::Start).expect("start y");

    assert_eq!(read_order(&order), vec!["z", "x", "y"]);

    if let Ok(raw) = fs::read_to_string(&z_pidfile)
        && let Ok(pid) = raw.trim().parse::<i32>()
    {
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
}

#[test]
fn stop_disables_monitoring_of_the_target_and_its_dependents() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let order = dir.join("order");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  base:
    type: file
    path: {dir}/base.marker
    stop: {{ command: ["/bin/sh", "-c", "echo base >> {order}"], timeout: 5 }}
  leaf:
    type: file
    path: {dir}/leaf.marker
    depends_on: [base]
    stop: {{ command: ["/bin/sh", "-c", "echo leaf >> {order}"], timeout: 5 }}
"#,
            dir = dir.display(),
            order = order.display()
        ),
    );

    let engine = engine_from(&config_path);
    control::control(&engine, "base", Action::Stop).expect("stop base");

    // Dependents stop before the service they depend on.
    assert_eq!(read_order(&order), vec!["leaf", "base"]);
    let table = engine.services.lock().expect("lock");
    assert_eq!(table.get("base").expect("base").monitor, Monitor::Not);
    assert_eq!(table.get("leaf").expect("leaf").monitor, Monitor::Not);
}

#[test]
fn unmonitor_descends_into_dependents_and_monitor_climbs_prerequisites() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  a:
    type: file
    path: {dir}/a.marker
  b:
    type: file
    path: {dir}/b.marker
    depends_on: [a]
  c:
    type: file
    path: {dir}/c.marker
    depends_on: [b]
"#,
            dir = dir.display()
        ),
    );

    let engine = engine_from(&config_path);
    control::control(&engine, "a", Action::Unmonitor).expect("unmonitor a");
    {
        let table = engine.services.lock().expect("lock");
        for name in ["a", "b", "c"] {
            assert_eq!(
                table.get(name).expect(name).monitor,
                Monitor::Not,
                "'{name}' must be unmonitored"
            );
        }
    }

    control::control(&engine, "b", Action::Monitor).expect("monitor b");
    let table = engine.services.lock().expect("lock");
    assert_eq!(table.get("a").expect("a").monitor, Monitor::Init);
    assert_eq!(table.get("b").expect("b").monitor, Monitor::Init);
    assert_eq!(
        table.get("c").expect("c").monitor,
        Monitor::Not,
        "dependents keep their state on monitor"
    );
}

#[test]
fn control_listener_serves_the_action_protocol() {
    use vigild::config::HttpdSection;
    use vigild::http::{HttpControl, control_daemon};

    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let order = dir.join("order");

    let config_path = write_config(
        dir,
        &format!(
            r#"services:
  web:
    type: file
    path: {dir}/web.marker
    start: {{ command: ["/bin/sh", "-c", "echo web >> {order}"], timeout: 5 }}
"#,
            dir = dir.display(),
            order = order.display()
        ),
    );

    let engine = engine_from(&config_path);
    let listener = HttpControl::spawn(
        std::sync::Arc::clone(&engine),
        HttpdSection {
            address: "127.0.0.1".to_string(),
            port: 0,
            auth: None,
        },
    )
    .expect("bind listener");

    let httpd = HttpdSection {
        address: "127.0.0.1".to_string(),
        port: listener.port(),
        auth: None,
    };

    control_daemon(&httpd, "web", Action::Start).expect("start over http");
    assert_eq!(read_order(&order), vec!["web"]);

    // Unknown services surface the scraped error text.
    let err = control_daemon(&httpd, "ghost", Action::Start).unwrap_err();
    assert!(
        err.to_string().contains("no service named"),
        "got: {err}"
    );

    listener.stop();
}

#[test]
fn executor_returns_promptly_once_shutdown_is_requested() {
    use std::sync::atomic::{AtomicBool, Ordering};

    let stop = std::sync::Arc::new(AtomicBool::new(false));
    let stop_setter = std::sync::Arc::clone(&stop);
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(300));
        stop_setter.store(true, Ordering::SeqCst);
    });

    let spec = vigild::service::CommandSpec {
        argv: vec!["/bin/sleep".to_string(), "10".to_string()],
        uid: None,
        gid: None,
        timeout: 30,
    };
    let mut timeout_us = 30_000_000;
    let started = Instant::now();
    let outcome = vigild::command::execute(&spec, &[], &mut timeout_us, &stop);
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, -1);
    assert!(
        elapsed < Duration::from_millis(1500),
        "executor took {elapsed:?} to notice shutdown"
    );
}
