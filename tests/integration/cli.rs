use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

fn vigil() -> Command {
    Command::cargo_bin("vigil").expect("binary built")
}

#[test]
fn syntax_check_accepts_a_valid_control_file() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(
        &config,
        r#"services:
  web:
    type: process
    pidfile: /run/web.pid
"#,
    )
    .expect("write config");

    vigil()
        .args(["-c", config.to_str().unwrap(), "-t"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Control file syntax OK"));
}

#[test]
fn syntax_check_rejects_unparseable_input() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(&config, "services: [not, a, map").expect("write config");

    vigil()
        .args(["-c", config.to_str().unwrap(), "-t"])
        .assert()
        .failure();
}

#[test]
fn syntax_check_rejects_dependency_cycles() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(
        &config,
        r#"services:
  a:
    type: process
    depends_on: [b]
  b:
    type: process
    depends_on: [a]
"#,
    )
    .expect("write config");

    vigil()
        .args(["-c", config.to_str().unwrap(), "-t"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dependency cycle"));
}

#[test]
fn hash_option_prints_sha1_and_md5() {
    let temp = tempdir().expect("tempdir");
    let file = temp.path().join("payload");
    fs::write(&file, b"abc").expect("write payload");

    vigil()
        .args(["-H", file.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("SHA1")
                .and(predicate::str::contains("MD5"))
                .and(predicate::str::contains(
                    // SHA1("abc")
                    "a9993e364706816aba3e25717850c26c9cd0d89d",
                ))
                .and(predicate::str::contains(
                    // MD5("abc")
                    "900150983cd24fb0d6963f7d28e17f72",
                )),
        );
}

#[test]
fn invalid_action_verbs_exit_nonzero() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(
        &config,
        r#"services:
  web:
    type: process
"#,
    )
    .expect("write config");

    vigil()
        .args(["-c", config.to_str().unwrap(), "explode"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid action"));
}

#[test]
fn control_verbs_require_a_target() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(
        &config,
        r#"services:
  web:
    type: process
"#,
    )
    .expect("write config");

    vigil()
        .args(["-c", config.to_str().unwrap(), "start"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("service name or 'all'"));
}

#[test]
fn summary_lists_every_service() {
    let temp = tempdir().expect("tempdir");
    let dir = temp.path();
    let config = dir.join("vigil.yaml");
    fs::write(
        &config,
        format!(
            r#"pidfile: {dir}/vigil.pid
statefile: {dir}/vigil.state
idfile: {dir}/vigil.id
services:
  afile:
    type: file
    path: {dir}/present
"#,
            dir = dir.display()
        ),
    )
    .expect("write config");
    fs::write(dir.join("present"), b"x").expect("marker");

    vigil()
        .args(["-c", config.to_str().unwrap(), "summary"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("'afile'")
                .and(predicate::str::contains("Accessible")),
        );
}

#[test]
fn procmatch_reports_match_counts() {
    let temp = tempdir().expect("tempdir");
    let config = temp.path().join("vigil.yaml");
    fs::write(
        &config,
        r#"services:
  web:
    type: process
"#,
    )
    .expect("write config");

    vigil()
        .args([
            "-c",
            config.to_str().unwrap(),
            "procmatch",
            "definitely-no-such-process-name",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Total matches: 0"));
}
