use std::sync::atomic::AtomicBool;

use vigild::command::{OUTPUT_CAP, execute};
use vigild::service::CommandSpec;

fn spec(argv: &[&str], timeout: u64) -> CommandSpec {
    CommandSpec {
        argv: argv.iter().map(|s| s.to_string()).collect(),
        uid: None,
        gid: None,
        timeout,
    }
}

#[test]
fn remaining_timeout_is_never_positive_after_a_timeout_failure() {
    let stop = AtomicBool::new(false);
    for budget_us in [100_000i64, 250_000, 400_000] {
        let mut timeout_us = budget_us;
        let outcome = execute(&spec(&["/bin/sleep", "5"], 1), &[], &mut timeout_us, &stop);
        assert_eq!(outcome.status, -1);
        assert!(
            timeout_us <= 0,
            "budget {budget_us} left {timeout_us} after timeout"
        );
        assert!(outcome.message.contains("timed out"));
    }
}

#[test]
fn child_output_is_capped() {
    let stop = AtomicBool::new(false);
    let mut timeout_us = 10_000_000;
    let outcome = execute(
        &spec(
            &["/bin/sh", "-c", "dd if=/dev/zero bs=1024 count=16 2>/dev/null | tr '\\0' 'x'"],
            10,
        ),
        &[],
        &mut timeout_us,
        &stop,
    );
    assert_eq!(outcome.status, 0);
    // Program name prefix plus at most OUTPUT_CAP captured bytes.
    assert!(outcome.message.len() <= OUTPUT_CAP + 64);
}

#[test]
fn timeout_message_is_prefixed_when_output_exists() {
    let stop = AtomicBool::new(false);
    let mut timeout_us = 300_000;
    let outcome = execute(
        &spec(&["/bin/sh", "-c", "echo working; sleep 5"], 1),
        &[],
        &mut timeout_us,
        &stop,
    );
    assert_eq!(outcome.status, -1);
    assert!(
        outcome.message.contains("Program timed out -- "),
        "got: {}",
        outcome.message
    );
    assert!(outcome.message.contains("working"));
}

#[test]
fn process_environment_variables_reach_the_child() {
    let stop = AtomicBool::new(false);
    let mut timeout_us = 5_000_000;
    let env = vec![
        ("MONIT_SERVICE".to_string(), "db".to_string()),
        ("MONIT_EVENT".to_string(), "Started".to_string()),
    ];
    let outcome = execute(
        &spec(&["/bin/sh", "-c", "echo \"$MONIT_SERVICE/$MONIT_EVENT\""], 5),
        &env,
        &mut timeout_us,
        &stop,
    );
    assert_eq!(outcome.status, 0);
    assert!(outcome.message.contains("db/Started"));
}
