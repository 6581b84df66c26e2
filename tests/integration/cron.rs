use chrono::{Local, TimeZone};
use vigild::cron;

fn local(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> chrono::DateTime<Local> {
    Local
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap()
}

#[test]
fn exact_match_at_half_past_four() {
    let expr = "30 4 * * *";
    assert!(cron::matches(expr, &local(2025, 2, 3, 4, 30, 0)));
    assert!(cron::matches(expr, &local(2025, 2, 3, 4, 30, 59)));
    assert!(!cron::matches(expr, &local(2025, 2, 3, 4, 29, 59)));
    assert!(!cron::matches(expr, &local(2025, 2, 3, 5, 30, 0)));
}

#[test]
fn step_grammar_is_outside_the_accepted_language() {
    // 2025-02-03 09:10 is a Monday, so every plain field would match;
    // the */1 token must fail the whole expression.
    assert!(!cron::matches(
        "0-15,45 */1 * * 1-5",
        &local(2025, 2, 3, 9, 10, 0)
    ));
}

#[test]
fn mixed_lists_with_ranges_follow_the_grammar() {
    let expr = "1,3-5,7 * * * *";
    for minute in [1, 3, 4, 5, 7] {
        assert!(cron::matches(expr, &local(2025, 2, 3, 12, minute, 0)));
    }
    for minute in [0, 2, 6, 8] {
        assert!(!cron::matches(expr, &local(2025, 2, 3, 12, minute, 0)));
    }
}

#[test]
fn matcher_is_a_pure_function_of_expression_and_timestamp() {
    let expr = "0-15,45 9 3 2 1";
    let hit = local(2025, 2, 3, 9, 10, 0);
    let miss = local(2025, 2, 4, 9, 10, 0);
    for _ in 0..3 {
        assert!(cron::matches(expr, &hit));
        assert!(!cron::matches(expr, &miss));
    }
}

#[test]
fn weekday_window_gates_business_hours() {
    let expr = "* 8-17 * * 1-5";
    // Monday 09:00 inside the window.
    assert!(cron::matches(expr, &local(2025, 2, 3, 9, 0, 0)));
    // Saturday 09:00 outside the window.
    assert!(!cron::matches(expr, &local(2025, 2, 8, 9, 0, 0)));
    // Monday 18:00 outside the window.
    assert!(!cron::matches(expr, &local(2025, 2, 3, 18, 0, 0)));
}
