//! Cron-expression matching for rule gates.
//!
//! An expression has five whitespace-separated fields, `minute hour day
//! month weekday`, each a comma-separated list of `*`, a plain integer or
//! an inclusive `from-to` range. Weekday 0 is Sunday. Anything outside that
//! grammar fails the whole match; there is deliberately no support for
//! `*/n` steps or symbolic names.
use chrono::{DateTime, Datelike, Local, Timelike};

/// Tests whether `time` falls within the cron expression `expr`.
///
/// A pure function of its two inputs: malformed expressions simply never
/// match.
pub fn matches(expr: &str, time: &DateTime<Local>) -> bool {
    let values = [
        time.minute(),
        time.hour(),
        time.day(),
        time.month(),
        time.weekday().num_days_from_sunday(),
    ];

    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }

    fields
        .iter()
        .zip(values.iter())
        .all(|(field, value)| field_matches(field, *value).unwrap_or(false))
}

/// Matches one field against one timestamp component. `None` signals a
/// token outside the grammar, which the caller treats as a failed match.
fn field_matches(field: &str, value: u32) -> Option<bool> {
    let mut hit = false;
    for element in field.split(',') {
        if element_matches(element, value)? {
            hit = true;
        }
    }
    Some(hit)
}

fn element_matches(element: &str, value: u32) -> Option<bool> {
    if element == "*" {
        return Some(true);
    }
    if let Some((from, to)) = element.split_once('-') {
        let from = parse_number(from)?;
        let to = parse_number(to)?;
        return Some(from <= value && value <= to);
    }
    parse_number(element).map(|n| n == value)
}

fn parse_number(token: &str) -> Option<u32> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}
