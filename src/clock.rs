//! Wall-clock stamps and uptime rendering.
use chrono::{DateTime, Local, Utc};

/// Formats a timestamp as `"Ddd, DD Mmm YYYY HH:MM:SS"` in local time.
///
/// This is the stamp injected into command environments as `MONIT_DATE`.
pub fn local_stamp(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%a, %d %b %Y %H:%M:%S")
        .to_string()
}

/// Formats a timestamp as `"Ddd, DD Mmm YYYY HH:MM:SS GMT"`.
pub fn gmt_stamp(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Renders an uptime in seconds as `"Nd, Nh, Nm"`, skipping zero leading
/// units. Zero seconds renders as the empty string.
pub fn uptime_string(mut sec: u64) -> String {
    let mut out = String::with_capacity(24);
    if sec == 0 {
        return out;
    }
    let days = sec / 86_400;
    if days > 0 {
        out.push_str(&format!("{days}d"));
        sec -= days * 86_400;
    }
    let hours = sec / 3_600;
    if hours > 0 {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!("{hours}h"));
        sec -= hours * 3_600;
    }
    if !out.is_empty() {
        out.push_str(", ");
    }
    out.push_str(&format!("{}m", sec / 60));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn gmt_stamp_has_fixed_form() {
        let t = Utc.with_ymd_and_hms(2016, 3, 28, 9, 5, 7).unwrap();
        assert_eq!(gmt_stamp(t), "Mon, 28 Mar 2016 09:05:07 GMT");
    }

    #[test]
    fn uptime_skips_zero_leading_units() {
        assert_eq!(uptime_string(0), "");
        assert_eq!(uptime_string(59), "0m");
        assert_eq!(uptime_string(60), "1m");
        assert_eq!(uptime_string(3_600), "1h, 0m");
        assert_eq!(uptime_string(90_000), "1d, 1h, 0m");
        assert_eq!(uptime_string(86_400 + 120), "1d, 2m");
    }
}
