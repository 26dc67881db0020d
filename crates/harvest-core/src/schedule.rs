//! Best-effort schedule intervals.
//!
//! Accepts plain durations (`"5m"`, `"1h30m"`, `"250ms"`) and the
//! `*/N` forms of cron-like strings in the minute or hour field. Anything
//! else runs hourly. This is not a cron grammar.

use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Interval between two runs of a recurring job.
pub fn parse_schedule(schedule: &str) -> Duration {
    let schedule = schedule.trim();

    let parsed = if schedule.split_whitespace().count() >= 5 {
        parse_cron_step(schedule)
    } else {
        parse_duration(schedule)
    };

    match parsed {
        Some(d) if !d.is_zero() => d,
        _ => DEFAULT_INTERVAL,
    }
}

/// Plain duration made of `<number><unit>` groups.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let value: f64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let unit_secs = match &rest[..unit_len] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "d" => 86_400.0,
            _ => return None,
        };
        rest = &rest[unit_len..];

        let group = Duration::try_from_secs_f64(value * unit_secs).ok()?;
        total = total.checked_add(group)?;
    }

    Some(total)
}

fn parse_cron_step(expr: &str) -> Option<Duration> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    // Six fields means a leading seconds column.
    let (minute, hour) = match fields.len() {
        5 => (fields[0], fields[1]),
        6 => (fields[1], fields[2]),
        _ => return None,
    };

    if let Some(n) = step(minute) {
        return n.checked_mul(60).map(Duration::from_secs);
    }
    if let Some(n) = step(hour) {
        return n.checked_mul(3600).map(Duration::from_secs);
    }
    None
}

fn step(field: &str) -> Option<u64> {
    field
        .strip_prefix("*/")
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_durations() {
        assert_eq!(parse_schedule("5m"), Duration::from_secs(300));
        assert_eq!(parse_schedule("1h"), Duration::from_secs(3600));
        assert_eq!(parse_schedule("1h30m"), Duration::from_secs(5400));
        assert_eq!(parse_schedule("45s"), Duration::from_secs(45));
        assert_eq!(parse_schedule("250ms"), Duration::from_millis(250));
        assert_eq!(parse_schedule("1.5h"), Duration::from_secs(5400));
        assert_eq!(parse_schedule("2d"), Duration::from_secs(2 * 86_400));
    }

    #[test]
    fn cron_minute_step() {
        assert_eq!(parse_schedule("*/15 * * * *"), Duration::from_secs(900));
        assert_eq!(parse_schedule("0 */10 * * * *"), Duration::from_secs(600));
    }

    #[test]
    fn cron_hour_step() {
        assert_eq!(parse_schedule("0 */6 * * *"), Duration::from_secs(6 * 3600));
    }

    #[test]
    fn unsupported_forms_default_to_hourly() {
        assert_eq!(parse_schedule("0 9 * * MON-FRI"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("every tuesday"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule(""), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("0s"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("*/0 * * * *"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("10x"), DEFAULT_INTERVAL);
    }

    #[test]
    fn overflowing_values_default_to_hourly() {
        assert_eq!(
            parse_schedule("10000000000000000000s10000000000000000000s"),
            DEFAULT_INTERVAL
        );
        assert_eq!(parse_schedule("*/307445734561825861 * * * *"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("0 */5124095576030432 * * *"), DEFAULT_INTERVAL);
        assert_eq!(parse_schedule("1e400s"), DEFAULT_INTERVAL);
    }
}
