//! Schedule-time parsing
//!
//! Turns user-supplied time expressions into absolute UTC timestamps:
//! - absolute: `2026-03-01T09:00:00Z`, `2026-03-01 09:00` (naive times are UTC)
//! - relative: `30m`, `2h`, `1 day`
//! - natural language: `tomorrow`, `next monday 10am`
//! - random windows: `random:10m-2h`, offset from the platform's latest scheduled post

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use rand::Rng;

use crate::error::{Result, SchedcastError};

const MIN_RANDOM_SECONDS: i64 = 30;
const MAX_RANDOM_SECONDS: i64 = 30 * 24 * 3600;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// When a post should go out, as given by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleTime {
    At(DateTime<Utc>),
    Expr(String),
}

impl ScheduleTime {
    /// Resolve to an absolute time relative to `now`.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        last_scheduled: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>> {
        match self {
            ScheduleTime::At(at) => Ok(at.trunc_subsecs(3)),
            ScheduleTime::Expr(expr) => parse_schedule_time(expr, now, last_scheduled),
        }
    }

    /// Whether resolving needs the platform's latest scheduled time.
    pub fn is_random(&self) -> bool {
        matches!(self, ScheduleTime::Expr(expr) if expr.trim().starts_with("random:"))
    }
}

impl From<DateTime<Utc>> for ScheduleTime {
    fn from(at: DateTime<Utc>) -> Self {
        ScheduleTime::At(at)
    }
}

impl From<&str> for ScheduleTime {
    fn from(expr: &str) -> Self {
        ScheduleTime::Expr(expr.to_string())
    }
}

impl From<String> for ScheduleTime {
    fn from(expr: String) -> Self {
        ScheduleTime::Expr(expr)
    }
}

/// Parse a schedule expression into an absolute time.
///
/// # Errors
///
/// Every unparseable input yields [`SchedcastError::InvalidTime`].
pub fn parse_schedule_time(
    input: &str,
    now: DateTime<Utc>,
    last_scheduled: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(invalid("schedule time cannot be empty"));
    }

    if let Some(range) = input.strip_prefix("random:") {
        return parse_random_schedule(range, now, last_scheduled);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc).trunc_subsecs(3));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(naive.and_utc().trunc_subsecs(3));
        }
    }

    if let Ok(duration) = parse_duration(input) {
        return offset(now, duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us)
        .map(|dt| dt.trunc_subsecs(3))
        .map_err(|_| invalid(&format!("could not parse '{}'", input)))
}

fn invalid(reason: &str) -> SchedcastError {
    SchedcastError::InvalidTime(reason.to_string())
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| invalid(&format!("could not parse duration '{}': {}", input, e)))?;
    let seconds = i64::try_from(std_duration.as_secs())
        .map_err(|_| invalid("duration out of range"))?;
    Duration::try_seconds(seconds).ok_or_else(|| invalid("duration out of range"))
}

fn parse_random_schedule(
    range: &str,
    now: DateTime<Utc>,
    last_scheduled: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>> {
    let (min_str, max_str) = range
        .split_once('-')
        .ok_or_else(|| invalid("random format must be random:MIN-MAX"))?;
    let min = parse_duration(min_str.trim())?;
    let max = parse_duration(max_str.trim())?;

    validate_random_range(min, max)?;

    // Offsets stack after the latest queued post so random posts don't bunch up.
    let base = match last_scheduled {
        Some(last) if last > now => last,
        _ => now,
    };
    let seconds = rand::thread_rng().gen_range(min.num_seconds()..=max.num_seconds());

    offset(base, Duration::seconds(seconds))
}

/// `base + duration`, or `InvalidTime` when that is past the representable range.
pub(crate) fn offset(base: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    base.checked_add_signed(duration)
        .map(|at| at.trunc_subsecs(3))
        .ok_or_else(|| invalid("time is out of range"))
}

fn validate_random_range(min: Duration, max: Duration) -> Result<()> {
    if min.num_seconds() < MIN_RANDOM_SECONDS {
        return Err(invalid(&format!(
            "minimum random interval must be at least {} seconds",
            MIN_RANDOM_SECONDS
        )));
    }
    if max.num_seconds() > MAX_RANDOM_SECONDS {
        return Err(invalid(&format!(
            "maximum random interval must be at most {} days",
            MAX_RANDOM_SECONDS / (24 * 3600)
        )));
    }
    if min >= max {
        return Err(invalid("random minimum must be less than maximum"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn parse(input: &str) -> Result<DateTime<Utc>> {
        parse_schedule_time(input, fixed_now(), None)
    }

    #[test]
    fn test_parse_rfc3339() {
        let at = parse("2026-03-02T09:30:00Z").unwrap();
        assert_eq!(at, Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap());

        let offset = parse("2026-03-02T10:30:00+01:00").unwrap();
        assert_eq!(offset, at);
    }

    #[test]
    fn test_parse_naive_datetime_as_utc() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        assert_eq!(parse("2026-03-02 15:00").unwrap(), expected);
        assert_eq!(parse("2026-03-02T15:00:00").unwrap(), expected);
    }

    #[test]
    fn test_parse_relative_durations() {
        assert_eq!(parse("30m").unwrap(), fixed_now() + Duration::minutes(30));
        assert_eq!(parse("2h").unwrap(), fixed_now() + Duration::hours(2));
        assert_eq!(parse("1 day").unwrap(), fixed_now() + Duration::days(1));
    }

    #[test]
    fn test_parse_natural_language() {
        let tomorrow = parse("tomorrow").unwrap();
        let diff = (tomorrow - fixed_now()).num_hours();
        assert!((12..=36).contains(&diff), "expected ~1 day, got {diff}h");
    }

    #[test]
    fn test_parse_random_window() {
        for _ in 0..20 {
            let at = parse("random:10m-20m").unwrap();
            let diff = (at - fixed_now()).num_seconds();
            assert!((600..=1200).contains(&diff), "got {diff}s");
        }
    }

    #[test]
    fn test_random_stacks_after_last_scheduled() {
        let last = fixed_now() + Duration::hours(3);
        let at = parse_schedule_time("random:1m-2m", fixed_now(), Some(last)).unwrap();
        let diff = (at - last).num_seconds();
        assert!((60..=120).contains(&diff), "got {diff}s");
    }

    #[test]
    fn test_random_ignores_past_last_scheduled() {
        let last = fixed_now() - Duration::days(2);
        let at = parse_schedule_time("random:1m-2m", fixed_now(), Some(last)).unwrap();
        assert!(at > fixed_now());
    }

    #[test]
    fn test_random_bounds_rejected() {
        for bad in ["random:1s-10s", "random:1d-40d", "random:2h-1h", "random:1h", "random:x-y"] {
            let err = parse(bad).unwrap_err();
            assert!(matches!(err, SchedcastError::InvalidTime(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn test_garbage_is_invalid_time() {
        for bad in ["", "   ", "not a time at all", "whenever"] {
            assert!(matches!(parse(bad), Err(SchedcastError::InvalidTime(_))), "{bad}");
        }
    }

    #[test]
    fn test_schedule_time_resolve() {
        let at = fixed_now() + Duration::milliseconds(1500);
        assert_eq!(ScheduleTime::from(at).resolve(fixed_now(), None).unwrap(), at);

        let expr = ScheduleTime::from("5m");
        assert_eq!(
            expr.resolve(fixed_now(), None).unwrap(),
            fixed_now() + Duration::minutes(5)
        );
        assert!(!expr.is_random());
        assert!(ScheduleTime::from("random:1m-5m").is_random());
    }

    #[test]
    fn test_huge_durations_are_invalid_time() {
        for huge in ["200000 years", "100000000years"] {
            assert!(matches!(parse(huge), Err(SchedcastError::InvalidTime(_))), "{huge}");
        }
    }

    #[test]
    fn test_random_after_last_representable_time_is_invalid() {
        let last = DateTime::<Utc>::MAX_UTC - Duration::seconds(60);
        let result = parse_schedule_time("random:10m-20m", fixed_now(), Some(last));
        assert!(matches!(result, Err(SchedcastError::InvalidTime(_))));
    }
}
