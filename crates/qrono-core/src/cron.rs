//! Expression parser and next-fire calculator (C1).
//!
//! Accepts a single `expr` string in one of five shapes, classified by
//! prefix: `@every`, `@after`, `@at`, a named shortcut (`@daily`, ...), or
//! standard 5-field cron. See spec.md §4.1 for the full grammar and the
//! explicitly unsupported cron features (`?`, `L`, `#`, `W`, seconds,
//! year).
//!
//! `next()` and `is_one_shot()` are pure functions of `(from, expr)` —
//! there is no hidden clock lookup here. Callers (the dispatch/batcher/
//! engine code) are responsible for picking the right reference instant
//! (`last_run_at` if known, else `created_at`, per spec.md §4.1).

use crate::error::ExprError;
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// A parsed expression, ready to compute fire times against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `@every <N> <unit>` — recurring fixed interval.
    Every(Interval),
    /// `@after <N> <unit>` — one-shot delay.
    After(Interval),
    /// `@at <timestamp>` — one-shot absolute instant.
    At(DateTime<Utc>),
    /// Standard 5-field cron.
    Cron(CronSchedule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub amount: i64,
    pub unit: Unit,
}

impl Interval {
    fn to_duration(self) -> Option<Duration> {
        match self.unit {
            Unit::Minute => Duration::try_minutes(self.amount),
            Unit::Hour => Duration::try_hours(self.amount),
            Unit::Day => Duration::try_days(self.amount),
            Unit::Week => Duration::try_weeks(self.amount),
            // Months/years are not fixed-length; approximate via calendar
            // arithmetic on the reference instant instead of a Duration.
            Unit::Month | Unit::Year => None,
        }
    }

    fn add_to(self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self.unit {
            Unit::Month => add_months(from, self.amount),
            Unit::Year => add_months(from, self.amount * 12),
            _ => from + self.to_duration().expect("non-calendar unit has a fixed Duration"),
        }
    }
}

fn add_months(from: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let total = from.year() as i64 * 12 + (from.month() as i64 - 1) + months;
    let year = total.div_euclid(12) as i32;
    let month = (total.rem_euclid(12) + 1) as u32;
    // Clamp the day-of-month into the target month (e.g. Jan 31 + 1 month -> Feb 28/29).
    let last_day = days_in_month(year, month);
    let day = from.day().min(last_day);
    Utc.with_ymd_and_hms(
        year,
        month,
        day,
        from.hour(),
        from.minute(),
        from.second(),
    )
    .single()
    .expect("clamped day is always valid for its month")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = Utc.with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0).single().unwrap();
    let first_of_this = Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single().unwrap();
    (first_of_next - first_of_this).num_days() as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn parse(s: &str) -> Result<Unit, ExprError> {
        let normalized = s.trim().to_ascii_lowercase();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "minute" | "min" => Ok(Unit::Minute),
            "hour" => Ok(Unit::Hour),
            "day" => Ok(Unit::Day),
            "week" => Ok(Unit::Week),
            "month" => Ok(Unit::Month),
            "year" => Ok(Unit::Year),
            _ => Err(ExprError::UnknownUnit(s.to_string())),
        }
    }
}

/// A 64-bit-per-field bitset cron schedule (minute, hour, day-of-month,
/// month, day-of-week). Day-of-week 0 and 7 both mean Sunday internally
/// normalized to 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minute: u64,  // bits 0..=59
    hour: u32,    // bits 0..=23
    dom: u32,     // bits 1..=31
    month: u16,   // bits 1..=12
    dow: u8,      // bits 0..=6
    dom_restricted: bool,
    dow_restricted: bool,
}

/// Classify and parse `expr` into a structured [`Expr`].
pub fn parse(expr: &str) -> Result<Expr, ExprError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(ExprError::Empty);
    }

    if let Some(rest) = trimmed.strip_prefix("@every") {
        return Ok(Expr::Every(parse_interval(rest)?));
    }
    if let Some(rest) = trimmed.strip_prefix("@after") {
        return Ok(Expr::After(parse_interval(rest)?));
    }
    if let Some(rest) = trimmed.strip_prefix("@at") {
        return Ok(Expr::At(parse_at(rest.trim())?));
    }
    if let Some(interval) = parse_named_shortcut(trimmed) {
        return Ok(Expr::Every(interval));
    }
    if trimmed.starts_with('@') {
        return Err(ExprError::UnknownPrefix(trimmed.to_string()));
    }

    Ok(Expr::Cron(parse_cron(trimmed)?))
}

/// `true` iff `expr`'s prefix is `@at` or `@after`.
pub fn is_one_shot(expr: &str) -> bool {
    let trimmed = expr.trim();
    trimmed.starts_with("@after") || trimmed.starts_with("@at")
}

/// Validate `expr` without computing a fire time. Used by create/update to
/// reject bad input synchronously (spec.md §4.1/§7).
pub fn validate(expr: &str) -> Result<(), ExprError> {
    parse(expr).map(|_| ())
}

/// Smallest instant strictly greater than `from` that matches `expr`.
///
/// For one-shot expressions (`@at`, `@after`) the returned instant may be
/// at or before `from` if it has already elapsed — see spec.md §4.1. For
/// `@every` and standard cron, the result is always strictly after `from`.
pub fn next(from: DateTime<Utc>, expr: &Expr) -> DateTime<Utc> {
    match expr {
        Expr::Every(interval) => interval.add_to(from),
        Expr::After(interval) => interval.add_to(from),
        Expr::At(at) => *at,
        Expr::Cron(schedule) => schedule.next_after(from),
    }
}

fn parse_interval(rest: &str) -> Result<Interval, ExprError> {
    let rest = rest.trim();
    let mut parts = rest.split_whitespace();
    let amount_str = parts.next().ok_or_else(|| ExprError::BadInterval(rest.to_string()))?;
    let unit_str = parts.next().ok_or_else(|| ExprError::BadInterval(rest.to_string()))?;
    if parts.next().is_some() {
        return Err(ExprError::BadInterval(rest.to_string()));
    }
    let amount: i64 = amount_str
        .parse()
        .map_err(|_| ExprError::BadInterval(rest.to_string()))?;
    if amount <= 0 {
        return Err(ExprError::BadInterval(rest.to_string()));
    }
    let unit = Unit::parse(unit_str)?;
    Ok(Interval { amount, unit })
}

fn parse_at(rest: &str) -> Result<DateTime<Utc>, ExprError> {
    if rest.is_empty() {
        return Err(ExprError::BadTimestamp(rest.to_string()));
    }
    match DateTime::parse_from_rfc3339(rest) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => {
            // Distinguish "not a timestamp at all" from "timestamp but naive"
            // so validate() can report the more useful category.
            if chrono::NaiveDateTime::parse_from_str(rest, "%Y-%m-%dT%H:%M:%S").is_ok()
                || chrono::NaiveDateTime::parse_from_str(rest, "%Y-%m-%d %H:%M:%S").is_ok()
            {
                Err(ExprError::NaiveTimestamp(rest.to_string()))
            } else {
                Err(ExprError::BadTimestamp(rest.to_string()))
            }
        }
    }
}

fn parse_named_shortcut(expr: &str) -> Option<Interval> {
    let unit = match expr {
        "@annually" | "@yearly" => Unit::Year,
        "@monthly" => Unit::Month,
        "@weekly" => Unit::Week,
        "@daily" => Unit::Day,
        "@hourly" => Unit::Hour,
        "@minutely" => Unit::Minute,
        _ => return None,
    };
    Some(Interval { amount: 1, unit })
}

// ---------------------------------------------------------------------
// Standard 5-field cron parsing
// ---------------------------------------------------------------------

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DOW_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

fn parse_cron(expr: &str) -> Result<CronSchedule, ExprError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ExprError::WrongFieldCount(fields.len()));
    }

    reject_unsupported("minute", fields[0])?;
    reject_unsupported("hour", fields[1])?;
    reject_unsupported("day-of-month", fields[2])?;
    reject_unsupported("month", fields[3])?;
    reject_unsupported("day-of-week", fields[4])?;

    let minute = parse_field("minute", fields[0], 0, 59, None)?;
    let hour = parse_field("hour", fields[1], 0, 23, None)?;
    let dom = parse_field("day-of-month", fields[2], 1, 31, None)?;
    let month = parse_field("month", fields[3], 1, 12, Some(&MONTH_NAMES))?;
    let dow = parse_field("day-of-week", fields[4], 0, 7, Some(&DOW_NAMES))?;

    let dom_restricted = fields[2] != "*";
    let dow_restricted = fields[4] != "*";

    // Normalize bit 7 (Sunday, alternate notation) onto bit 0.
    let mut dow_bits = dow as u8;
    if dow_bits & (1 << 7) != 0 {
        dow_bits |= 1;
        dow_bits &= !(1 << 7);
    }

    Ok(CronSchedule {
        minute,
        hour: hour as u32,
        dom: dom as u32,
        month: month as u16,
        dow: dow_bits,
        dom_restricted,
        dow_restricted,
    })
}

fn reject_unsupported(field: &'static str, token: &str) -> Result<(), ExprError> {
    for bad in ['?', 'L', 'l', 'W', 'w', '#'] {
        if token.contains(bad) {
            return Err(ExprError::UnsupportedSyntax {
                field,
                token: token.to_string(),
            });
        }
    }
    Ok(())
}

/// Parse one cron field into a bitmask covering `[lo, hi]`, supporting
/// `*`, `*/n`, `a`, `a-b`, `a-b/n`, and comma-separated lists thereof.
fn parse_field(
    field: &'static str,
    token: &str,
    lo: u32,
    hi: u32,
    names: Option<&[&str; 12]>,
) -> Result<u64, ExprError> {
    let _ = names; // month/dow name resolution happens in resolve_name below generically
    let mut mask: u64 = 0;
    for part in token.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((r, s)) => {
                // The dialect only supports steps on a bare wildcard
                // (`*/n`); a step on an explicit range (`a-b/n`) is not in
                // the supported grammar (spec.md §4.1) even though plain
                // Vixie cron allows it.
                if r != "*" {
                    return Err(ExprError::UnsupportedSyntax {
                        field,
                        token: part.to_string(),
                    });
                }
                let step: u32 = s
                    .parse()
                    .map_err(|_| ExprError::Malformed { field, token: part.to_string() })?;
                if step == 0 {
                    return Err(ExprError::OutOfRange { field, token: part.to_string() });
                }
                (r, step)
            }
            None => (part, 1),
        };

        let (start, end) = if range_part == "*" {
            (lo, hi)
        } else if let Some((a, b)) = range_part.split_once('-') {
            (
                resolve_value(field, a, lo, hi)?,
                resolve_value(field, b, lo, hi)?,
            )
        } else {
            let v = resolve_value(field, range_part, lo, hi)?;
            (v, v)
        };

        if start > hi || end > hi || start < lo {
            return Err(ExprError::OutOfRange { field, token: part.to_string() });
        }

        let mut v = start;
        while v <= end {
            mask |= 1u64 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn resolve_value(field: &'static str, token: &str, lo: u32, hi: u32) -> Result<u32, ExprError> {
    let upper = token.to_ascii_uppercase();
    let resolved = if field == "month" {
        MONTH_NAMES
            .iter()
            .position(|n| *n == upper)
            .map(|i| (i + 1) as u32)
    } else if field == "day-of-week" {
        DOW_NAMES.iter().position(|n| *n == upper).map(|i| i as u32)
    } else {
        None
    };

    let value = match resolved {
        Some(v) => v,
        None => token
            .parse::<u32>()
            .map_err(|_| ExprError::Malformed { field, token: token.to_string() })?,
    };

    if value < lo || value > hi {
        return Err(ExprError::OutOfRange { field, token: token.to_string() });
    }
    Ok(value)
}

impl CronSchedule {
    fn matches_month(&self, month: u32) -> bool {
        self.month & (1 << month) != 0
    }

    fn matches_hour(&self, hour: u32) -> bool {
        self.hour & (1 << hour) != 0
    }

    fn matches_minute(&self, minute: u32) -> bool {
        self.minute & (1 << minute) != 0
    }

    fn matches_dom(&self, dom: u32) -> bool {
        self.dom & (1 << dom) != 0
    }

    fn matches_dow(&self, dow: u32) -> bool {
        // dow here is 0..=6 (Sunday..Saturday), matching chrono's
        // `num_days_from_sunday`.
        self.dow & (1 << dow) != 0
    }

    fn matches_day(&self, date: DateTime<Utc>) -> bool {
        let dom_ok = self.matches_dom(date.day());
        let dow_ok = self.matches_dow(date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            // Vixie-cron semantics: if both fields are restricted, a day
            // matches if *either* matches; if only one is restricted, only
            // that one is consulted.
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }

    /// Smallest instant strictly after `from` matching this schedule.
    fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        // Start at the next whole minute.
        let mut candidate = (from + Duration::try_minutes(1).unwrap())
            .with_second(0)
            .and_then(|d| d.with_nanosecond(0))
            .expect("zeroing seconds/nanos on a valid instant stays valid");

        // Bounded by a generous 8-year horizon; any schedule produced by
        // `parse_cron` has at least one matching minute within that span.
        let horizon = from + Duration::try_days(8 * 366).unwrap();

        loop {
            if candidate > horizon {
                unreachable!("cron schedule with no matching instant within 8 years");
            }

            if !self.matches_month(candidate.month()) {
                candidate = first_of_next_month(candidate);
                continue;
            }
            if !self.matches_day(candidate) {
                candidate = (candidate + Duration::try_days(1).unwrap())
                    .with_hour(0)
                    .and_then(|d| d.with_minute(0))
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .expect("midnight of the next day is always representable");
                continue;
            }
            if !self.matches_hour(candidate.hour()) {
                candidate = (candidate + Duration::try_hours(1).unwrap())
                    .with_minute(0)
                    .and_then(|d| d.with_second(0))
                    .and_then(|d| d.with_nanosecond(0))
                    .expect("top of the next hour is always representable");
                continue;
            }
            if !self.matches_minute(candidate.minute()) {
                candidate = candidate + Duration::try_minutes(1).unwrap();
                continue;
            }
            return candidate;
        }
    }
}

fn first_of_next_month(from: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if from.month() == 12 {
        (from.year() + 1, 1)
    } else {
        (from.year(), from.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of any month is always representable")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn every_is_recurring_and_not_one_shot() {
        assert!(!is_one_shot("@every 1 hour"));
        let e = parse("@every 1 hour").unwrap();
        let from = dt("2024-01-01T00:00:00Z");
        assert_eq!(next(from, &e), dt("2024-01-01T01:00:00Z"));
    }

    #[test]
    fn after_is_one_shot() {
        assert!(is_one_shot("@after 3 week"));
        let e = parse("@after 3 week").unwrap();
        let from = dt("2024-01-01T00:00:00Z");
        assert_eq!(next(from, &e), dt("2024-01-22T00:00:00Z"));
    }

    #[test]
    fn at_is_one_shot_and_absolute() {
        assert!(is_one_shot("@at 2022-08-30T11:14:22.607Z"));
        let e = parse("@at 2022-08-30T11:14:22.607Z").unwrap();
        let from = dt("2024-01-01T00:00:00Z");
        assert_eq!(next(from, &e), dt("2022-08-30T11:14:22.607Z"));
    }

    #[test]
    fn named_shortcuts_map_to_every() {
        for (name, unit) in [
            ("@annually", Unit::Year),
            ("@yearly", Unit::Year),
            ("@monthly", Unit::Month),
            ("@weekly", Unit::Week),
            ("@daily", Unit::Day),
            ("@hourly", Unit::Hour),
            ("@minutely", Unit::Minute),
        ] {
            assert!(!is_one_shot(name));
            match parse(name).unwrap() {
                Expr::Every(i) => assert_eq!(i, Interval { amount: 1, unit }),
                other => panic!("expected Every, got {other:?}"),
            }
        }
    }

    #[test]
    fn month_rollover_clamps_day() {
        let e = parse("@every 1 month").unwrap();
        let from = dt("2024-01-31T00:00:00Z");
        assert_eq!(next(from, &e), dt("2024-02-29T00:00:00Z")); // 2024 is a leap year
    }

    #[test]
    fn every_minute_wildcard() {
        let e = parse("* * * * *").unwrap();
        let from = dt("2024-01-01T00:00:30Z");
        assert_eq!(next(from, &e), dt("2024-01-01T00:01:00Z"));
    }

    #[test]
    fn step_every_five_minutes() {
        let e = parse("*/5 * * * *").unwrap();
        let from = dt("2024-01-01T00:02:00Z");
        assert_eq!(next(from, &e), dt("2024-01-01T00:05:00Z"));
    }

    #[test]
    fn list_of_days_and_month_and_weekday() {
        // "0 0 1,15 * 3" -> midnight on the 1st or 15th, or any Wednesday.
        let e = parse("0 0 1,15 * 3").unwrap();
        let from = dt("2024-01-01T00:00:01Z");
        let n = next(from, &e);
        assert_eq!(n.hour(), 0);
        assert_eq!(n.minute(), 0);
        assert!(n.day() == 1 || n.day() == 15 || n.weekday().num_days_from_sunday() == 3);
    }

    #[test]
    fn month_and_weekday_names() {
        // "5 0 * AUG MON" -> 00:05 every Monday in August.
        let e = parse("5 0 * AUG MON").unwrap();
        let from = dt("2024-01-01T00:00:00Z");
        let n = next(from, &e);
        assert_eq!(n.month(), 8);
        assert_eq!(n.weekday().num_days_from_sunday(), 1);
        assert_eq!(n.hour(), 0);
        assert_eq!(n.minute(), 5);
    }

    #[test]
    fn dom_only_first_of_month() {
        let e = parse("15 14 1 * *").unwrap();
        let from = dt("2024-01-01T14:15:01Z");
        let n = next(from, &e);
        assert_eq!(n.day(), 1);
        assert_eq!(n.hour(), 14);
        assert_eq!(n.minute(), 15);
        assert_eq!(n.month(), 2);
    }

    #[test]
    fn dow_range_and_month_range() {
        // "* * * APR-AUG SUN" -> every minute on Sundays, April through August.
        let e = parse("* * * APR-AUG SUN").unwrap();
        let from = dt("2024-01-01T00:00:00Z");
        let n = next(from, &e);
        assert!((4..=8).contains(&n.month()));
        assert_eq!(n.weekday().num_days_from_sunday(), 0);
    }

    #[test]
    fn rejects_unsupported_syntax() {
        // Steps are only supported on a bare wildcard (`*/n`); a step on an
        // explicit range (`a-b/n`) is not part of the dialect even though
        // plain Vixie cron allows it.
        assert!(matches!(
            validate("23 0-20/2 * * *"),
            Err(ExprError::UnsupportedSyntax { .. })
        ));
        assert!(matches!(validate("15 10 ? * 6#3"), Err(ExprError::UnsupportedSyntax { .. })));
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(matches!(
            validate("* * * * * *"),
            Err(ExprError::WrongFieldCount(6))
        ));
    }

    #[test]
    fn accepts_valid_expressions() {
        for expr in [
            "@every 1 hour",
            "@after 3 week",
            "@at 2022-08-30T11:14:22.607Z",
            "0 0 1,15 JAN-FEB SUN",
        ] {
            assert!(validate(expr).is_ok(), "expected {expr:?} to validate");
        }
    }

    #[test]
    fn rejects_invalid_expressions() {
        assert!(validate("@after ok week").is_err());
        assert!(validate("@at not-a-timestamp").is_err());
    }

    #[test]
    fn rejects_naive_at_timestamp() {
        assert!(matches!(
            validate("@at 2022-08-30T11:14:22"),
            Err(ExprError::NaiveTimestamp(_))
        ));
    }

    #[test]
    fn recurring_next_is_monotonic() {
        let e = parse("*/7 * * * *").unwrap();
        let from = dt("2024-03-01T00:00:00Z");
        let n1 = next(from, &e);
        let n2 = next(n1, &e);
        assert!(n1 > from);
        assert!(n2 > n1);
    }
}
