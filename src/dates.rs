//! Date phrase resolution.
//!
//! Turns a natural-language or ISO date expression into an absolute
//! `DateTime<Utc>`. Ambiguous relative phrases ("friday", "next week")
//! resolve to the nearest future occurrence.

use crate::error::{CommandError, CommandResult};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Utc, Weekday};

/// Resolve a date phrase relative to the current time.
pub fn resolve(phrase: &str) -> CommandResult<DateTime<Utc>> {
    resolve_at(phrase, Utc::now())
}

/// Resolve a date phrase relative to an explicit base instant.
pub fn resolve_at(phrase: &str, now: DateTime<Utc>) -> CommandResult<DateTime<Utc>> {
    let raw = phrase.trim();
    if raw.is_empty() {
        return Err(CommandError::date_parse(phrase));
    }

    // Absolute formats first: RFC 3339, then the common SQL-ish layouts.
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap().and_utc());
    }

    let text = raw.to_lowercase();
    let text = text
        .strip_prefix("on ")
        .or_else(|| text.strip_prefix("by "))
        .unwrap_or(&text);

    match text {
        "now" | "today" => return Ok(now),
        "tomorrow" => return Ok(now + Duration::days(1)),
        "yesterday" => return Ok(now - Duration::days(1)),
        "next week" => return Ok(now + Duration::weeks(1)),
        "next month" => return Ok(now + Months::new(1)),
        "next year" => return Ok(now + Months::new(12)),
        _ => {}
    }

    if let Some(rest) = text.strip_prefix("in ") {
        if let Some(dt) = parse_offset(rest, now) {
            return Ok(dt);
        }
    }

    let weekday_text = text.strip_prefix("next ").unwrap_or(text);
    if let Some(weekday) = parse_weekday(weekday_text) {
        return Ok(next_occurrence(weekday, now));
    }

    Err(CommandError::date_parse(phrase))
}

/// Parse "N units" into an offset from `now`.
fn parse_offset(rest: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let mut parts = rest.split_whitespace();
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    match unit.trim_end_matches('s') {
        "minute" | "min" => Some(now + Duration::minutes(amount)),
        "hour" => Some(now + Duration::hours(amount)),
        "day" => Some(now + Duration::days(amount)),
        "week" => Some(now + Duration::weeks(amount)),
        "month" => Some(now + Months::new(u32::try_from(amount).ok()?)),
        _ => None,
    }
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Nearest strictly-future occurrence of the weekday, at the same clock time.
fn next_occurrence(weekday: Weekday, now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.weekday().num_days_from_monday() as i64;
    let target = weekday.num_days_from_monday() as i64;
    let mut ahead = (target - today).rem_euclid(7);
    if ahead == 0 {
        ahead = 7;
    }
    now + Duration::days(ahead)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn base() -> DateTime<Utc> {
        // A Wednesday.
        Utc.with_ymd_and_hms(2024, 12, 18, 10, 30, 0).unwrap()
    }

    #[test]
    fn parses_iso_formats() {
        let dt = resolve_at("2025-01-05 09:00:00", base()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 5, 9, 0, 0).unwrap());

        let dt = resolve_at("2025-01-05", base()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap());

        let dt = resolve_at("2025-01-05T09:00:00Z", base()).unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2025, 1, 5, 9, 0, 0).unwrap());
    }

    #[test]
    fn tomorrow_is_strictly_future() {
        let dt = resolve_at("tomorrow", base()).unwrap();
        assert_eq!(dt, base() + Duration::days(1));
        assert!(dt > base());
    }

    #[test]
    fn relative_offsets() {
        assert_eq!(
            resolve_at("in 3 days", base()).unwrap(),
            base() + Duration::days(3)
        );
        assert_eq!(
            resolve_at("in 2 weeks", base()).unwrap(),
            base() + Duration::weeks(2)
        );
        assert_eq!(
            resolve_at("in 45 minutes", base()).unwrap(),
            base() + Duration::minutes(45)
        );
    }

    #[test]
    fn weekday_resolves_to_nearest_future() {
        // Base is a Wednesday; "friday" is two days out.
        let dt = resolve_at("friday", base()).unwrap();
        assert_eq!(dt, base() + Duration::days(2));

        // Same weekday means a full week ahead, never today.
        let dt = resolve_at("wednesday", base()).unwrap();
        assert_eq!(dt, base() + Duration::days(7));

        let dt = resolve_at("next monday", base()).unwrap();
        assert_eq!(dt, base() + Duration::days(5));
    }

    #[test]
    fn next_week_and_month() {
        assert_eq!(
            resolve_at("next week", base()).unwrap(),
            base() + Duration::weeks(1)
        );
        assert_eq!(
            resolve_at("next month", base()).unwrap(),
            base() + Months::new(1)
        );
    }

    #[test]
    fn unresolvable_phrase_is_an_error() {
        let err = resolve_at("whenever you like", base()).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DateParseError);
        assert!(resolve_at("", base()).is_err());
        assert!(resolve_at("in banana days", base()).is_err());
    }
}
