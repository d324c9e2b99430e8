//! Temporal Resolver: parses a single natural-language time expression by
//! trying, in order, relative / absolute / recurring / duration / range
//! parsers, plus free-text candidate extraction.
//!
//! Grounded in `original_source/src/processing/temporal_resolver.py`. The
//! Python original uses `pytz`; this port uses `chrono`/`chrono-tz` for the
//! same semantics, with unrecognized zone names falling back to UTC.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use regex::Regex;

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 2100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    Relative,
    Absolute,
    Recurring,
    Duration,
    Range,
}

#[derive(Debug, Clone)]
pub struct TemporalResult {
    pub kind: ExpressionKind,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub zone: String,
    pub confidence: f64,
    pub recurrence: Option<String>,
}

fn resolve_zone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

fn valid_year(year: i32) -> bool {
    (MIN_YEAR..=MAX_YEAR).contains(&year)
}

fn to_utc(zone: Tz, naive: chrono::NaiveDateTime) -> Option<DateTime<Utc>> {
    if !valid_year(naive.year()) {
        return None;
    }
    zone.from_local_datetime(&naive).single().map(|dt| dt.with_timezone(&Utc))
}

/// Add calendar months with day-clamping for month-end overflow
/// (Jan 31 + 1 month ⇒ Feb 28/29).
fn add_months(date: NaiveDate, months: i32) -> NaiveDate {
    let total = date.year() * 12 + (date.month() as i32 - 1) + months;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let last_day = last_day_of_month(year, month);
    let day = date.day().min(last_day);
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let next_month_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap();
    (next_month_first - Duration::days(1)).day()
}

/// Month and year durations are approximated as 30 and 365 days
/// respectively when computing elapsed deltas.
fn unit_duration(unit: &str, n: i64) -> Duration {
    match unit {
        "second" | "seconds" => Duration::seconds(n),
        "minute" | "minutes" => Duration::minutes(n),
        "hour" | "hours" => Duration::hours(n),
        "day" | "days" => Duration::days(n),
        "week" | "weeks" => Duration::weeks(n),
        "month" | "months" => Duration::days(n * 30),
        "year" | "years" => Duration::days(n * 365),
        _ => Duration::zero(),
    }
}

fn two_digit_year(y: i32) -> i32 {
    if y < 50 {
        2000 + y
    } else {
        1900 + y
    }
}

const WEEKDAYS: [&str; 7] = ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday"];

fn weekday_index(name: &str) -> Option<u32> {
    WEEKDAYS.iter().position(|w| *w == name).map(|i| i as u32)
}

fn next_weekday(reference: NaiveDate, target: u32, strictly_future: bool) -> NaiveDate {
    let current = reference.weekday().num_days_from_monday();
    let mut delta = (target as i64 - current as i64).rem_euclid(7);
    if delta == 0 && strictly_future {
        delta = 7;
    }
    reference + Duration::days(delta)
}

static RELATIVE_SIMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(today|tomorrow|yesterday|tonight)$").unwrap());
static RELATIVE_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(next|last|this)\s+(week|month|year)$").unwrap()
});
static RELATIVE_IN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:in|after)\s+(\d+)\s+(second|minute|hour|day|week|month|year)s?$").unwrap()
});
static RELATIVE_AGO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+ago$").unwrap()
});
static RELATIVE_FROM_NOW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+)\s+(second|minute|hour|day|week|month|year)s?\s+from\s+now$").unwrap()
});
static RELATIVE_WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:(next|last|this)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)$").unwrap()
});

fn parse_relative(text: &str, reference: DateTime<Tz>, zone: Tz) -> Option<TemporalResult> {
    let trimmed = text.trim();

    if let Some(caps) = RELATIVE_SIMPLE_RE.captures(trimmed) {
        let word = caps[1].to_lowercase();
        let (date, time) = match word.as_str() {
            "today" => (reference.date_naive(), reference.time()),
            "tomorrow" => (reference.date_naive() + Duration::days(1), reference.time()),
            "yesterday" => (reference.date_naive() - Duration::days(1), reference.time()),
            "tonight" => (reference.date_naive(), NaiveTime::from_hms_opt(20, 0, 0).unwrap()),
            _ => unreachable!(),
        };
        let naive = date.and_time(time);
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Relative, start, 0.9));
    }

    if let Some(caps) = RELATIVE_UNIT_RE.captures(trimmed) {
        let direction = caps[1].to_lowercase();
        let unit = caps[2].to_lowercase();
        let sign: i64 = match direction.as_str() {
            "next" => 1,
            "last" => -1,
            _ => 0,
        };
        let naive = match unit.as_str() {
            "week" => reference.date_naive() + Duration::weeks(sign),
            "month" => add_months(reference.date_naive(), sign as i32),
            "year" => add_months(reference.date_naive(), sign as i32 * 12),
            _ => return None,
        }
        .and_time(reference.time());
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Relative, start, 0.8));
    }

    if let Some(caps) = RELATIVE_IN_RE.captures(trimmed) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let start = reference.with_timezone(&Utc) + unit_duration(&unit, n);
        return Some(result(ExpressionKind::Relative, start, 0.85));
    }
    if let Some(caps) = RELATIVE_AGO_RE.captures(trimmed) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let start = reference.with_timezone(&Utc) - unit_duration(&unit, n);
        return Some(result(ExpressionKind::Relative, start, 0.85));
    }
    if let Some(caps) = RELATIVE_FROM_NOW_RE.captures(trimmed) {
        let n: i64 = caps[1].parse().ok()?;
        let unit = caps[2].to_lowercase();
        let start = reference.with_timezone(&Utc) + unit_duration(&unit, n);
        return Some(result(ExpressionKind::Relative, start, 0.85));
    }

    if let Some(caps) = RELATIVE_WEEKDAY_RE.captures(trimmed) {
        let direction = caps.get(1).map(|m| m.as_str().to_lowercase());
        let target = weekday_index(&caps[2].to_lowercase())?;
        let base_date = reference.date_naive();
        let date = match direction.as_deref() {
            Some("last") => {
                let current = base_date.weekday().num_days_from_monday();
                let delta = (current as i64 - target as i64).rem_euclid(7);
                let delta = if delta == 0 { 7 } else { delta };
                base_date - Duration::days(delta)
            }
            Some("this") => next_weekday(base_date, target, false),
            _ => next_weekday(base_date, target, true),
        };
        let naive = date.and_time(reference.time());
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Relative, start, 0.8));
    }

    None
}

static TIME_OF_DAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*(am|pm)?$").unwrap()
});
static MDY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2,4})$").unwrap());
static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{2})-(\d{2})$").unwrap());
static MONTH_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(january|february|march|april|may|june|july|august|september|october|november|december)\s+(\d{1,2})(?:,?\s*(\d{2,4}))?$").unwrap()
});

const MONTHS: [&str; 12] = [
    "january", "february", "march", "april", "may", "june", "july", "august", "september",
    "october", "november", "december",
];

fn parse_time_of_day(hour_str: &str, minute_str: Option<&str>, meridiem: Option<&str>) -> Option<NaiveTime> {
    let mut hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.map(str::parse).transpose().ok()?.unwrap_or(0);
    if let Some(m) = meridiem {
        let is_pm = m.eq_ignore_ascii_case("pm");
        hour %= 12;
        if is_pm {
            hour += 12;
        }
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn parse_absolute(text: &str, reference: DateTime<Tz>, zone: Tz) -> Option<TemporalResult> {
    let trimmed = text.trim();

    if let Some(caps) = TIME_OF_DAY_RE.captures(trimmed) {
        let time = parse_time_of_day(&caps[1], caps.get(2).map(|m| m.as_str()), caps.get(3).map(|m| m.as_str()))?;
        let mut date = reference.date_naive();
        if time < reference.time() {
            date += Duration::days(1);
        }
        let naive = date.and_time(time);
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Absolute, start, 0.7));
    }

    if let Some(caps) = MDY_RE.captures(trimmed) {
        let month: u32 = caps[1].parse().ok()?;
        let day: u32 = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        if year < 100 {
            year = two_digit_year(year);
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let naive = date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Absolute, start, 0.95));
    }

    if let Some(caps) = ISO_DATE_RE.captures(trimmed) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let naive = date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Absolute, start, 0.95));
    }

    if let Some(caps) = MONTH_NAME_RE.captures(trimmed) {
        let month_name = caps[1].to_lowercase();
        let month = MONTHS.iter().position(|m| *m == month_name)? as u32 + 1;
        let day: u32 = caps[2].parse().ok()?;
        let year = match caps.get(3) {
            Some(y) => {
                let y: i32 = y.as_str().parse().ok()?;
                if y < 100 {
                    two_digit_year(y)
                } else {
                    y
                }
            }
            None => reference.year(),
        };
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let naive = date.and_time(NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        return to_utc(zone, naive).map(|start| result(ExpressionKind::Absolute, start, 0.9));
    }

    None
}

static RECURRING_SIMPLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(daily|weekly|monthly|yearly)$").unwrap());
static RECURRING_WEEKDAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^every\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)$").unwrap()
});

fn parse_recurring(text: &str, reference: DateTime<Tz>, zone: Tz) -> Option<TemporalResult> {
    let trimmed = text.trim();

    if let Some(caps) = RECURRING_SIMPLE_RE.captures(trimmed) {
        let pattern = caps[1].to_lowercase();
        let naive = reference.date_naive().and_time(reference.time());
        let start = to_utc(zone, naive)?;
        let mut r = result(ExpressionKind::Recurring, start, 0.8);
        r.recurrence = Some(pattern);
        return Some(r);
    }

    if let Some(caps) = RECURRING_WEEKDAY_RE.captures(trimmed) {
        let weekday = caps[1].to_lowercase();
        let target = weekday_index(&weekday)?;
        let date = next_weekday(reference.date_naive(), target, true);
        let naive = date.and_time(reference.time());
        let start = to_utc(zone, naive)?;
        let mut r = result(ExpressionKind::Recurring, start, 0.8);
        r.recurrence = Some(format!("weekly_{weekday}"));
        return Some(r);
    }

    None
}

/// Advances a recurrence pattern's anchor date past `after`, returning the
/// next occurrence on or after that instant.
pub fn get_next_occurrence(pattern: &str, anchor: DateTime<Utc>, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let step = match pattern {
        "daily" => Duration::days(1),
        "weekly" => Duration::weeks(1),
        "monthly" => Duration::days(30),
        "yearly" => Duration::days(365),
        p if p.starts_with("weekly_") => Duration::weeks(1),
        _ => return None,
    };
    if step.is_zero() {
        return None;
    }
    let mut occurrence = anchor;
    while occurrence < after {
        occurrence += step;
    }
    Some(occurrence)
}

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^for\s+(\d+)\s+(second|minute|hour|day|week|month|year)s?$").unwrap()
});

fn parse_duration(text: &str, reference: DateTime<Tz>, zone: Tz) -> Option<TemporalResult> {
    let caps = DURATION_RE.captures(text.trim())?;
    let n: i64 = caps[1].parse().ok()?;
    let unit = caps[2].to_lowercase();
    let duration = unit_duration(&unit, n);
    let naive = reference.date_naive().and_time(reference.time());
    let start = to_utc(zone, naive)?;
    let mut r = result(ExpressionKind::Duration, start, 0.75);
    r.end = Some(start + duration);
    r.duration = Some(duration);
    Some(r)
}

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:from|between)\s+(.+?)\s+(?:to|and)\s+(.+)$").unwrap()
});

/// `from|between X to|and Y`, handling bare times that share an am/pm
/// suffix and rolling an end time earlier than the start to the next day.
fn parse_range(text: &str, reference: DateTime<Tz>, zone: Tz) -> Option<TemporalResult> {
    let caps = RANGE_RE.captures(text.trim())?;
    let left = caps[1].trim();
    let mut right = caps[2].trim().to_string();

    if TIME_OF_DAY_RE.is_match(left) && TIME_OF_DAY_RE.is_match(&right) {
        let left_caps = TIME_OF_DAY_RE.captures(left)?;
        let right_has_meridiem = TIME_OF_DAY_RE.captures(&right)?.get(3).is_some();
        if !right_has_meridiem {
            if let Some(m) = left_caps.get(3) {
                right = format!("{right} {}", m.as_str());
            }
        }
    }

    let start_result = parse_absolute(left, reference, zone)
        .or_else(|| parse_relative(left, reference, zone))?;
    let mut end_result = parse_absolute(&right, reference, zone)
        .or_else(|| parse_relative(&right, reference, zone))?;

    if end_result.start < start_result.start {
        end_result.start += Duration::days(1);
    }

    let mut r = result(ExpressionKind::Range, start_result.start, 0.75);
    r.end = Some(end_result.start);
    r.duration = Some(end_result.start - start_result.start);
    Some(r)
}

fn result(kind: ExpressionKind, start: DateTime<Utc>, confidence: f64) -> TemporalResult {
    TemporalResult {
        kind,
        start,
        end: None,
        duration: None,
        zone: "UTC".to_string(),
        confidence,
        recurrence: None,
    }
}

/// Tries relative, absolute, recurring, duration, then range parsers in
/// order; the first to match wins.
pub fn parse_expression(text: &str, reference: DateTime<Utc>, zone_name: &str) -> Option<TemporalResult> {
    let zone = resolve_zone(zone_name);
    let reference_in_zone = reference.with_timezone(&zone);

    let mut out = parse_relative(text, reference_in_zone, zone)
        .or_else(|| parse_absolute(text, reference_in_zone, zone))
        .or_else(|| parse_recurring(text, reference_in_zone, zone))
        .or_else(|| parse_duration(text, reference_in_zone, zone))
        .or_else(|| parse_range(text, reference_in_zone, zone))?;
    out.zone = zone_name.to_string();
    Some(out)
}

const CANDIDATE_PATTERN_SOURCES: &[&str] = &[
    r"(?i)\btoday\b",
    r"(?i)\btomorrow\b",
    r"(?i)\byesterday\b",
    r"(?i)\btonight\b",
    r"(?i)\b(?:next|last|this)\s+(?:week|month|year|monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    r"(?i)\b(?:in|after)\s+\d+\s+\w+\b",
    r"(?i)\b\d+\s+\w+\s+ago\b",
    r"(?i)\b\d+\s+\w+\s+from\s+now\b",
    r"(?i)\bevery\s+\w+\b",
    r"(?i)\b(?:daily|weekly|monthly|yearly)\b",
    r"(?i)\bfor\s+\d+\s+\w+\b",
    r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
    r"\b\d{4}-\d{2}-\d{2}\b",
    r"(?i)\b(?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2}(?:,?\s*\d{2,4})?\b",
    r"(?i)\b(?:from|between)\s+.+?\s+(?:to|and)\s+.+\b",
];

static CANDIDATE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    CANDIDATE_PATTERN_SOURCES
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

/// Scans free text with the union of expression patterns; overlapping
/// candidates are resolved by preferring the longer match (ties broken by
/// earlier start).
pub fn extract_candidates(text: &str) -> Vec<String> {
    let mut spans: Vec<(usize, usize)> = Vec::new();
    for re in CANDIDATE_PATTERNS.iter() {
        for m in re.find_iter(text) {
            spans.push((m.start(), m.end()));
        }
    }
    spans.sort_by(|a, b| a.0.cmp(&b.0).then((b.1 - b.0).cmp(&(a.1 - a.0))));

    let mut kept: Vec<(usize, usize)> = Vec::new();
    for span in spans {
        let overlaps = kept.iter().position(|k| span.0 < k.1 && span.1 > k.0);
        match overlaps {
            Some(idx) => {
                let existing_len = kept[idx].1 - kept[idx].0;
                let candidate_len = span.1 - span.0;
                if candidate_len > existing_len {
                    kept[idx] = span;
                }
            }
            None => kept.push(span),
        }
    }
    kept.sort_by_key(|s| s.0);
    kept.into_iter().map(|(s, e)| text[s..e].to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ref_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 27, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_tomorrow_as_relative() {
        let result = parse_expression("tomorrow", ref_time(), "UTC").unwrap();
        assert_eq!(result.kind, ExpressionKind::Relative);
        assert_eq!(result.start.date_naive(), ref_time().date_naive() + Duration::days(1));
    }

    #[test]
    fn parses_iso_date_as_absolute() {
        let result = parse_expression("2024-01-05", ref_time(), "UTC").unwrap();
        assert_eq!(result.kind, ExpressionKind::Absolute);
        assert_eq!(result.start.year(), 2024);
    }

    #[test]
    fn month_end_overflow_clamps_day() {
        let jan31 = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let added = add_months(jan31, 1);
        assert_eq!(added, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn two_digit_year_mapping() {
        assert_eq!(two_digit_year(24), 2024);
        assert_eq!(two_digit_year(99), 1999);
    }

    #[test]
    fn out_of_range_year_is_rejected() {
        assert!(parse_expression("1850-01-01", ref_time(), "UTC").is_none());
    }

    #[test]
    fn extract_candidates_prefers_longer_overlapping_match() {
        let candidates = extract_candidates("let's meet next week to talk");
        assert!(candidates.iter().any(|c| c.to_lowercase().contains("next week")));
    }

    #[test]
    fn recurring_every_weekday_tags_pattern() {
        let result = parse_expression("every monday", ref_time(), "UTC").unwrap();
        assert_eq!(result.recurrence.as_deref(), Some("weekly_monday"));
    }
}
