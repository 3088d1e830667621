//! Date header normalization.
//!
//! Dates are rendered as `YYYY-MM-DD HH:MM:SS` in the sender's own offset,
//! so lexical order matches chronological order for same-zone mail.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use tracing::debug;

/// Sentinel stored when a date is missing or unparseable.
pub const UNKNOWN_DATE: &str = "unknown date";

/// Canonical output format.
pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ZONED_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S %z", "%d %b %Y %H:%M %z"];
const NAIVE_FORMATS: &[&str] = &["%d %b %Y %H:%M:%S", "%d %b %Y %H:%M"];

/// Normalize a raw `Date` header value.
pub fn normalize(raw: Option<&str>) -> String {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return UNKNOWN_DATE.to_string();
    };

    match parse(raw) {
        Some(formatted) => formatted,
        None => {
            debug!(date = raw, "Unparseable date header");
            UNKNOWN_DATE.to_string()
        }
    }
}

/// Keep a date already in canonical form; anything else becomes the sentinel.
///
/// Stored dates are compared as text, so only canonical values may reach the
/// store.
pub fn canonical_or_unknown(stored: &str) -> String {
    match NaiveDateTime::parse_from_str(stored.trim(), CANONICAL_FORMAT) {
        Ok(ndt) => ndt.format(CANONICAL_FORMAT).to_string(),
        Err(_) => UNKNOWN_DATE.to_string(),
    }
}

fn parse(raw: &str) -> Option<String> {
    let cleaned = strip_comment(raw);

    if let Ok(dt) = DateTime::parse_from_rfc2822(&cleaned) {
        return Some(format_local(&dt));
    }

    let no_dow = strip_day_of_week(&cleaned);
    let candidates = [no_dow.clone(), replace_named_tz(&no_dow)];

    for candidate in &candidates {
        for fmt in ZONED_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(format_local(&dt));
            }
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&no_dow, fmt) {
            return Some(ndt.format(CANONICAL_FORMAT).to_string());
        }
    }
    None
}

fn format_local(dt: &DateTime<FixedOffset>) -> String {
    dt.naive_local().format(CANONICAL_FORMAT).to_string()
}

/// Drop a trailing parenthesized comment such as `(UTC)`.
fn strip_comment(s: &str) -> String {
    match s.find('(') {
        Some(pos) => s[..pos].trim().to_string(),
        None => s.trim().to_string(),
    }
}

fn strip_day_of_week(s: &str) -> String {
    const DAYS: &[&str] = &["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in DAYS {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches(',').trim().to_string();
        }
    }
    s.to_string()
}

fn replace_named_tz(s: &str) -> String {
    const ZONES: &[(&str, &str)] = &[
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("Z", "+0000"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("CET", "+0100"),
        ("CEST", "+0200"),
    ];
    let Some((head, zone)) = s.rsplit_once(' ') else {
        return s.to_string();
    };
    ZONES
        .iter()
        .find(|(name, _)| zone.eq_ignore_ascii_case(name))
        .map(|(_, offset)| format!("{head} {offset}"))
        .unwrap_or_else(|| s.to_string())
}
