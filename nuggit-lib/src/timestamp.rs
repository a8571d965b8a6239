//! UTC ISO-8601 normalization of remote timestamps.
//!
//! GitHub normally answers with `Z`-suffixed RFC 3339 strings, but older payloads and
//! values stored by earlier releases use offsets, fractional seconds, or no zone at all.
//! Everything is funnelled into a single `YYYY-MM-DDTHH:MM:SSZ` shape so that stored
//! values compare equal whenever they denote the same instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

const LOG_TARGET: &str = " timestamp";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Normalizes `input` to `YYYY-MM-DDTHH:MM:SSZ`.
///
/// Values without a zone are taken to be UTC. Returns `None` when `input` is not a
/// recognizable timestamp.
#[must_use]
pub fn to_utc_iso(input: &str) -> Option<String> {
    parse_utc(input).map(format_utc)
}

/// Parses `input` into a UTC instant using the same rules as [`to_utc_iso`].
#[must_use]
pub fn parse_utc(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(naive.and_utc());
        }
    }

    if let Some(midnight) = NaiveDate::parse_from_str(input, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)) {
        return Some(midnight.and_utc());
    }

    log::debug!(target: LOG_TARGET, "Could not parse timestamp '{input}'");
    None
}

/// Renders `dt` as `YYYY-MM-DDTHH:MM:SSZ`.
#[must_use]
pub fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// The current instant as `YYYY-MM-DDTHH:MM:SSZ`.
#[must_use]
pub fn now_iso() -> String {
    format_utc(Utc::now())
}
