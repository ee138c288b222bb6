//! # Tide Reading Parser
//!
//! Parses the prediction engine's CSV output into [`TideReading`]s.
//!
//! ## Record Format
//!
//! One reading per line, five comma-separated fields:
//!
//! ```text
//! Leith,2023-04-01,6:12 am BST,1.2,Mark Rising
//! ```
//!
//! The date and time columns are combined and read as `YYYY-MM-DD h:mm a`
//! followed by an optional zone token. Zone abbreviations are resolved to a
//! fixed UTC offset here, so every later stage works with absolute instants.
//! A time without a zone token is taken as UTC.
//!
//! Parsing is all-or-nothing: the first malformed line aborts the parse and
//! no readings are returned.

use crate::{TideReading, TideTag};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use thiserror::Error;

/// A line of the source could not be turned into a reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    /// 1-based line number in the raw source (blank lines included)
    pub line: usize,
    pub reason: String,
}

const FIELD_COUNT: usize = 5;
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %I:%M %p";

/// Parse raw CSV text into readings, in source order.
///
/// # Example
/// ```
/// use tiddler_lib::readings::parse;
///
/// let raw = "Leith,2023-04-01,6:12 am BST,1.2,Mark Rising\n\n\
///            Leith,2023-04-01,8:40 am BST,5.1,High Tide\n";
/// let readings = parse(raw).unwrap();
/// assert_eq!(readings.len(), 2);
/// assert_eq!(readings[1].height, "5.1");
/// ```
pub fn parse(raw: &str) -> Result<Vec<TideReading>, ParseError> {
    let mut readings = Vec::new();

    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        readings.push(parse_line(index + 1, line)?);
    }

    Ok(readings)
}

fn parse_line(line_no: usize, line: &str) -> Result<TideReading, ParseError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError {
            line: line_no,
            reason: format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
        });
    }

    let timestamp = parse_timestamp(fields[1], fields[2]).map_err(|reason| ParseError {
        line: line_no,
        reason,
    })?;

    Ok(TideReading {
        station: fields[0].to_string(),
        timestamp,
        height: fields[3].to_string(),
        tag: TideTag::from_source(fields[4]),
    })
}

/// Combine the date and time columns into an absolute instant.
///
/// The time column is `h:mm am|pm [ZONE]`.
fn parse_timestamp(date: &str, time: &str) -> Result<DateTime<FixedOffset>, String> {
    let mut parts = time.split_whitespace();
    let (clock, meridiem) = match (parts.next(), parts.next()) {
        (Some(clock), Some(meridiem)) => (clock, meridiem),
        _ => return Err(format!("time `{time}` is not in `h:mm am` form")),
    };
    let offset = match parts.next() {
        Some(zone) => resolve_zone(zone).ok_or_else(|| format!("unknown time zone `{zone}`"))?,
        None => Utc.fix(),
    };
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected trailing token `{extra}` in time"));
    }

    let text = format!("{date} {clock} {}", meridiem.to_ascii_uppercase());
    let naive = NaiveDateTime::parse_from_str(&text, DATE_TIME_FORMAT)
        .map_err(|e| format!("invalid date/time `{date} {time}`: {e}"))?;

    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| format!("ambiguous local time `{date} {time}`"))
}

/// Resolve a zone abbreviation or numeric offset (`+01:00`, `-0500`).
fn resolve_zone(token: &str) -> Option<FixedOffset> {
    let hours = match token.to_ascii_uppercase().as_str() {
        "UTC" | "GMT" | "Z" | "WET" => 0,
        "BST" | "IST" | "WEST" | "CET" => 1,
        "CEST" | "EET" => 2,
        "EEST" => 3,
        "EDT" => -4,
        "EST" | "CDT" => -5,
        "CST" | "MDT" => -6,
        "MST" | "PDT" => -7,
        "PST" => -8,
        _ => return parse_numeric_offset(token),
    };
    FixedOffset::east_opt(hours * 3600)
}

fn parse_numeric_offset(token: &str) -> Option<FixedOffset> {
    let (sign, rest) = match token.as_bytes().first()? {
        b'+' => (1, &token[1..]),
        b'-' => (-1, &token[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const FIXTURE: &str = "\
Leith,2023-04-01,6:12 am BST,3.0,Mark Rising
Leith,2023-04-01,8:41 am BST,5.34,High Tide

Leith,2023-04-01,11:05 am BST,3.0,Mark Falling
Leith,2023-04-01,2:58 pm BST,0.9,Low Tide
";

    #[test]
    fn test_parse_preserves_order_and_count() {
        let readings = parse(FIXTURE).unwrap();
        assert_eq!(readings.len(), 4);
        assert_eq!(readings[0].tag, TideTag::MarkRising);
        assert_eq!(readings[1].tag, TideTag::HighTide);
        assert_eq!(readings[2].tag, TideTag::MarkFalling);
        assert_eq!(readings[3].tag, TideTag::Other("Low Tide".to_string()));
        assert!(readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_parse_keeps_height_text() {
        let readings = parse(FIXTURE).unwrap();
        assert_eq!(readings[1].height, "5.34");
        assert_eq!(readings[0].station, "Leith");
    }

    #[test]
    fn test_zone_abbreviation_resolved_to_offset() {
        let readings = parse(FIXTURE).unwrap();
        let ts = readings[0].timestamp;
        assert_eq!(ts.offset().local_minus_utc(), 3600);
        assert_eq!(ts.hour(), 6);
        assert_eq!(ts.naive_utc().hour(), 5);

        let pm = readings[3].timestamp;
        assert_eq!(pm.hour(), 14);
        assert_eq!(pm.minute(), 58);
    }

    #[test]
    fn test_missing_zone_is_utc() {
        let readings = parse("Leith,2023-04-01,6:12 am,1.2,Mark Rising").unwrap();
        assert_eq!(readings[0].timestamp.offset().local_minus_utc(), 0);
        assert_eq!(readings[0].timestamp.hour(), 6);
    }

    #[test]
    fn test_uppercase_meridiem_and_numeric_offset() {
        let readings = parse("Leith,2023-01-10,12:30 PM +01:00,4.0,High Tide").unwrap();
        assert_eq!(readings[0].timestamp.hour(), 12);
        assert_eq!(readings[0].timestamp.offset().local_minus_utc(), 3600);

        let readings = parse("Boston,2023-01-10,12:05 am -0500,1.0,Low Tide").unwrap();
        assert_eq!(readings[0].timestamp.hour(), 0);
        assert_eq!(readings[0].timestamp.offset().local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_us_zone_table() {
        assert_eq!(resolve_zone("EDT").unwrap().local_minus_utc(), -4 * 3600);
        assert_eq!(resolve_zone("CST").unwrap().local_minus_utc(), -6 * 3600);
        assert_eq!(resolve_zone("CDT").unwrap().local_minus_utc(), -5 * 3600);
        assert_eq!(resolve_zone("MST").unwrap().local_minus_utc(), -7 * 3600);
        assert_eq!(resolve_zone("gmt").unwrap().local_minus_utc(), 0);
    }

    #[test]
    fn test_wrong_field_count_fails_whole_parse() {
        let raw = "Leith,2023-04-01,6:12 am BST,3.0,Mark Rising\n\
                   Leith,2023-04-01,8:41 am BST,5.34\n";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.reason.contains("expected 5 fields"));
    }

    #[test]
    fn test_bad_date_fails() {
        let err = parse("Leith,2023-13-01,6:12 am BST,3.0,Mark Rising").unwrap_err();
        assert_eq!(err.line, 1);

        let err = parse("Leith,2023-04-01,noon,3.0,Mark Rising").unwrap_err();
        assert!(err.reason.contains("h:mm am"));
    }

    #[test]
    fn test_unknown_zone_fails() {
        let err = parse("Leith,2023-04-01,6:12 am XYZ,3.0,Mark Rising").unwrap_err();
        assert!(err.reason.contains("unknown time zone"));
    }

    #[test]
    fn test_blank_input_yields_nothing() {
        assert!(parse("\n   \n\n").unwrap().is_empty());
    }
}
