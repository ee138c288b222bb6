//! # Calendar Event Mapping
//!
//! Turns detected [`TideWindow`]s into [`CalendarEvent`]s and renders the
//! published iCalendar feed. Event times stay absolute; only the human text
//! (title and description) is formatted in the feed's display time zone.
//!
//! Serialization itself is delegated to the `icalendar` crate.

use crate::{CalendarEvent, TideWindow};
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, EventLike};

/// Content type served with the published feed.
pub const CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

/// `PRODID` written into every feed.
pub const PRODUCT_ID: &str = "-//Tiddler//High Tides//EN";

/// Presentation settings for the feed.
///
/// Passed explicitly to the mapper so formatting never depends on process
/// state such as the host time zone.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedConfig {
    /// Calendar name shown by subscribing clients
    pub name: String,
    /// Event location, e.g. "Leith, UK"
    pub location_label: String,
    /// Threshold the station markers represent, as display text ("3.0m")
    pub threshold: String,
    /// Zone used for the times written into titles and descriptions
    pub display_tz: Tz,
    /// Closing line of every event description
    pub footer: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        FeedConfig {
            name: "Tiddler - Leith high tides".to_string(),
            location_label: "Leith, UK".to_string(),
            threshold: "3.0m".to_string(),
            display_tz: chrono_tz::Europe::London,
            footer: "This event was created automatically by Tiddler, \
                     see http://deevid.com/tiddler for more info"
                .to_string(),
        }
    }
}

fn clock(ts: &DateTime<FixedOffset>, tz: Tz) -> String {
    ts.with_timezone(&tz).format("%H:%M").to_string()
}

/// Map one window to a calendar event. Never fails.
///
/// # Example
/// ```
/// use chrono::{FixedOffset, TimeZone};
/// use tiddler_lib::{calendar, TideWindow};
///
/// let utc = FixedOffset::east_opt(0).unwrap();
/// let window = TideWindow {
///     rising_at: utc.with_ymd_and_hms(2023, 4, 1, 5, 12, 0).unwrap(),
///     high_at: Some(utc.with_ymd_and_hms(2023, 4, 1, 7, 41, 0).unwrap()),
///     high_level: Some("5.3".to_string()),
///     falling_at: utc.with_ymd_and_hms(2023, 4, 1, 10, 5, 0).unwrap(),
/// };
/// let event = calendar::map(&window, &calendar::FeedConfig::default());
/// assert_eq!(event.title, "High tide at 08:41 (5.3)");
/// ```
pub fn map(window: &TideWindow, feed: &FeedConfig) -> CalendarEvent {
    let rising = clock(&window.rising_at, feed.display_tz);
    let falling = clock(&window.falling_at, feed.display_tz);
    let high = window.high_at.as_ref().map(|at| {
        let level = window.high_level.as_deref().unwrap_or_default();
        (clock(at, feed.display_tz), level)
    });

    let title = match &high {
        Some((time, level)) => format!("High tide at {time} ({level})"),
        None => format!("High tide above {}", feed.threshold),
    };

    let mut description = format!(
        "Tide at {} >{} from {rising} to {falling}.\n",
        feed.location_label, feed.threshold
    );
    if let Some((time, level)) = &high {
        description.push_str(&format!("High tide is at {time} ({level})\n"));
    }
    description.push('\n');
    description.push_str(&feed.footer);

    CalendarEvent {
        uid: format!("{}@tiddler", window.rising_at.timestamp()),
        title,
        description,
        start: window.rising_at,
        end: window.falling_at,
        location: feed.location_label.clone(),
    }
}

/// Map every window, preserving order.
pub fn map_all(windows: &[TideWindow], feed: &FeedConfig) -> Vec<CalendarEvent> {
    windows.iter().map(|w| map(w, feed)).collect()
}

/// Render events as an iCalendar document.
pub fn render_calendar(events: &[CalendarEvent], feed: &FeedConfig) -> String {
    let mut calendar = Calendar::empty();
    calendar
        .append_property(("VERSION", "2.0"))
        .append_property(("PRODID", PRODUCT_ID))
        .append_property(("CALSCALE", "GREGORIAN"))
        .name(&feed.name);

    for event in events {
        calendar.push(
            icalendar::Event::new()
                .uid(&event.uid)
                .summary(&event.title)
                .description(&event.description)
                .location(&event.location)
                .starts(event.start.with_timezone(&Utc))
                .ends(event.end.with_timezone(&Utc))
                .done(),
        );
    }

    calendar.done().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bst(hour: u32, min: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2023, 4, 1, hour, min, 0)
            .unwrap()
    }

    fn full_window() -> TideWindow {
        TideWindow {
            rising_at: bst(6, 12),
            high_at: Some(bst(8, 41)),
            high_level: Some("5.34".to_string()),
            falling_at: bst(11, 5),
        }
    }

    #[test]
    fn test_map_full_window() {
        let feed = FeedConfig::default();
        let event = map(&full_window(), &feed);

        assert_eq!(event.title, "High tide at 08:41 (5.34)");
        assert_eq!(event.start, bst(6, 12));
        assert_eq!(event.end, bst(11, 5));
        assert_eq!(event.location, "Leith, UK");
        assert!(event
            .description
            .starts_with("Tide at Leith, UK >3.0m from 06:12 to 11:05.\n"));
        assert!(event.description.contains("High tide is at 08:41 (5.34)"));
        assert!(event.description.ends_with(&feed.footer));
    }

    #[test]
    fn test_map_uses_display_zone() {
        let feed = FeedConfig {
            display_tz: chrono_tz::UTC,
            ..FeedConfig::default()
        };
        let event = map(&full_window(), &feed);
        assert_eq!(event.title, "High tide at 07:41 (5.34)");
        assert!(event.description.contains("from 05:12 to 10:05"));
    }

    #[test]
    fn test_map_window_without_high_tide() {
        let window = TideWindow {
            high_at: None,
            high_level: None,
            ..full_window()
        };
        let event = map(&window, &FeedConfig::default());
        assert_eq!(event.title, "High tide above 3.0m");
        assert!(!event.description.contains("High tide is at"));
        assert_eq!(event.start, window.rising_at);
    }

    #[test]
    fn test_uid_is_stable_across_runs() {
        let feed = FeedConfig::default();
        assert_eq!(map(&full_window(), &feed).uid, map(&full_window(), &feed).uid);
    }

    #[test]
    fn test_render_calendar() {
        let feed = FeedConfig::default();
        let events = map_all(&[full_window()], &feed);
        let ics = render_calendar(&events, &feed);

        assert!(ics.starts_with("BEGIN:VCALENDAR"));
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 1);
        assert!(ics.contains("DTSTART:20230401T051200Z"));
        assert!(ics.contains("DTEND:20230401T100500Z"));
        assert!(ics.contains("SUMMARY:High tide at 08:41 (5.34)"));
        assert!(ics.contains("PRODID:-//Tiddler//High Tides//EN"));
        assert!(!ics.contains("ICALENDAR-RS"));
        assert_eq!(
            feed.footer,
            "This event was created automatically by Tiddler, \
             see http://deevid.com/tiddler for more info"
        );
        assert!(events[0].description.ends_with(&feed.footer));
    }

    #[test]
    fn test_render_empty_calendar() {
        let ics = render_calendar(&[], &FeedConfig::default());
        assert!(ics.contains("BEGIN:VCALENDAR"));
        assert!(!ics.contains("BEGIN:VEVENT"));
    }
}
