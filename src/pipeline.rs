//! Parse -> detect -> map -> render, as one pure step.

use crate::calendar::{self, FeedConfig};
use crate::readings::{self, ParseError};
use crate::windows;
use crate::{CalendarEvent, TideWindow};

/// Everything derived from one batch of raw readings.
#[derive(Clone, Debug)]
pub struct Transformed {
    pub reading_count: usize,
    pub windows: Vec<TideWindow>,
    pub events: Vec<CalendarEvent>,
    /// Rendered iCalendar document
    pub ics: String,
}

/// Run the full transform over raw CSV text.
pub fn transform(raw: &str, feed: &FeedConfig) -> Result<Transformed, ParseError> {
    let readings = readings::parse(raw)?;
    let windows = windows::scan(&readings);
    let events = calendar::map_all(&windows, feed);
    let ics = calendar::render_calendar(&events, feed);

    tracing::debug!(
        readings = readings.len(),
        windows = windows.len(),
        "transformed tide readings"
    );

    Ok(Transformed {
        reading_count: readings.len(),
        windows,
        events,
        ics,
    })
}
