//! # Tiddler Core Library
//!
//! This library turns tide-station predictions into a public calendar feed of
//! high-tide windows. It holds the data types shared by every stage of the
//! pipeline plus the workflow that drives a weekly feed refresh.
//!
//! ## Data Flow
//!
//! 1. **Generate**: an external prediction job writes raw CSV readings to the
//!    private container and reports back with its correlation token
//! 2. **Parse**: [`readings::parse`] turns the CSV into [`TideReading`]s
//! 3. **Detect**: [`windows::scan`] folds readings into [`TideWindow`]s
//! 4. **Map**: [`calendar::map_all`] formats windows as [`CalendarEvent`]s
//! 5. **Publish**: the rendered iCalendar file overwrites the public artifact
//!
//! Steps 1-5 are coordinated by [`orchestrator::Orchestrator`], which owns the
//! timeout and failure policy for a single run.
//!
//! ## Core Types
//!
//! - [`TideReading`]: one timestamped station observation
//! - [`TideWindow`]: one rising-to-falling high-tide period
//! - [`CalendarEvent`]: a format-independent calendar entry

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

pub mod calendar;
pub mod callbacks;
pub mod config;
pub mod job;
pub mod orchestrator;
pub mod pipeline;
pub mod readings;
pub mod storage;
pub mod windows;

/// Station event marker carried by each reading.
///
/// Only the three markers below drive the window detector. Every other tag
/// (e.g. `Low Tide`) is kept verbatim so nothing in the source is lost.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TideTag {
    MarkRising,
    HighTide,
    MarkFalling,
    Other(String),
}

impl TideTag {
    /// Map the source vocabulary (`Mark Rising`, `High Tide`, `Mark Falling`)
    /// onto a tag. Matching is exact after trimming.
    pub fn from_source(text: &str) -> Self {
        match text.trim() {
            "Mark Rising" => TideTag::MarkRising,
            "High Tide" => TideTag::HighTide,
            "Mark Falling" => TideTag::MarkFalling,
            other => TideTag::Other(other.to_string()),
        }
    }
}

/// A single tide-station observation.
///
/// `height` is the source text as provided; it is displayed, never rescaled,
/// so keeping it as text preserves the station's own formatting (`1.2`,
/// `3.40`, `4.1m`).
///
/// # Example
/// ```
/// use chrono::{FixedOffset, TimeZone};
/// use tiddler_lib::{TideReading, TideTag};
///
/// let bst = FixedOffset::east_opt(3600).unwrap();
/// let reading = TideReading {
///     station: "Leith".to_string(),
///     timestamp: bst.with_ymd_and_hms(2023, 4, 1, 6, 12, 0).unwrap(),
///     height: "1.2".to_string(),
///     tag: TideTag::MarkRising,
/// };
///
/// assert_eq!(reading.tag, TideTag::from_source("Mark Rising"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TideReading {
    /// Location column of the source line
    pub station: String,
    /// Observation time with the source zone resolved to a fixed offset
    pub timestamp: DateTime<FixedOffset>,
    /// Tide height exactly as written in the source
    pub height: String,
    /// Station event marker
    pub tag: TideTag,
}

/// One detected period with the tide above the station's marker threshold.
///
/// `high_at` and `high_level` are `None` when the falling marker arrived
/// without a `High Tide` reading since the last completed window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TideWindow {
    pub rising_at: DateTime<FixedOffset>,
    pub high_at: Option<DateTime<FixedOffset>>,
    pub high_level: Option<String>,
    pub falling_at: DateTime<FixedOffset>,
}

/// Calendar entry independent of any serialization format.
///
/// Built once by [`calendar::map`] and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Stable identifier so regenerated feeds keep event identity
    pub uid: String,
    pub title: String,
    pub description: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub location: String,
}
