//! # High-Tide Window Detection
//!
//! Folds an ordered stream of readings into [`TideWindow`]s. The prediction
//! engine marks the instants where the tide crosses the station threshold
//! (`Mark Rising` / `Mark Falling`) and the peak in between (`High Tide`).
//! A window is emitted each time a falling marker closes a rising marker.
//!
//! ## State Machine
//!
//! | state           | `MarkRising`    | `HighTide`      | `MarkFalling`          |
//! |-----------------|-----------------|-----------------|------------------------|
//! | `Idle`          | `Rising`        | `High`          | ignored                |
//! | `High`          | `RisingAndHigh` | `High`          | ignored                |
//! | `Rising`        | `Rising`        | `RisingAndHigh` | emit (no high), `Idle` |
//! | `RisingAndHigh` | `RisingAndHigh` | `RisingAndHigh` | emit, `Idle`           |
//!
//! Repeated markers overwrite the latched value, so the latest unconsumed
//! rising marker and the latest high tide win. A falling marker with nothing
//! rising is ignored. The detector never fails; odd sequences simply yield
//! fewer or emptier windows. Input must already be in chronological order.

use crate::{TideReading, TideTag, TideWindow};
use chrono::{DateTime, FixedOffset};

type Instant = DateTime<FixedOffset>;

/// Latched markers between two completed windows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
enum DetectorState {
    #[default]
    Idle,
    /// A high tide seen before any rising marker
    High { at: Instant, level: String },
    Rising { at: Instant },
    RisingAndHigh {
        rising_at: Instant,
        high_at: Instant,
        high_level: String,
    },
}

/// Incremental window detector.
///
/// [`scan`] is the batch form; use this directly to feed readings one at a
/// time.
#[derive(Clone, Debug, Default)]
pub struct WindowDetector {
    state: DetectorState,
}

impl WindowDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the machine by one reading, returning a window if it closed one.
    pub fn push(&mut self, reading: &TideReading) -> Option<TideWindow> {
        let at = reading.timestamp;
        let state = std::mem::take(&mut self.state);

        let (next, emitted) = match (&reading.tag, state) {
            (TideTag::MarkRising, DetectorState::High { at: high_at, level })
            | (
                TideTag::MarkRising,
                DetectorState::RisingAndHigh {
                    high_at,
                    high_level: level,
                    ..
                },
            ) => (
                DetectorState::RisingAndHigh {
                    rising_at: at,
                    high_at,
                    high_level: level,
                },
                None,
            ),
            (TideTag::MarkRising, _) => (DetectorState::Rising { at }, None),

            (TideTag::HighTide, DetectorState::Rising { at: rising_at })
            | (TideTag::HighTide, DetectorState::RisingAndHigh { rising_at, .. }) => (
                DetectorState::RisingAndHigh {
                    rising_at,
                    high_at: at,
                    high_level: reading.height.clone(),
                },
                None,
            ),
            (TideTag::HighTide, _) => (
                DetectorState::High {
                    at,
                    level: reading.height.clone(),
                },
                None,
            ),

            (TideTag::MarkFalling, DetectorState::Rising { at: rising_at }) => (
                DetectorState::Idle,
                Some(TideWindow {
                    rising_at,
                    high_at: None,
                    high_level: None,
                    falling_at: at,
                }),
            ),
            (
                TideTag::MarkFalling,
                DetectorState::RisingAndHigh {
                    rising_at,
                    high_at,
                    high_level,
                },
            ) => (
                DetectorState::Idle,
                Some(TideWindow {
                    rising_at,
                    high_at: Some(high_at),
                    high_level: Some(high_level),
                    falling_at: at,
                }),
            ),

            // Falling with nothing rising, or an inert tag.
            (_, state) => (state, None),
        };

        self.state = next;
        emitted
    }
}

/// Scan ordered readings and return every completed window, in order.
///
/// # Example
/// ```
/// use tiddler_lib::{readings, windows};
///
/// let raw = "Leith,2023-04-01,6:12 am BST,3.0,Mark Rising\n\
///            Leith,2023-04-01,8:41 am BST,5.3,High Tide\n\
///            Leith,2023-04-01,11:05 am BST,3.0,Mark Falling\n";
/// let found = windows::scan(&readings::parse(raw).unwrap());
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].high_level.as_deref(), Some("5.3"));
/// ```
pub fn scan(readings: &[TideReading]) -> Vec<TideWindow> {
    let mut detector = WindowDetector::new();
    readings.iter().filter_map(|r| detector.push(r)).collect()
}
