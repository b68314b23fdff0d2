//! # Wakeup Statistics
//!
//! Point-in-time copies of per-source and registry-wide counters. The
//! [`fmt::Display`] form of [`WakeupStats`] is the table exported through the
//! debug interface:
//!
//! ```text
//! name                    active_count  event_count  hit_count  active_since  total_time  max_time  last_change
//! eth0                               3            5          1           0ms        12ms       8ms       4210ms
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use crate::time::{Duration, Timestamp};

/// Statistics of one wakeup source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeupSourceStats {
    /// Source name
    pub name: String,
    /// Is an event being processed?
    pub active: bool,
    /// Events signalled
    pub event_count: u64,
    /// Times the source went from inactive to active
    pub active_count: u64,
    /// Times the source went from active to inactive
    pub relax_count: u64,
    /// Suspend attempts aborted while the source was active
    pub hit_count: u64,
    /// Accumulated active time of closed periods
    pub total_time: Duration,
    /// Longest closed active period
    pub max_time: Duration,
    /// Start of the most recent active period
    pub last_time: Timestamp,
    /// Age of the current active period, zero if inactive
    pub active_since: Duration,
}

/// Statistics of the whole registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeupStats {
    /// Completed wakeup events
    pub event_count: u64,
    /// Wakeup events being processed
    pub events_in_progress: u64,
    /// Count saved by the last successful save
    pub saved_count: u64,
    /// Is the suspend-abort check armed?
    pub check_enabled: bool,
    /// Registered sources, sorted by name
    pub sources: Vec<WakeupSourceStats>,
}

impl WakeupStats {
    /// Look up a source by name
    pub fn find(&self, name: &str) -> Option<&WakeupSourceStats> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Sources currently keeping the system awake
    pub fn active_sources(&self) -> impl Iterator<Item = &WakeupSourceStats> {
        self.sources.iter().filter(|s| s.active)
    }
}

impl fmt::Display for WakeupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<24}{:>14}{:>13}{:>11}{:>14}{:>12}{:>10}{:>13}",
            "name",
            "active_count",
            "event_count",
            "hit_count",
            "active_since",
            "total_time",
            "max_time",
            "last_change"
        )?;
        for s in &self.sources {
            writeln!(
                f,
                "{:<24}{:>14}{:>13}{:>11}{:>12}ms{:>10}ms{:>8}ms{:>11}ms",
                s.name,
                s.active_count,
                s.event_count,
                s.hit_count,
                s.active_since.as_millis(),
                s.total_time.as_millis(),
                s.max_time.as_millis(),
                s.last_time.as_millis()
            )?;
        }
        write!(
            f,
            "events: {} completed, {} in progress",
            self.event_count, self.events_in_progress
        )
    }
}
