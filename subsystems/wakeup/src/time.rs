//! # Time Types
//!
//! Monotonic timestamps, durations and scheduler ticks ("jiffies") used by
//! the wakeup bookkeeping. Timestamps come from the platform clock; ticks are
//! derived from them at the configured tick rate and drive the deferred
//! deactivation timers.

use core::fmt;
use core::ops::{Add, AddAssign};

// =============================================================================
// Constants
// =============================================================================

/// Nanoseconds per second
pub const NS_PER_SEC: u64 = 1_000_000_000;

/// Nanoseconds per millisecond
pub const NS_PER_MS: u64 = 1_000_000;

/// Nanoseconds per microsecond
pub const NS_PER_US: u64 = 1_000;

// =============================================================================
// Timestamp
// =============================================================================

/// Point on the monotonic clock, in nanoseconds since boot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    nanos: u64,
}

impl Timestamp {
    /// Boot time
    pub const ZERO: Timestamp = Timestamp { nanos: 0 };

    /// Create from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * NS_PER_MS,
        }
    }

    /// Get nanoseconds
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Get milliseconds
    pub const fn as_millis(&self) -> u64 {
        self.nanos / NS_PER_MS
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future
    pub fn duration_since(&self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Convert to ticks at `hz`
    pub fn to_jiffies(&self, hz: u32) -> Jiffies {
        Jiffies(((self.nanos as u128 * hz as u128) / NS_PER_SEC as u128) as u64)
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp::from_nanos(self.nanos.saturating_add(rhs.as_nanos()))
    }
}

// =============================================================================
// Duration
// =============================================================================

/// Span of monotonic time, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    /// Empty duration
    pub const ZERO: Duration = Duration { nanos: 0 };

    /// Create from nanoseconds
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    /// Create from microseconds
    pub const fn from_micros(micros: u64) -> Self {
        Self {
            nanos: micros * NS_PER_US,
        }
    }

    /// Create from milliseconds
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            nanos: millis * NS_PER_MS,
        }
    }

    /// Get nanoseconds
    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Get milliseconds (truncated)
    pub const fn as_millis(&self) -> u64 {
        self.nanos / NS_PER_MS
    }

    /// Is this the empty duration?
    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration::from_nanos(self.nanos.saturating_add(rhs.nanos))
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}ms", self.as_millis(), (self.nanos % NS_PER_MS) / NS_PER_US)
    }
}

#[cfg(feature = "std")]
impl From<Duration> for std::time::Duration {
    fn from(d: Duration) -> Self {
        std::time::Duration::from_nanos(d.as_nanos())
    }
}

// =============================================================================
// Jiffies
// =============================================================================

/// Scheduler tick count
///
/// Tick `0` doubles as the "no deadline" marker of a deferred timer, so
/// armed deadlines are never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Jiffies(pub u64);

impl Jiffies {
    /// No deadline
    pub const UNSET: Jiffies = Jiffies(0);

    /// Raw tick value
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Tick count after adding `ticks`, wrapping
    pub const fn wrapping_add(self, ticks: u64) -> Jiffies {
        Jiffies(self.0.wrapping_add(ticks))
    }

    /// Is `self` strictly later than `other`?
    ///
    /// Stays correct across counter wraparound as long as the two values are
    /// less than half the counter range apart.
    pub const fn is_after(self, other: Jiffies) -> bool {
        (other.0.wrapping_sub(self.0) as i64) < 0
    }

    /// Is `self` at or later than `other`?
    pub const fn is_after_eq(self, other: Jiffies) -> bool {
        (self.0.wrapping_sub(other.0) as i64) >= 0
    }
}

/// Convert milliseconds to ticks at `hz`, rounding up
///
/// A nonzero request never rounds down to zero ticks.
pub const fn msecs_to_jiffies(msecs: u32, hz: u32) -> u64 {
    (msecs as u64 * hz as u64).div_ceil(1000)
}

// =============================================================================
// Tests
// =============================================================================
