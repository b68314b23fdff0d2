//! # Wakeup Configuration

use crate::error::{WakeupError, WakeupResult};
use crate::time::Duration;

/// Default scheduler tick rate
pub const DEFAULT_HZ: u32 = 250;

/// Default interval between polls while draining in-flight events
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wakeup subsystem configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupConfig {
    /// Tick rate of the deferred deactivation timers
    pub hz: u32,
    /// Sleep between polls in `get_count` and `destroy`
    pub poll_interval: Duration,
}

impl Default for WakeupConfig {
    fn default() -> Self {
        Self {
            hz: DEFAULT_HZ,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl WakeupConfig {
    /// Configuration with a millisecond tick, convenient for simulations
    pub fn millisecond_tick() -> Self {
        Self {
            hz: 1000,
            ..Default::default()
        }
    }

    /// Set the tick rate
    pub fn with_hz(mut self, hz: u32) -> Self {
        self.hz = hz;
        self
    }

    /// Set the drain poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Length of one tick
    pub fn tick(&self) -> Duration {
        Duration::from_nanos(crate::time::NS_PER_SEC / self.hz.max(1) as u64)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> WakeupResult<()> {
        if self.hz == 0 || self.poll_interval.is_zero() {
            return Err(WakeupError::InvalidArgument);
        }
        Ok(())
    }
}
