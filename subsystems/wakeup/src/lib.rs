//! # Helix Wakeup Events
//!
//! Bookkeeping that decides whether the system may enter, or stay in, a
//! sleep state. Drivers report wakeup events against *wakeup sources*; the
//! suspend path reads and saves the number of completed events, and aborts
//! the transition if that number moves or an event is still in flight.
//!
//! ## Components
//!
//! - **Wakeup Source**: per-origin active flag, counters, timing and a
//!   deferred deactivation timer ([`WakeupSource`])
//! - **Registry**: sources plus the global event counters and the armed
//!   suspend-abort check ([`WakeupEvents`])
//! - **Device glue**: wakeup capability and a single source slot per device
//!   ([`Device`])
//! - **Timer wheel**: one-shot tick timers closing events announced with an
//!   anticipated duration ([`TimerWheel`])
//!
//! ## Usage
//!
//! ```rust,ignore
//! use helix_wakeup::{Device, WakeupConfig, WakeupEvents};
//!
//! let events = helix_wakeup::init(platform, WakeupConfig::default())?;
//!
//! // Driver probe
//! let dev = Device::new("eth0");
//! events.device_init_wakeup(&dev, true)?;
//!
//! // Interrupt handler: keep the system up for ~200ms of processing
//! events.wakeup_event(&dev, 200);
//!
//! // Suspend path
//! let reading = events.get_count(&task);
//! if reading.drained && events.save_count(reading.count) {
//!     // ... suspend devices ...
//!     if !events.check_wakeup_events() {
//!         // abort and resume
//!     }
//! }
//! ```
//!
//! Event operations on sources and devices may be called from interrupt
//! context. Only [`WakeupEvents::get_count`] and [`WakeupEvents::destroy`]
//! block.

#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod platform;
pub mod source;
pub mod stats;
pub mod sync;
pub mod time;
pub mod timer;

use alloc::sync::Arc;

use spin::Once;

pub use config::WakeupConfig;
pub use device::Device;
pub use error::{WakeupError, WakeupResult};
pub use events::{WakeupCount, WakeupEvents};
pub use platform::{IrqFlags, Platform, PollingWaitContext, VirtualPlatform, WaitContext};
pub use source::WakeupSource;
pub use stats::{WakeupSourceStats, WakeupStats};
pub use time::{Duration, Jiffies, Timestamp};
pub use timer::{TimerCallback, TimerWheel};

#[cfg(feature = "std")]
pub use platform::{Canceller, StdPlatform, StdWaitContext};
#[cfg(feature = "std")]
pub use timer::TimerThread;

// =============================================================================
// Global Instance
// =============================================================================

static WAKEUP_EVENTS: Once<WakeupEvents> = Once::new();

/// Initialize the system-wide wakeup registry
///
/// Only the first call creates the registry; later calls return it unchanged.
pub fn init(
    platform: Arc<dyn Platform>,
    config: WakeupConfig,
) -> WakeupResult<&'static WakeupEvents> {
    if let Some(events) = WAKEUP_EVENTS.get() {
        log::warn!("wakeup: already initialized");
        return Ok(events);
    }

    let events = WakeupEvents::new(platform, config)?;
    log::info!("wakeup: events framework initialized (HZ={})", config.hz);
    Ok(WAKEUP_EVENTS.call_once(|| events))
}

/// The system-wide wakeup registry, if initialized
pub fn wakeup_events() -> Option<&'static WakeupEvents> {
    WAKEUP_EVENTS.get()
}
