//! # Platform Collaborators
//!
//! The wakeup bookkeeping needs very little from the machine it runs on:
//!
//! - a monotonic clock,
//! - a way to mask local interrupts around short critical sections,
//! - an uninterruptible sleep (used while draining a source on destroy),
//! - and, for the caller of [`WakeupEvents::get_count`], a view of the calling
//!   task: pending signals, privilege, interruptible sleep.
//!
//! [`VirtualPlatform`] is a manually driven implementation usable anywhere.
//! With the `std` feature, [`StdPlatform`] and [`StdWaitContext`] run on a
//! hosted OS.
//!
//! [`WakeupEvents::get_count`]: crate::WakeupEvents::get_count

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::time::{Duration, Timestamp};

// =============================================================================
// Interrupt State
// =============================================================================

/// Saved local interrupt state, returned by [`Platform::irq_save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqFlags {
    /// Were interrupts enabled before the save?
    pub was_enabled: bool,
}

impl IrqFlags {
    /// State for platforms without interrupt masking
    pub const NONE: IrqFlags = IrqFlags { was_enabled: false };
}

// =============================================================================
// Traits
// =============================================================================

/// Machine services used by the wakeup subsystem
pub trait Platform: Send + Sync {
    /// Current monotonic time
    fn now(&self) -> Timestamp;

    /// Disable local interrupts, returning the previous state
    fn irq_save(&self) -> IrqFlags {
        IrqFlags::NONE
    }

    /// Restore the interrupt state returned by [`Platform::irq_save`]
    fn irq_restore(&self, flags: IrqFlags) {
        let _ = flags;
    }

    /// Sleep without reacting to signals
    fn sleep(&self, duration: Duration);
}

/// The calling task, as seen by a blocking wait
pub trait WaitContext {
    /// Has the task been asked to stop waiting?
    fn signal_pending(&self) -> bool;

    /// Does the task hold administrative privilege?
    fn is_privileged(&self) -> bool;

    /// Sleep, returning early if a signal arrives
    fn sleep_interruptible(&self, duration: Duration);
}

// =============================================================================
// Virtual Platform
// =============================================================================

/// Platform with a manually advanced clock
///
/// Sleeping advances the clock instead of blocking, so drain loops make
/// progress deterministically.
#[derive(Debug, Default)]
pub struct VirtualPlatform {
    now_ns: AtomicU64,
}

impl VirtualPlatform {
    /// Create a platform whose clock reads zero
    pub const fn new() -> Self {
        Self {
            now_ns: AtomicU64::new(0),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, duration: Duration) {
        self.now_ns.fetch_add(duration.as_nanos(), Ordering::SeqCst);
    }

    /// Move the clock forward by whole milliseconds
    pub fn advance_ms(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl Platform for VirtualPlatform {
    fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Wait context that never sleeps and is signalled on demand
#[derive(Debug, Default)]
pub struct PollingWaitContext {
    privileged: bool,
    signalled: AtomicBool,
    sleeps: AtomicU64,
}

impl PollingWaitContext {
    /// Unprivileged context with no pending signal
    pub const fn new() -> Self {
        Self {
            privileged: false,
            signalled: AtomicBool::new(false),
            sleeps: AtomicU64::new(0),
        }
    }

    /// Privileged context with no pending signal
    pub const fn privileged() -> Self {
        Self {
            privileged: true,
            signalled: AtomicBool::new(false),
            sleeps: AtomicU64::new(0),
        }
    }

    /// Raise a signal
    pub fn signal(&self) {
        self.signalled.store(true, Ordering::SeqCst);
    }

    /// Number of sleeps requested so far
    pub fn sleeps(&self) -> u64 {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl WaitContext for PollingWaitContext {
    fn signal_pending(&self) -> bool {
        self.signalled.load(Ordering::SeqCst)
    }

    fn is_privileged(&self) -> bool {
        self.privileged
    }

    fn sleep_interruptible(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        core::hint::spin_loop();
    }
}

// =============================================================================
// Hosted Platform
// =============================================================================

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use std::sync::Arc;
        use std::time::Instant;

        /// Platform backed by the host's monotonic clock and thread sleeps
        #[derive(Debug)]
        pub struct StdPlatform {
            origin: Instant,
        }

        impl StdPlatform {
            /// Create a platform whose clock starts now
            pub fn new() -> Self {
                Self {
                    origin: Instant::now(),
                }
            }
        }

        impl Default for StdPlatform {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Platform for StdPlatform {
            fn now(&self) -> Timestamp {
                Timestamp::from_nanos(self.origin.elapsed().as_nanos() as u64)
            }

            fn sleep(&self, duration: Duration) {
                std::thread::sleep(duration.into());
            }
        }

        /// Granularity at which an interruptible sleep checks for signals
        const SIGNAL_CHECK_SLICE: Duration = Duration::from_millis(5);

        /// Wait context for a host thread, cancellable from another thread
        #[derive(Debug, Clone, Default)]
        pub struct StdWaitContext {
            privileged: bool,
            cancelled: Arc<AtomicBool>,
        }

        impl StdWaitContext {
            /// Unprivileged context
            pub fn new() -> Self {
                Self::default()
            }

            /// Privileged context
            pub fn privileged() -> Self {
                Self {
                    privileged: true,
                    ..Self::default()
                }
            }

            /// Handle that interrupts waits on this context
            pub fn canceller(&self) -> Canceller {
                Canceller(self.cancelled.clone())
            }
        }

        impl WaitContext for StdWaitContext {
            fn signal_pending(&self) -> bool {
                self.cancelled.load(Ordering::SeqCst)
            }

            fn is_privileged(&self) -> bool {
                self.privileged
            }

            fn sleep_interruptible(&self, duration: Duration) {
                let deadline = Instant::now() + std::time::Duration::from(duration);
                while !self.signal_pending() {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let slice = std::time::Duration::from(SIGNAL_CHECK_SLICE);
                    std::thread::sleep(slice.min(deadline - now));
                }
            }
        }

        /// Interrupts the waits of a [`StdWaitContext`]
        #[derive(Debug, Clone)]
        pub struct Canceller(Arc<AtomicBool>);

        impl Canceller {
            /// Deliver the signal
            pub fn cancel(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }
    }
}
