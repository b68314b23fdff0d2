//! # Deferred Timer Wheel
//!
//! One-shot software timers keyed by tick deadline. The wheel is driven by
//! [`TimerWheel::run_expired`], called from the tick interrupt on bare metal
//! or from a [`TimerThread`] on a hosted platform.
//!
//! Timers only hold a weak reference to their owner. An owner that is gone
//! turns a late expiry into a no-op, and owners tag every arming with a
//! generation so that an expiry racing with a cancel can be recognised and
//! ignored.

use alloc::collections::BTreeMap;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::platform::Platform;
use crate::sync::IrqSafeMutex;
use crate::time::Jiffies;

/// Timer identifier, unique per wheel
pub type TimerId = u64;

/// Receiver of timer expiries
pub trait TimerCallback: Send + Sync {
    /// The timer armed with `generation` has expired
    ///
    /// Runs with no wheel lock held.
    fn expired(&self, generation: u64);
}

struct PendingTimer {
    target: Weak<dyn TimerCallback>,
    generation: u64,
}

#[derive(Default)]
struct TimerQueue {
    by_deadline: BTreeMap<(Jiffies, TimerId), PendingTimer>,
    armed: BTreeMap<TimerId, Jiffies>,
}

impl TimerQueue {
    fn unlink(&mut self, id: TimerId) -> bool {
        match self.armed.remove(&id) {
            Some(expires) => self.by_deadline.remove(&(expires, id)).is_some(),
            None => false,
        }
    }
}

/// Set of pending one-shot timers
pub struct TimerWheel {
    queue: IrqSafeMutex<TimerQueue>,
    next_id: AtomicU64,
}

impl TimerWheel {
    /// Create an empty wheel
    pub fn new() -> Self {
        Self {
            queue: IrqSafeMutex::new(TimerQueue::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Reserve an identifier for a new timer
    pub fn alloc_id(&self) -> TimerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Arm timer `id` to expire at `expires`, replacing any pending expiry
    pub fn modify(
        &self,
        platform: &dyn Platform,
        id: TimerId,
        expires: Jiffies,
        target: Weak<dyn TimerCallback>,
        generation: u64,
    ) {
        let mut queue = self.queue.lock(platform);
        queue.unlink(id);
        queue.armed.insert(id, expires);
        queue
            .by_deadline
            .insert((expires, id), PendingTimer { target, generation });
    }

    /// Disarm timer `id`, returning whether it was pending
    pub fn cancel(&self, platform: &dyn Platform, id: TimerId) -> bool {
        self.queue.lock(platform).unlink(id)
    }

    /// Is timer `id` pending?
    pub fn is_pending(&self, platform: &dyn Platform, id: TimerId) -> bool {
        self.queue.lock(platform).armed.contains_key(&id)
    }

    /// Earliest pending deadline
    pub fn next_expiry(&self, platform: &dyn Platform) -> Option<Jiffies> {
        self.queue
            .lock(platform)
            .by_deadline
            .keys()
            .next()
            .map(|&(expires, _)| expires)
    }

    /// Number of pending timers
    pub fn pending(&self, platform: &dyn Platform) -> usize {
        self.queue.lock(platform).armed.len()
    }

    /// Fire every timer whose deadline is at or before `now`
    ///
    /// Returns the number of timers that expired.
    pub fn run_expired(&self, platform: &dyn Platform, now: Jiffies) -> usize {
        let mut expired = Vec::new();
        {
            let mut queue = self.queue.lock(platform);
            while let Some(entry) = queue.by_deadline.first_entry() {
                let (expires, id) = *entry.key();
                if !now.is_after_eq(expires) {
                    break;
                }
                expired.push(entry.remove());
                queue.armed.remove(&id);
            }
        }

        let fired = expired.len();
        for timer in expired {
            if let Some(target) = timer.target.upgrade() {
                target.expired(timer.generation);
            }
        }
        fired
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimerWheel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerWheel")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Hosted Timer Driver
// =============================================================================

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        use core::ops::Deref;
        use core::sync::atomic::AtomicBool;
        use std::sync::Arc;
        use std::thread::JoinHandle;

        use crate::events::WakeupEvents;

        /// Background thread running expired wakeup timers once per tick
        #[derive(Debug)]
        pub struct TimerThread {
            stop: Arc<AtomicBool>,
            handle: Option<JoinHandle<()>>,
        }

        impl TimerThread {
            /// Start driving the timers of `events`
            pub fn spawn<E>(events: E) -> std::io::Result<Self>
            where
                E: Deref<Target = WakeupEvents> + Send + 'static,
            {
                let stop = Arc::new(AtomicBool::new(false));
                let handle = {
                    let stop = stop.clone();
                    std::thread::Builder::new()
                        .name("wakeup-timers".into())
                        .spawn(move || {
                            let tick = std::time::Duration::from(events.config().tick());
                            while !stop.load(Ordering::Acquire) {
                                events.run_timers();
                                std::thread::sleep(tick);
                            }
                        })?
                };
                Ok(Self {
                    stop,
                    handle: Some(handle),
                })
            }

            /// Stop the thread and wait for it to exit
            pub fn stop(mut self) {
                self.shutdown();
            }

            fn shutdown(&mut self) {
                self.stop.store(true, Ordering::Release);
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        log::warn!("wakeup: timer thread panicked");
                    }
                }
            }
        }

        impl Drop for TimerThread {
            fn drop(&mut self) {
                self.shutdown();
            }
        }
    }
}
