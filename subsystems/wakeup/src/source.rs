//! # Wakeup Sources
//!
//! A wakeup source is the logical origin of events that justify keeping the
//! system awake. Each event opens a "no suspend" period on its source; the
//! period is closed either directly by whoever processed the event
//! ([`WakeupSource::mark_event_end`]) or by the source's deferred timer when
//! the event was announced with an anticipated processing time
//! ([`WakeupSource::mark_event`]), whichever comes first.
//!
//! All per-source state sits behind one interrupt-safe spin lock, so every
//! event operation here may be called from interrupt context.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::fmt;

use crate::events::EventCore;
use crate::platform::Platform;
use crate::stats::WakeupSourceStats;
use crate::sync::{IrqSafeGuard, IrqSafeMutex};
use crate::time::{msecs_to_jiffies, Duration, Jiffies, Timestamp};
use crate::timer::{TimerCallback, TimerId};

/// Deferred deactivation timer, installed when the source is registered
struct DeferredTimer {
    id: TimerId,
    target: Weak<dyn TimerCallback>,
}

/// Mutable state of a wakeup source
struct SourceState {
    active: bool,
    event_count: u64,
    active_count: u64,
    relax_count: u64,
    hit_count: u64,
    last_time: Timestamp,
    total_time: Duration,
    max_time: Duration,
    timer_expires: Jiffies,
    timer: Option<DeferredTimer>,
    /// Bumped on every arm and cancel; stale expiries carry an old value
    timer_generation: u64,
}

impl SourceState {
    const fn new() -> Self {
        Self {
            active: false,
            event_count: 0,
            active_count: 0,
            relax_count: 0,
            hit_count: 0,
            last_time: Timestamp::ZERO,
            total_time: Duration::ZERO,
            max_time: Duration::ZERO,
            timer_expires: Jiffies::UNSET,
            timer: None,
            timer_generation: 0,
        }
    }
}

/// Origin of wakeup events
pub struct WakeupSource {
    name: String,
    core: Arc<EventCore>,
    state: IrqSafeMutex<SourceState>,
}

impl WakeupSource {
    pub(crate) fn new(name: String, core: Arc<EventCore>) -> Self {
        Self {
            name,
            core,
            state: IrqSafeMutex::new(SourceState::new()),
        }
    }

    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Is an event attributed to this source being processed?
    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    /// Number of events signalled on this source
    pub fn event_count(&self) -> u64 {
        self.lock_state().event_count
    }

    /// Point-in-time copy of the source's statistics
    pub fn stats(&self) -> WakeupSourceStats {
        let now = self.platform().now();
        let state = self.lock_state();
        WakeupSourceStats {
            name: self.name.clone(),
            active: state.active,
            event_count: state.event_count,
            active_count: state.active_count,
            relax_count: state.relax_count,
            hit_count: state.hit_count,
            total_time: state.total_time,
            max_time: state.max_time,
            last_time: state.last_time,
            active_since: if state.active {
                now.duration_since(state.last_time)
            } else {
                Duration::ZERO
            },
        }
    }

    // =========================================================================
    // Event Protocol
    // =========================================================================

    /// Notify the PM core of a wakeup event being processed
    ///
    /// The source stays active until [`WakeupSource::mark_event_end`].
    /// Safe to call from interrupt context.
    pub fn mark_event_start(&self) {
        let mut state = self.lock_state();
        state.event_count += 1;
        if !state.active {
            self.activate(&mut state);
        }
    }

    /// Notify the PM core that processing of a wakeup event has ended
    ///
    /// No-op on an inactive source. A deactivation superseded by a racing
    /// activation is dropped silently. Safe to call from interrupt context.
    pub fn mark_event_end(&self) {
        let mut state = self.lock_state();
        if state.active {
            self.deactivate(&mut state);
        }
    }

    /// Notify the PM core of a wakeup event needing about `msec` ms to process
    ///
    /// With `msec == 0` the event is opened and closed at once. Otherwise the
    /// deferred timer closes it after `msec` ms unless an earlier call asked
    /// for a later deadline; deadlines are only ever extended. Safe to call
    /// from interrupt context.
    pub fn mark_event(&self, msec: u32) {
        let mut state = self.lock_state();

        state.event_count += 1;
        if !state.active {
            self.activate(&mut state);
        }

        if msec == 0 {
            self.deactivate(&mut state);
            return;
        }

        let hz = self.core.config.hz;
        let mut expires = self
            .platform()
            .now()
            .to_jiffies(hz)
            .wrapping_add(msecs_to_jiffies(msec, hz));
        if expires == Jiffies::UNSET {
            expires = Jiffies(1);
        }

        if expires.is_after(state.timer_expires) {
            let Some((id, target)) = state.timer.as_ref().map(|t| (t.id, t.target.clone())) else {
                log::warn!("wakeup: '{}' is not registered, no timer to arm", self.name);
                return;
            };
            state.timer_generation += 1;
            self.core
                .timers
                .modify(self.platform(), id, expires, target, state.timer_generation);
            state.timer_expires = expires;
        }
    }

    fn activate(&self, state: &mut SourceState) {
        let now = self.platform().now();
        state.active = true;
        state.active_count += 1;
        state.timer_expires = now.to_jiffies(self.core.config.hz);
        state.last_time = now;

        self.core.begin_event();
    }

    fn deactivate(&self, state: &mut SourceState) {
        state.relax_count += 1;
        // A direct end and a timer expiry may both try to close the same
        // period; only the one matching the latest activation counts.
        if state.relax_count != state.active_count {
            state.relax_count -= 1;
            return;
        }

        state.active = false;

        let duration = self.platform().now().duration_since(state.last_time);
        state.total_time += duration;
        if duration > state.max_time {
            state.max_time = duration;
        }

        self.cancel_timer(state);
        self.core.complete_event();
    }

    fn cancel_timer(&self, state: &mut SourceState) {
        state.timer_generation += 1;
        if let Some(timer) = &state.timer {
            self.core.timers.cancel(self.platform(), timer.id);
        }
    }

    // =========================================================================
    // Registry Hooks
    // =========================================================================

    /// Give the source its deferred timer; idempotent
    pub(crate) fn setup_timer(this: &Arc<Self>) {
        let mut state = this.lock_state();
        if state.timer.is_none() {
            let target: Arc<dyn TimerCallback> = this.clone();
            state.timer = Some(DeferredTimer {
                id: this.core.timers.alloc_id(),
                target: Arc::downgrade(&target),
            });
        }
    }

    /// Blame this source for an aborted suspend if it is active
    pub(crate) fn record_hit(&self) {
        let mut state = self.lock_state();
        if state.active {
            state.hit_count += 1;
        }
    }

    pub(crate) fn belongs_to(&self, core: &Arc<EventCore>) -> bool {
        Arc::ptr_eq(&self.core, core)
    }

    fn platform(&self) -> &dyn Platform {
        &*self.core.platform
    }

    fn lock_state(&self) -> IrqSafeGuard<'_, SourceState> {
        self.state.lock(&*self.core.platform)
    }
}

impl TimerCallback for WakeupSource {
    fn expired(&self, generation: u64) {
        let mut state = self.lock_state();
        if generation != state.timer_generation {
            return;
        }
        if state.active {
            self.deactivate(&mut state);
        }
    }
}

impl fmt::Debug for WakeupSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakeupSource")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WakeupConfig;
    use crate::events::WakeupEvents;
    use crate::platform::VirtualPlatform;
    use std::thread;

    fn setup() -> (Arc<VirtualPlatform>, WakeupEvents) {
        let platform = Arc::new(VirtualPlatform::new());
        let events =
            WakeupEvents::new(platform.clone(), WakeupConfig::millisecond_tick()).unwrap();
        (platform, events)
    }

    #[test]
    fn test_start_end_balance() {
        let (platform, events) = setup();
        let ws = events.register("kbd").unwrap();

        ws.mark_event_start();
        ws.mark_event_start();
        assert!(ws.is_active());
        assert_eq!(events.events_in_progress(), 1);

        platform.advance_ms(7);
        ws.mark_event_end();
        assert!(!ws.is_active());
        // A second end has nothing to close
        ws.mark_event_end();

        let stats = ws.stats();
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.relax_count, 1);
        assert_eq!(stats.total_time, Duration::from_millis(7));
        assert_eq!(stats.max_time, Duration::from_millis(7));
        assert_eq!(events.event_count(), 1);
        assert_eq!(events.events_in_progress(), 0);
    }

    #[test]
    fn test_mark_event_zero_is_start_then_end() {
        let (_platform, events) = setup();
        let ws = events.register("rtc").unwrap();

        let before = events.event_count();
        ws.mark_event(0);
        assert!(!ws.is_active());
        assert_eq!(events.event_count(), before + 1);
        assert_eq!(ws.stats().event_count, 1);
        assert_eq!(events.events_in_progress(), 0);
    }

    #[test]
    fn test_timer_deactivates() {
        let (platform, events) = setup();
        let ws = events.register("net").unwrap();

        ws.mark_event(50);
        assert!(ws.is_active());
        assert_eq!(events.next_expiry(), Some(Jiffies(50)));

        platform.advance_ms(49);
        assert_eq!(events.run_timers(), 0);
        assert!(ws.is_active());

        platform.advance_ms(51);
        assert_eq!(events.run_timers(), 1);
        assert!(!ws.is_active());
        assert!(ws.stats().max_time >= Duration::from_millis(50));
        assert_eq!(events.events_in_progress(), 0);
    }

    #[test]
    fn test_deadline_only_extends() {
        let (platform, events) = setup();
        let ws = events.register("usb").unwrap();

        ws.mark_event(100);
        ws.mark_event(10);
        assert_eq!(events.next_expiry(), Some(Jiffies(100)));

        platform.advance_ms(20);
        events.run_timers();
        assert!(ws.is_active());

        ws.mark_event(200);
        assert_eq!(events.next_expiry(), Some(Jiffies(220)));
        platform.advance_ms(200);
        events.run_timers();
        assert!(!ws.is_active());
        assert_eq!(ws.stats().event_count, 3);
        assert_eq!(ws.stats().active_count, 1);
    }

    #[test]
    fn test_end_cancels_timer() {
        let (platform, events) = setup();
        let ws = events.register("btn").unwrap();

        ws.mark_event(30);
        ws.mark_event_end();
        assert_eq!(events.next_expiry(), None);

        // A new period must not be closed by the old deadline
        ws.mark_event_start();
        platform.advance_ms(40);
        events.run_timers();
        assert!(ws.is_active());
        ws.mark_event_end();
    }

    #[test]
    fn test_stale_expiry_is_ignored() {
        let (_platform, events) = setup();
        let ws = events.register("stale").unwrap();

        ws.mark_event(30);
        let stale = ws.lock_state().timer_generation;
        ws.mark_event_end();
        ws.mark_event_start();

        // An expiry that was already in flight when the timer got cancelled
        ws.expired(stale);
        assert!(ws.is_active());
        assert_eq!(events.events_in_progress(), 1);
    }

    #[test]
    fn test_unregistered_source_has_no_timer() {
        let (_platform, events) = setup();
        let ws = events.create("loose").unwrap();

        ws.mark_event(20);
        assert!(ws.is_active());
        assert_eq!(events.next_expiry(), None);
        ws.mark_event_end();
        assert!(!ws.is_active());
    }

    #[test]
    fn test_relax_never_exceeds_activations() {
        let (platform, events) = setup();
        let ws = events.register("mix").unwrap();

        for i in 0..50u32 {
            match i % 4 {
                0 => ws.mark_event_start(),
                1 => ws.mark_event(i),
                2 => ws.mark_event_end(),
                _ => {
                    platform.advance_ms(u64::from(i));
                    events.run_timers();
                },
            }
            let stats = ws.stats();
            assert!(stats.relax_count <= stats.active_count);
            assert_eq!(stats.active, stats.active_count > stats.relax_count);
        }
    }

    #[test]
    fn test_concurrent_start_survives_end() {
        let (_platform, events) = setup();
        let events = Arc::new(events);
        let ws = events.register("race").unwrap();

        for _ in 0..200 {
            ws.mark_event_start();
            let ender = {
                let ws = ws.clone();
                thread::spawn(move || ws.mark_event_end())
            };
            let starter = {
                let ws = ws.clone();
                thread::spawn(move || ws.mark_event_start())
            };
            ender.join().unwrap();
            starter.join().unwrap();

            // End first: the start opened a new period. Start first: it
            // joined the open period, which the end then closed.
            let stats = ws.stats();
            assert_eq!(stats.active, stats.active_count > stats.relax_count);
            assert_eq!(
                events.events_in_progress(),
                u64::from(stats.active)
            );
            ws.mark_event_end();
        }
        assert_eq!(events.events_in_progress(), 0);
    }
}
