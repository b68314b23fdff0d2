//! # Wakeup Events Core
//!
//! Registry of wakeup sources plus the global event counters that decide
//! whether a suspend attempt has to be aborted.
//!
//! ## Suspend Handshake
//!
//! ```text
//!   suspend path                         wakeup sources
//!   ────────────                         ──────────────
//!   count = get_count()   (drains in-flight events)
//!   save_count(count)  ── fails if an event completed or started since ──┐
//!        │                                                               │
//!        ▼                                                               │
//!   ... suspend devices ...              mark_event_start / mark_event   │
//!        │                                                               │
//!   check_wakeup_events() ── false if event_count moved or events are    │
//!        │                   still in progress: abort and retry ◀────────┘
//!        ▼
//!      sleep
//! ```
//!
//! ## Counter Ordering
//!
//! A completed event increments `event_count` *before* it decrements
//! `events_in_progress`, with a full barrier in between, and readers load
//! `events_in_progress` first. A reader that sees nothing in progress is
//! therefore guaranteed to see the completed count of every event that was
//! in progress a moment before.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{fence, AtomicU64, Ordering};

use crate::config::WakeupConfig;
use crate::error::{WakeupError, WakeupResult};
use crate::platform::{Platform, WaitContext};
use crate::source::WakeupSource;
use crate::stats::WakeupStats;
use crate::sync::{IrqSafeMutex, RcuList, RcuReadGuard};
use crate::time::Jiffies;
use crate::timer::TimerWheel;

// =============================================================================
// Event Core
// =============================================================================

/// State shared between the registry and every source it created
pub(crate) struct EventCore {
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) config: WakeupConfig,
    pub(crate) timers: TimerWheel,
    /// Completed wakeup events
    event_count: AtomicU64,
    /// Wakeup events being processed
    events_in_progress: AtomicU64,
}

impl EventCore {
    pub(crate) fn begin_event(&self) {
        self.events_in_progress.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn complete_event(&self) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        fence(Ordering::SeqCst);
        self.events_in_progress.fetch_sub(1, Ordering::SeqCst);
    }

    /// `(events_in_progress, event_count)`, loaded in that order
    fn counters(&self) -> (u64, u64) {
        let in_progress = self.events_in_progress.load(Ordering::SeqCst);
        let count = self.event_count.load(Ordering::SeqCst);
        (in_progress, count)
    }

    fn in_progress(&self) -> u64 {
        self.events_in_progress.load(Ordering::SeqCst)
    }
}

/// Armed suspend-abort check
#[derive(Debug, Default)]
struct CheckState {
    saved_count: u64,
    enabled: bool,
}

// =============================================================================
// Wakeup Count
// =============================================================================

/// Result of [`WakeupEvents::get_count`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeupCount {
    /// Completed wakeup events at the end of the wait
    pub count: u64,
    /// Did in-flight events drain to zero (false if the wait was interrupted)?
    pub drained: bool,
}

impl WakeupCount {
    /// The count, or `Interrupted` if the wait did not drain
    pub fn into_result(self) -> WakeupResult<u64> {
        if self.drained {
            Ok(self.count)
        } else {
            Err(WakeupError::Interrupted)
        }
    }
}

// =============================================================================
// Wakeup Events
// =============================================================================

/// Wakeup source registry and suspend-abort bookkeeping
pub struct WakeupEvents {
    core: Arc<EventCore>,
    sources: RcuList<WakeupSource>,
    check: IrqSafeMutex<CheckState>,
}

impl WakeupEvents {
    /// Create an empty registry
    pub fn new(platform: Arc<dyn Platform>, config: WakeupConfig) -> WakeupResult<Self> {
        config.validate()?;
        Ok(Self {
            core: Arc::new(EventCore {
                platform,
                config,
                timers: TimerWheel::new(),
                event_count: AtomicU64::new(0),
                events_in_progress: AtomicU64::new(0),
            }),
            sources: RcuList::new(),
            check: IrqSafeMutex::new(CheckState::default()),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &WakeupConfig {
        &self.core.config
    }

    /// Platform the registry runs on
    pub fn platform(&self) -> &dyn Platform {
        &*self.core.platform
    }

    // =========================================================================
    // Source Lifecycle
    // =========================================================================

    /// Create a wakeup source, not yet registered
    pub fn create(&self, name: &str) -> WakeupResult<Arc<WakeupSource>> {
        let mut owned = String::new();
        owned
            .try_reserve_exact(name.len())
            .map_err(|_| WakeupError::OutOfMemory)?;
        owned.push_str(name);
        Ok(Arc::new(WakeupSource::new(owned, self.core.clone())))
    }

    /// Destroy a wakeup source
    ///
    /// Blocks until no event is attributed to the source any more. Events in
    /// flight are not cancelled; they have to finish on their own or through
    /// their deferred timer.
    pub fn destroy(&self, ws: Arc<WakeupSource>) {
        if ws.is_active() {
            log::debug!("wakeup: waiting for '{}' to become inactive", ws.name());
        }
        while ws.is_active() {
            self.platform().sleep(self.core.config.poll_interval);
        }
    }

    /// Add a source to the registry
    ///
    /// The source becomes visible to registry scans and gets its deferred
    /// timer. Fails for a source created by another registry or already
    /// registered.
    pub fn add(&self, ws: &Arc<WakeupSource>) -> WakeupResult<()> {
        if !ws.belongs_to(&self.core) {
            log::warn!("wakeup: '{}' belongs to another registry", ws.name());
            return Err(WakeupError::InvalidArgument);
        }

        WakeupSource::setup_timer(ws);
        if !self.sources.insert(ws.clone()) {
            log::warn!("wakeup: '{}' is already registered", ws.name());
            return Err(WakeupError::InvalidArgument);
        }

        log::debug!("wakeup: registered source '{}'", ws.name());
        Ok(())
    }

    /// Remove a source from the registry
    ///
    /// Returns once no registry scan can observe the source any more.
    pub fn remove(&self, ws: &Arc<WakeupSource>) -> bool {
        let removed = self.sources.remove(ws);
        if removed {
            log::debug!("wakeup: unregistered source '{}'", ws.name());
        }
        removed
    }

    /// Create a wakeup source and add it to the registry
    pub fn register(&self, name: &str) -> WakeupResult<Arc<WakeupSource>> {
        let ws = self.create(name)?;
        self.add(&ws)?;
        Ok(ws)
    }

    /// Remove a wakeup source from the registry and destroy it
    pub fn unregister(&self, ws: Arc<WakeupSource>) {
        self.remove(&ws);
        self.destroy(ws);
    }

    /// Is `ws` registered here?
    pub fn is_registered(&self, ws: &Arc<WakeupSource>) -> bool {
        self.sources.contains(ws)
    }

    /// Snapshot of the registered sources, safe against concurrent changes
    pub fn sources(&self) -> RcuReadGuard<WakeupSource> {
        self.sources.read()
    }

    // =========================================================================
    // Suspend Coordination
    // =========================================================================

    /// May a suspend in progress continue?
    ///
    /// While a check is armed by [`WakeupEvents::save_count`], returns false
    /// (and disarms the check) as soon as a wakeup event completed since the
    /// saved count or one is still being processed. Always true while no
    /// check is armed.
    pub fn check_wakeup_events(&self) -> bool {
        let mut ret = true;
        {
            let mut check = self.check.lock(self.platform());
            if check.enabled {
                let (in_progress, count) = self.core.counters();
                ret = count == check.saved_count && in_progress == 0;
                check.enabled = ret;
            }
        }

        if !ret {
            log::info!("wakeup: pending wakeup events, suspend aborted");
            self.update_hit_counts();
        }
        ret
    }

    /// Read the number of completed wakeup events
    ///
    /// Privileged callers disarm any armed check first. Blocks, polling at
    /// the configured interval, until no event is in progress or the caller
    /// is signalled. The current count is reported either way.
    pub fn get_count(&self, ctx: &dyn WaitContext) -> WakeupCount {
        if ctx.is_privileged() {
            self.check.lock(self.platform()).enabled = false;
        }

        while self.core.in_progress() != 0 && !ctx.signal_pending() {
            self.update_hit_counts();
            ctx.sleep_interruptible(self.core.config.poll_interval);
        }

        let (in_progress, count) = self.core.counters();
        WakeupCount {
            count,
            drained: in_progress == 0,
        }
    }

    /// Save `count` as the reference for [`WakeupEvents::check_wakeup_events`]
    ///
    /// Succeeds, arming the check, only if `count` equals the current number
    /// of completed events and none is in progress. On failure the caller
    /// should read the count again and retry.
    pub fn save_count(&self, count: u64) -> bool {
        let mut ret = false;
        {
            let mut check = self.check.lock(self.platform());
            let (in_progress, current) = self.core.counters();
            if count == current && in_progress == 0 {
                check.saved_count = count;
                check.enabled = true;
                ret = true;
            }
        }

        if !ret {
            self.update_hit_counts();
        }
        ret
    }

    /// Disarm the suspend-abort check, e.g. after resuming
    pub fn disable_check(&self) {
        self.check.lock(self.platform()).enabled = false;
    }

    /// Is a suspend-abort check armed?
    pub fn check_enabled(&self) -> bool {
        self.check.lock(self.platform()).enabled
    }

    /// Count saved by the last successful [`WakeupEvents::save_count`]
    pub fn saved_count(&self) -> u64 {
        self.check.lock(self.platform()).saved_count
    }

    /// Number of completed wakeup events
    pub fn event_count(&self) -> u64 {
        self.core.counters().1
    }

    /// Number of wakeup events being processed
    pub fn events_in_progress(&self) -> u64 {
        self.core.in_progress()
    }

    fn update_hit_counts(&self) {
        let sources = self.sources.read();
        for ws in sources.iter() {
            ws.record_hit();
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    /// Run every deferred deactivation whose deadline has passed
    ///
    /// Returns the number of expired timers. Called from the tick handler.
    pub fn run_timers(&self) -> usize {
        let now = self.platform().now().to_jiffies(self.core.config.hz);
        self.core.timers.run_expired(self.platform(), now)
    }

    /// Earliest pending deactivation deadline
    pub fn next_expiry(&self) -> Option<Jiffies> {
        self.core.timers.next_expiry(self.platform())
    }

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Statistics of the registry and every registered source
    pub fn stats(&self) -> WakeupStats {
        let (in_progress, count) = self.core.counters();
        let (saved_count, check_enabled) = {
            let check = self.check.lock(self.platform());
            (check.saved_count, check.enabled)
        };

        let mut sources: Vec<_> = self.sources.read().iter().map(|ws| ws.stats()).collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name));

        WakeupStats {
            event_count: count,
            events_in_progress: in_progress,
            saved_count,
            check_enabled,
            sources,
        }
    }
}

impl fmt::Debug for WakeupEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (in_progress, count) = self.core.counters();
        f.debug_struct("WakeupEvents")
            .field("sources", &self.sources.len())
            .field("event_count", &count)
            .field("events_in_progress", &in_progress)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(WakeupEvents: Send, Sync);
static_assertions::assert_impl_all!(WakeupSource: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{PollingWaitContext, VirtualPlatform};
    use crate::time::Duration;
    use core::sync::atomic::AtomicBool;
    use std::thread;

    fn setup() -> (Arc<VirtualPlatform>, Arc<WakeupEvents>) {
        let platform = Arc::new(VirtualPlatform::new());
        let events = WakeupEvents::new(platform.clone(), WakeupConfig::millisecond_tick()).unwrap();
        (platform, Arc::new(events))
    }

    /// Wait context that is signalled after a number of sleeps
    struct SignalAfter {
        remaining: AtomicU64,
        privileged: bool,
    }

    impl SignalAfter {
        fn new(sleeps: u64) -> Self {
            Self {
                remaining: AtomicU64::new(sleeps),
                privileged: false,
            }
        }
    }

    impl WaitContext for SignalAfter {
        fn signal_pending(&self) -> bool {
            self.remaining.load(Ordering::SeqCst) == 0
        }

        fn is_privileged(&self) -> bool {
            self.privileged
        }

        fn sleep_interruptible(&self, _duration: Duration) {
            let _ = self
                .remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    #[test]
    fn test_register_and_remove() {
        let (_platform, events) = setup();
        let ws = events.register("lid").unwrap();
        assert!(events.is_registered(&ws));
        assert_eq!(events.sources().len(), 1);

        assert_eq!(events.add(&ws), Err(WakeupError::InvalidArgument));
        assert!(events.remove(&ws));
        assert!(!events.remove(&ws));
        assert!(events.sources().is_empty());
        events.destroy(ws);
    }

    #[test]
    fn test_foreign_source_rejected() {
        let (_platform, events) = setup();
        let (_other_platform, other) = setup();
        let ws = other.create("foreign").unwrap();
        assert_eq!(events.add(&ws), Err(WakeupError::InvalidArgument));
        assert!(events.sources().is_empty());
    }

    #[test]
    fn test_save_count_requires_current_idle() {
        let (_platform, events) = setup();
        let ws = events.register("eth").unwrap();

        ws.mark_event(0);
        assert_eq!(events.event_count(), 1);
        assert!(!events.save_count(0));
        assert!(!events.check_enabled());

        ws.mark_event_start();
        assert!(!events.save_count(1));
        ws.mark_event_end();

        assert!(events.save_count(2));
        assert!(events.check_enabled());
        assert_eq!(events.saved_count(), 2);
        assert!(events.check_wakeup_events());
        assert!(events.check_wakeup_events());
    }

    #[test]
    fn test_check_aborts_on_new_event() {
        let (_platform, events) = setup();
        let ws = events.register("power").unwrap();

        assert!(events.save_count(events.event_count()));
        ws.mark_event(0);
        assert!(!events.check_wakeup_events());
        // The failed check disarmed itself
        assert!(!events.check_enabled());
        assert!(events.check_wakeup_events());
    }

    #[test]
    fn test_check_aborts_on_event_in_progress() {
        let (_platform, events) = setup();
        let ws = events.register("modem").unwrap();
        let idle = events.register("idle").unwrap();

        assert!(events.save_count(0));
        ws.mark_event_start();
        assert!(!events.check_wakeup_events());
        assert_eq!(ws.stats().hit_count, 1);
        assert_eq!(idle.stats().hit_count, 0);
        ws.mark_event_end();
    }

    #[test]
    fn test_unarmed_check_passes() {
        let (_platform, events) = setup();
        let ws = events.register("any").unwrap();
        ws.mark_event_start();
        assert!(events.check_wakeup_events());
        ws.mark_event_end();
    }

    #[test]
    fn test_get_count_idle() {
        let (_platform, events) = setup();
        let ws = events.register("sd").unwrap();
        ws.mark_event(0);
        ws.mark_event(0);

        let ctx = PollingWaitContext::new();
        let reading = events.get_count(&ctx);
        assert_eq!(reading, WakeupCount { count: 2, drained: true });
        assert_eq!(reading.into_result(), Ok(2));
        assert_eq!(ctx.sleeps(), 0);
    }

    #[test]
    fn test_get_count_interrupted_by_stuck_source() {
        let (_platform, events) = setup();
        let stuck = events.register("stuck").unwrap();
        let other = events.register("other").unwrap();
        other.mark_event(0);
        stuck.mark_event_start();

        let ctx = SignalAfter::new(3);
        let reading = events.get_count(&ctx);
        assert!(!reading.drained);
        assert_eq!(reading.count, 1);
        assert_eq!(reading.into_result(), Err(WakeupError::Interrupted));
        // One hit per poll
        assert_eq!(stuck.stats().hit_count, 3);

        let again = events.get_count(&ctx);
        assert!(again.count >= reading.count);
    }

    #[test]
    fn test_get_count_waits_for_drain() {
        let (_platform, events) = setup();
        let ws = events.register("drain").unwrap();
        ws.mark_event_start();

        let ender = {
            let ws = ws.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(20));
                ws.mark_event_end();
            })
        };

        let ctx = PollingWaitContext::new();
        let reading = events.get_count(&ctx);
        ender.join().unwrap();
        assert_eq!(reading, WakeupCount { count: 1, drained: true });
    }

    #[test]
    fn test_privileged_get_count_disarms_check() {
        let (_platform, events) = setup();
        assert!(events.save_count(0));
        events.get_count(&PollingWaitContext::new());
        assert!(events.check_enabled());
        events.get_count(&PollingWaitContext::privileged());
        assert!(!events.check_enabled());
    }

    #[test]
    fn test_failed_save_updates_hit_counts() {
        let (_platform, events) = setup();
        let ws = events.register("hit").unwrap();
        ws.mark_event_start();
        assert!(!events.save_count(0));
        assert_eq!(ws.stats().hit_count, 1);
        ws.mark_event_end();
    }

    #[test]
    fn test_destroy_waits_for_inactive() {
        let (_platform, events) = setup();
        let ws = events.register("slow").unwrap();
        ws.mark_event_start();

        let done = Arc::new(AtomicBool::new(false));
        let ender = {
            let ws = ws.clone();
            let done = done.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(30));
                done.store(true, Ordering::SeqCst);
                ws.mark_event_end();
            })
        };

        events.unregister(ws);
        assert!(done.load(Ordering::SeqCst));
        assert!(events.sources().is_empty());
        ender.join().unwrap();
    }

    #[test]
    fn test_counters_never_show_stale_idle() {
        let (_platform, events) = setup();
        let ws = events.register("hammer").unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let ws = ws.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    ws.mark_event_start();
                    ws.mark_event_end();
                }
            })
        };

        let mut last = 0;
        for _ in 0..10_000 {
            let (in_progress, count) = events.core.counters();
            assert!(count >= last);
            assert!(in_progress <= 1);
            last = count;
        }
        stop.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }

    #[test]
    fn test_stats_sorted() {
        let (platform, events) = setup();
        let b = events.register("b-dev").unwrap();
        let _a = events.register("a-dev").unwrap();
        b.mark_event_start();
        platform.advance_ms(5);

        let stats = events.stats();
        assert_eq!(stats.sources.len(), 2);
        assert_eq!(stats.sources[0].name, "a-dev");
        assert_eq!(stats.sources[1].active_since, Duration::from_millis(5));
        assert_eq!(stats.events_in_progress, 1);
        b.mark_event_end();
    }
}
