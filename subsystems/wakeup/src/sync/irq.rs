//! # Interrupt-Safe Spin Lock
//!
//! A spin lock that masks local interrupts for as long as it is held, so a
//! handler running on the same CPU can never spin on a lock its interrupted
//! context owns. Interrupts are saved before the lock is taken and restored
//! only after it is released.

use core::fmt;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::platform::{IrqFlags, Platform};

/// Spin lock taken with local interrupts disabled
pub struct IrqSafeMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqSafeMutex<T> {
    /// Create a new unlocked mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Disable interrupts through `platform`, then acquire the lock
    pub fn lock<'a>(&'a self, platform: &'a dyn Platform) -> IrqSafeGuard<'a, T> {
        let flags = platform.irq_save();
        IrqSafeGuard {
            guard: ManuallyDrop::new(self.inner.lock()),
            platform,
            flags,
        }
    }

    /// Consume the mutex, returning the protected value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for IrqSafeMutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for IrqSafeMutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqSafeMutex")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

/// Guard for [`IrqSafeMutex`]; releases the lock, then restores interrupts
pub struct IrqSafeGuard<'a, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    platform: &'a dyn Platform,
    flags: IrqFlags,
}

impl<T> Deref for IrqSafeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSafeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSafeGuard<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `guard` is dropped exactly once, here, and never used again.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.platform.irq_restore(self.flags);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Duration, Timestamp};
    use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Platform that tracks a single CPU's interrupt flag
    struct FlagPlatform {
        enabled: AtomicBool,
        saves: AtomicU32,
    }

    impl Platform for FlagPlatform {
        fn now(&self) -> Timestamp {
            Timestamp::ZERO
        }

        fn irq_save(&self) -> IrqFlags {
            self.saves.fetch_add(1, Ordering::SeqCst);
            IrqFlags {
                was_enabled: self.enabled.swap(false, Ordering::SeqCst),
            }
        }

        fn irq_restore(&self, flags: IrqFlags) {
            if flags.was_enabled {
                self.enabled.store(true, Ordering::SeqCst);
            }
        }

        fn sleep(&self, _duration: Duration) {}
    }

    #[test]
    fn test_interrupts_masked_while_held() {
        let platform = FlagPlatform {
            enabled: AtomicBool::new(true),
            saves: AtomicU32::new(0),
        };
        let mutex = IrqSafeMutex::new(5u32);
        {
            let mut guard = mutex.lock(&platform);
            assert!(!platform.enabled.load(Ordering::SeqCst));
            *guard += 1;
        }
        assert!(platform.enabled.load(Ordering::SeqCst));
        assert_eq!(*mutex.lock(&platform), 6);
    }

    #[test]
    fn test_nested_locks_restore_outer_state() {
        let platform = FlagPlatform {
            enabled: AtomicBool::new(true),
            saves: AtomicU32::new(0),
        };
        let outer = IrqSafeMutex::new(());
        let inner = IrqSafeMutex::new(());
        {
            let _a = outer.lock(&platform);
            {
                let _b = inner.lock(&platform);
            }
            // inner saw interrupts already off and must not re-enable them
            assert!(!platform.enabled.load(Ordering::SeqCst));
        }
        assert!(platform.enabled.load(Ordering::SeqCst));
        assert_eq!(platform.saves.load(Ordering::SeqCst), 2);
    }
}
