//! # Device Wakeup
//!
//! A device may signal wakeup events once it is both wakeup-capable (a
//! property of the hardware, set by its driver) and wakeup-enabled (it has a
//! wakeup source attached). Each device has a single attachment slot guarded
//! by its own interrupt-safe lock; event helpers forward to whatever source
//! is attached and do nothing otherwise.

use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::error::{WakeupError, WakeupResult};
use crate::events::WakeupEvents;
use crate::source::WakeupSource;
use crate::sync::IrqSafeMutex;

/// Power-management view of a device
pub struct Device {
    name: String,
    can_wakeup: AtomicBool,
    wakeup: IrqSafeMutex<Option<Arc<WakeupSource>>>,
}

impl Device {
    /// Create a device that is not wakeup-capable
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_wakeup: AtomicBool::new(false),
            wakeup: IrqSafeMutex::new(None),
        }
    }

    /// Device name, also used for its wakeup source
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Can the device generate wakeup events?
    pub fn can_wakeup(&self) -> bool {
        self.can_wakeup.load(Ordering::Acquire)
    }

    /// Mark the device as able (or not) to generate wakeup events
    pub fn set_wakeup_capable(&self, capable: bool) {
        self.can_wakeup.store(capable, Ordering::Release);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("can_wakeup", &self.can_wakeup())
            .finish_non_exhaustive()
    }
}

impl WakeupEvents {
    // =========================================================================
    // Attachment
    // =========================================================================

    /// Attach `ws` to `dev`, making it a wakeup device
    ///
    /// Fails with `AlreadyExists`, leaving the existing attachment alone, if
    /// the device already has a source.
    pub fn attach(&self, dev: &Device, ws: &Arc<WakeupSource>) -> WakeupResult<()> {
        let mut slot = dev.wakeup.lock(self.platform());
        if slot.is_some() {
            return Err(WakeupError::AlreadyExists);
        }
        *slot = Some(ws.clone());
        Ok(())
    }

    /// Detach and return the wakeup source of `dev`
    pub fn detach(&self, dev: &Device) -> Option<Arc<WakeupSource>> {
        dev.wakeup.lock(self.platform()).take()
    }

    /// The wakeup source attached to `dev`
    pub fn device_source(&self, dev: &Device) -> Option<Arc<WakeupSource>> {
        dev.wakeup.lock(self.platform()).clone()
    }

    // =========================================================================
    // Enable / Disable
    // =========================================================================

    /// Register a wakeup source named after `dev` and attach it
    pub fn device_enable(&self, dev: &Device) -> WakeupResult<()> {
        if !dev.can_wakeup() {
            return Err(WakeupError::NotCapable);
        }

        let ws = self.register(dev.name())?;
        if let Err(err) = self.attach(dev, &ws) {
            self.unregister(ws);
            return Err(err);
        }

        log::debug!("wakeup: enabled wakeup for device '{}'", dev.name());
        Ok(())
    }

    /// Detach the wakeup source of `dev`, unregister and destroy it
    pub fn device_disable(&self, dev: &Device) -> WakeupResult<()> {
        if !dev.can_wakeup() {
            return Err(WakeupError::NotCapable);
        }

        if let Some(ws) = self.detach(dev) {
            self.unregister(ws);
            log::debug!("wakeup: disabled wakeup for device '{}'", dev.name());
        }
        Ok(())
    }

    /// Enable or disable `dev` as a wakeup device
    pub fn device_set_enabled(&self, dev: &Device, enable: bool) -> WakeupResult<()> {
        if enable {
            self.device_enable(dev)
        } else {
            self.device_disable(dev)
        }
    }

    /// Initialize wakeup for a device at probe time
    ///
    /// Enabling marks the device capable and attaches a source. Disabling
    /// drops any attached source, then clears the capability.
    pub fn device_init_wakeup(&self, dev: &Device, enable: bool) -> WakeupResult<()> {
        if enable {
            dev.set_wakeup_capable(true);
            self.device_enable(dev)
        } else {
            if dev.can_wakeup() {
                self.device_disable(dev)?;
            }
            dev.set_wakeup_capable(false);
            Ok(())
        }
    }

    /// Is `dev` both wakeup-capable and wakeup-enabled?
    pub fn device_may_wakeup(&self, dev: &Device) -> bool {
        dev.can_wakeup() && dev.wakeup.lock(self.platform()).is_some()
    }

    // =========================================================================
    // Device Events
    // =========================================================================

    /// [`WakeupSource::mark_event_start`] on the source of `dev`, if any
    pub fn stay_awake(&self, dev: &Device) {
        if let Some(ws) = dev.wakeup.lock(self.platform()).as_ref() {
            ws.mark_event_start();
        }
    }

    /// [`WakeupSource::mark_event_end`] on the source of `dev`, if any
    pub fn relax(&self, dev: &Device) {
        if let Some(ws) = dev.wakeup.lock(self.platform()).as_ref() {
            ws.mark_event_end();
        }
    }

    /// [`WakeupSource::mark_event`] on the source of `dev`, if any
    pub fn wakeup_event(&self, dev: &Device, msec: u32) {
        if let Some(ws) = dev.wakeup.lock(self.platform()).as_ref() {
            ws.mark_event(msec);
        }
    }
}
