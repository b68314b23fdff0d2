//! # Synchronization Primitives
//!
//! - [`IrqSafeMutex`]: spin lock held with local interrupts masked; guards
//!   per-source state and the timer wheel, both touched from interrupt
//!   context.
//! - [`RcuList`]: snapshot list for the wakeup source registry, so that
//!   diagnostic scans never block registration.

pub mod irq;
pub mod rcu;

pub use irq::{IrqSafeGuard, IrqSafeMutex};
pub use rcu::{RcuList, RcuReadGuard};
