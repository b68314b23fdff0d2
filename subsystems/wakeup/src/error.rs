//! # Wakeup Errors

use core::fmt;

/// Wakeup subsystem error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupError {
    /// Could not allocate a wakeup source
    OutOfMemory,
    /// Invalid argument or configuration
    InvalidArgument,
    /// The device already has a wakeup source attached
    AlreadyExists,
    /// The device was never marked wakeup-capable
    NotCapable,
    /// A blocking wait was interrupted by a pending signal
    Interrupted,
}

impl WakeupError {
    /// Kernel errno equivalent (negative)
    pub const fn errno(&self) -> i32 {
        match self {
            Self::OutOfMemory => -12,
            Self::InvalidArgument | Self::NotCapable => -22,
            Self::AlreadyExists => -17,
            Self::Interrupted => -4,
        }
    }
}

impl fmt::Display for WakeupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "Out of memory"),
            Self::InvalidArgument => write!(f, "Invalid argument"),
            Self::AlreadyExists => write!(f, "Wakeup source already attached"),
            Self::NotCapable => write!(f, "Device is not wakeup-capable"),
            Self::Interrupted => write!(f, "Wait interrupted"),
        }
    }
}

/// Result type for wakeup operations
pub type WakeupResult<T> = Result<T, WakeupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(WakeupError::OutOfMemory.errno(), -12);
        assert_eq!(WakeupError::AlreadyExists.errno(), -17);
        assert_eq!(WakeupError::NotCapable.errno(), WakeupError::InvalidArgument.errno());
        assert_eq!(WakeupError::Interrupted.errno(), -4);
    }
}
