//! Error handling helpers for the shared-memory primitives.
//!
//! The surface stays small: allocation and capacity validation at setup,
//! plus the three ways a blocking primitive can give up at runtime.

use std::fmt;
use std::time::Duration;

/// Convenience result alias for fallible shared-memory operations.
pub type ShmResult<T, E = ShmError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by the region, mutex and barrier primitives.
pub enum ShmError {
    /// Requested data block size is zero or exceeds what the control words can address.
    InvalidCapacity { requested: usize, maximum: usize },
    /// Allocation of a shared region failed for the given size/alignment pair.
    AllocationFailed { size: usize, alignment: usize },
    /// `unlock` was called on a mutex word that was not locked.
    MutexInconsistency,
    /// A bounded wait gave up before its condition held.
    TimedOut { waited: Duration },
    /// The channel was halted while a party was parked.
    Halted,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmError::InvalidCapacity { requested, maximum } => {
                write!(
                    f,
                    "data block capacity {requested} must be between 1 and {maximum} bytes"
                )
            }
            ShmError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate shared region of {size} bytes aligned to {alignment}"
                )
            }
            ShmError::MutexInconsistency => {
                write!(f, "inconsistent mutex state (unlock on unlocked mutex)")
            }
            ShmError::TimedOut { waited } => {
                write!(f, "wait timed out after {} ms", waited.as_millis())
            }
            ShmError::Halted => write!(f, "channel halted while waiting"),
        }
    }
}

impl std::error::Error for ShmError {}
