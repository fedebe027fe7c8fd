//! Shared-memory primitives behind the log shunt.
//!
//! This crate exposes the foundational pieces of the handoff protocol:
//! * [`SharedRegion`] – contiguous, aligned, zeroed memory visible to both parties.
//! * [`ControlWords`] – fixed-offset atomic words (status, mode, pos, side channel, barrier state).
//! * [`Mutex`] / [`Barrier`] – the binary lock and two-party rendezvous built on those words.
//! * [`HandoffChannel`] – control block plus single-slot data block.
//! * [`ShmError`] – lightweight error surface for allocation, lock and wait failures.

mod barrier;
mod channel;
mod control;
mod error;
mod mutex;
mod region;
pub mod wait;

pub use barrier::Barrier;
pub use channel::{HandoffChannel, MAX_CAPACITY};
pub use control::{ControlWords, Mode, Next, Status, META_BLOCK, PARTIES};
pub use error::{ShmError, ShmResult};
pub use mutex::Mutex;
pub use region::SharedRegion;
