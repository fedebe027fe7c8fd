//! Binary lock built on one control word.
//!
//! Acquisition is a compare-and-swap loop that parks on the word while it
//! reads `LOCKED`. There is no reentrancy, no owner tracking and no priority
//! inheritance; critical sections guarded by it are a handful of loads and
//! stores.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::wait;
use crate::{ShmError, ShmResult};

pub(crate) const UNLOCKED: u32 = 0;
pub(crate) const LOCKED: u32 = 1;

/// Mutex view over a single shared word.
#[derive(Clone, Copy, Debug)]
pub struct Mutex<'a> {
    word: &'a AtomicU32,
}

impl<'a> Mutex<'a> {
    /// Wraps `word`; the word must start out `UNLOCKED` (zero).
    pub fn new(word: &'a AtomicU32) -> Self {
        Self { word }
    }

    /// Blocks until the lock word flips from unlocked to locked for this caller.
    pub fn lock(&self) {
        loop {
            if self
                .word
                .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            wait::wait_u32(self.word, LOCKED);
        }
    }

    /// Attempts a single acquisition without parking.
    pub fn try_lock(&self) -> bool {
        self.word
            .compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock and wakes one parked waiter.
    ///
    /// Fails with [`ShmError::MutexInconsistency`] when the word was not locked.
    pub fn unlock(&self) -> ShmResult<()> {
        self.word
            .compare_exchange(LOCKED, UNLOCKED, Ordering::Release, Ordering::Relaxed)
            .map_err(|_| ShmError::MutexInconsistency)?;
        wait::wake_one(self.word);
        Ok(())
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce() -> R) -> ShmResult<R> {
        self.lock();
        let out = f();
        self.unlock()?;
        Ok(out)
    }

    /// Returns true when the word currently reads locked.
    pub fn is_locked(&self) -> bool {
        self.word.load(Ordering::Acquire) == LOCKED
    }
}
