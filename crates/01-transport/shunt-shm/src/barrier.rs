//! Sense-reversing rendezvous for the two channel parties.
//!
//! Bookkeeping lives in three control words (`ARRIVE`, `LEAVE`, `FLAG`)
//! updated under the channel mutex. Waiting on `LEAVE` and `FLAG` happens
//! outside the lock: a short spin, then parking on the word until the last
//! arriver wakes everyone.
//!
//! `LEAVE` counts parties that have left the previous round. The first
//! arrival of a new round waits until it reaches the party count before it
//! lowers `FLAG`, so a fast party can never lower the flag while its peer is
//! still waiting to observe it raised.
//!
//! The last arriver resets the words after releasing the mutex. That is only
//! sound with exactly two parties (`PARTIES == 2`): its single peer is parked
//! on `FLAG` and cannot touch `ARRIVE` until it has bumped `LEAVE`.

use std::sync::atomic::Ordering;
use std::time::Instant;

use crate::control::ControlWords;
use crate::wait;
use crate::ShmResult;

/// Barrier view over a channel's control words.
#[derive(Clone, Copy, Debug)]
pub struct Barrier<'a> {
    words: &'a ControlWords,
    parties: u32,
}

impl<'a> Barrier<'a> {
    pub fn new(words: &'a ControlWords, parties: u32) -> Self {
        Self { words, parties }
    }

    /// Blocks until every party has reached this round, or the channel halts.
    pub fn wait(&self) -> ShmResult<()> {
        self.rendezvous(None)
    }

    /// Like [`Barrier::wait`] but gives up at `deadline`.
    ///
    /// A party that times out leaves the round half-entered; the channel must
    /// be reset before the barrier is used again.
    pub fn wait_until(&self, deadline: Instant) -> ShmResult<()> {
        self.rendezvous(Some(deadline))
    }

    fn rendezvous(&self, deadline: Option<Instant>) -> ShmResult<()> {
        let words = self.words;
        let mutex = words.mutex();
        let halt = words.halt_word();

        mutex.lock();
        if words.arrive.load(Ordering::Acquire) == 0 {
            if words.leave.load(Ordering::Acquire) != self.parties {
                mutex.unlock()?;
                wait::park_until(&words.leave, |v| v == self.parties, halt, deadline)?;
                mutex.lock();
            }
            words.flag.store(0, Ordering::Release);
        }
        let arrived = words.arrive.fetch_add(1, Ordering::AcqRel) + 1;
        mutex.unlock()?;

        if arrived == self.parties {
            words.arrive.store(0, Ordering::Release);
            words.leave.store(1, Ordering::Release);
            words.flag.store(1, Ordering::Release);
            wait::wake_all(&words.arrive);
            wait::wake_all(&words.leave);
            wait::wake_all(&words.flag);
        } else {
            wait::park_until(&words.flag, |v| v != 0, halt, deadline)?;
            mutex.with(|| words.leave.fetch_add(1, Ordering::AcqRel))?;
            wait::wake_all(&words.leave);
        }
        Ok(())
    }
}
