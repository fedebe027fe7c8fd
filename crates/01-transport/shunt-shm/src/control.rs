//! Fixed-offset control words stored at the head of every channel region.
//!
//! ```text
//! word  0  STATUS    READY / WRITE / WRITING
//! word  1  MODE      ASYNC / SYNC
//! word  2  POS       length of valid payload in the data block
//! word  3  NEXT      sync-flush side channel: PENDING / MORE / DONE
//! word  4  DOORBELL  bumped on every publish so the drainer can park on it
//! word  5  HALT      non-zero once the producer tears the channel down
//! word  6  LOCK      barrier mutex
//! word  7  ARRIVE    barrier arrivals this round
//! word  8  LEAVE     barrier departures from the previous round
//! word  9  FLAG      barrier release flag
//! words 10..16       reserved
//! ```

use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crate::barrier::Barrier;
use crate::mutex::{Mutex, UNLOCKED};
use crate::wait;
use crate::ShmResult;

/// Size in bytes of the metadata block that precedes the data block.
pub const META_BLOCK: usize = 64;

/// Number of parties that rendezvous on a channel barrier.
pub const PARTIES: u32 = 2;

/// Phase of the current handoff.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// No handoff outstanding; the producer owns the data block.
    Ready = 1,
    /// The producer published `[0, POS)` and is waiting for the drainer.
    Write = 2,
    /// The drainer is copying or delivering the published range.
    Writing = 3,
}

impl Status {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Status::Ready),
            2 => Some(Status::Write),
            3 => Some(Status::Writing),
            _ => None,
        }
    }
}

/// Acknowledgment strategy for the current handoff.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Acknowledged out of band; the producer never blocks.
    Async = 1,
    /// Rendezvous on the barrier; the producer blocks until READY.
    Sync = 2,
}

impl Mode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Mode::Async),
            2 => Some(Mode::Sync),
            _ => None,
        }
    }
}

/// Value of the sync-flush side channel.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    /// Nothing announced yet for this step.
    Pending = 0,
    /// Another overflow segment has been published into the data block.
    More = 1,
    /// No more segments follow; the drainer should finish the flush.
    Done = 2,
}

impl Next {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Next::More,
            2 => Next::Done,
            _ => Next::Pending,
        }
    }
}

/// Atomically accessed protocol state shared by producer and drainer.
#[repr(C, align(64))]
#[derive(Debug)]
pub struct ControlWords {
    status: AtomicU32,
    mode: AtomicU32,
    pos: AtomicU32,
    next: AtomicU32,
    doorbell: AtomicU32,
    halt: AtomicU32,
    pub(crate) lock: AtomicU32,
    pub(crate) arrive: AtomicU32,
    pub(crate) leave: AtomicU32,
    pub(crate) flag: AtomicU32,
    _reserved: [u32; 6],
}

const _: () = assert!(mem::size_of::<ControlWords>() == META_BLOCK);

impl ControlWords {
    /// Puts every word into its initial state.
    ///
    /// Only valid while no other party is touching the words: at channel
    /// creation, or after the previous drainer has exited.
    pub fn reset(&self) {
        self.status.store(Status::Ready as u32, Ordering::Relaxed);
        self.mode.store(Mode::Async as u32, Ordering::Relaxed);
        self.pos.store(0, Ordering::Relaxed);
        self.next.store(Next::Pending as u32, Ordering::Relaxed);
        self.halt.store(0, Ordering::Relaxed);
        self.lock.store(UNLOCKED, Ordering::Relaxed);
        self.arrive.store(0, Ordering::Relaxed);
        self.flag.store(0, Ordering::Relaxed);
        self.leave.store(PARTIES, Ordering::Release);
        wait::wake_all(&self.leave);
    }

    pub fn status(&self) -> Option<Status> {
        Status::from_u32(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: Status) {
        self.status.store(status as u32, Ordering::Release);
    }

    /// Stores `status` and wakes anyone parked on the status word.
    pub fn publish_status(&self, status: Status) {
        self.set_status(status);
        wait::wake_all(&self.status);
    }

    pub fn mode(&self) -> Option<Mode> {
        Mode::from_u32(self.mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode as u32, Ordering::Release);
        wait::wake_all(&self.mode);
    }

    pub fn pos(&self) -> u32 {
        self.pos.load(Ordering::Acquire)
    }

    pub fn set_pos(&self, pos: u32) {
        self.pos.store(pos, Ordering::Release);
    }

    pub fn next(&self) -> Next {
        Next::from_u32(self.next.load(Ordering::Acquire))
    }

    pub fn set_next(&self, next: Next) {
        self.next.store(next as u32, Ordering::Release);
    }

    /// Current doorbell sequence; pass it to [`ControlWords::park_on_doorbell`].
    pub fn doorbell(&self) -> u32 {
        self.doorbell.load(Ordering::Acquire)
    }

    /// Bumps the doorbell and wakes a parked drainer.
    pub fn ring(&self) {
        self.doorbell.fetch_add(1, Ordering::AcqRel);
        wait::wake_all(&self.doorbell);
    }

    /// Parks while the doorbell still reads `seen`, for at most `slice`.
    pub fn park_on_doorbell(&self, seen: u32, slice: std::time::Duration) {
        if self.is_halted() {
            return;
        }
        wait::wait_u32_timeout(&self.doorbell, seen, slice);
    }

    /// Marks the channel halted and wakes every parked party.
    pub fn halt(&self) {
        self.halt.store(1, Ordering::Release);
        self.ring();
        for word in [&self.status, &self.mode, &self.leave, &self.flag] {
            wait::wake_all(word);
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt.load(Ordering::Acquire) != 0
    }

    pub(crate) fn halt_word(&self) -> &AtomicU32 {
        &self.halt
    }

    /// Parks until the status word reads `want`, honoring halt and `deadline`.
    pub fn await_status(&self, want: Status, deadline: Option<Instant>) -> ShmResult<()> {
        wait::park_until(&self.status, |v| v == want as u32, &self.halt, deadline).map(|_| ())
    }

    pub fn mutex(&self) -> Mutex<'_> {
        Mutex::new(&self.lock)
    }

    pub fn barrier(&self) -> Barrier<'_> {
        Barrier::new(self, PARTIES)
    }
}
