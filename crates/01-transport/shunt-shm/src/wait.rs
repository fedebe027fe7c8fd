//! Atomic wait/notify shims used by the channel primitives.
//!
//! Untimed waits and all wakeups go through the `atomic-wait` crate
//! (futex-backed where available). Bounded waits need a timeout, which
//! `atomic-wait` does not offer, so Linux issues `FUTEX_WAIT` directly and
//! other targets fall back to a short sleep-and-recheck loop.

use std::hint;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::{ShmError, ShmResult};

/// Busy iterations attempted before parking in [`park_until`].
const SPIN_LIMIT: u32 = 64;
/// Longest single park in [`park_until`]; bounds how late a halt is noticed.
const PARK_SLICE: Duration = Duration::from_millis(10);

/// Result of attempting to wait on an atomic location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// The caller was woken (possibly spuriously).
    Ok,
    /// The value no longer matched when the wait was attempted.
    NotEqual,
    /// The wait timed out before a notify was observed.
    TimedOut,
}

#[cfg(target_os = "linux")]
mod imp {
    use super::{AtomicU32, Duration, WaitResult};

    pub(crate) fn wait_u32_timeout(
        atomic: &AtomicU32,
        expected: u32,
        timeout: Duration,
    ) -> WaitResult {
        let ts = libc::timespec {
            tv_sec: timeout.as_secs().min(i32::MAX as u64) as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as _,
        };
        // SAFETY: `atomic` is a live, aligned 32-bit word and `ts` outlives the call.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_futex,
                atomic as *const AtomicU32,
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                &ts as *const libc::timespec,
            )
        };
        if rc == 0 {
            return WaitResult::Ok;
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ETIMEDOUT) => WaitResult::TimedOut,
            Some(libc::EAGAIN) => WaitResult::NotEqual,
            _ => WaitResult::Ok,
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use super::{AtomicU32, Duration, WaitResult};
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    const POLL_STEP: Duration = Duration::from_micros(200);

    pub(crate) fn wait_u32_timeout(
        atomic: &AtomicU32,
        expected: u32,
        timeout: Duration,
    ) -> WaitResult {
        let deadline = Instant::now() + timeout;
        loop {
            if atomic.load(Ordering::Acquire) != expected {
                return WaitResult::NotEqual;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitResult::TimedOut;
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }
}

/// Blocks the current caller until the atomic differs from `expected` or a wakeup occurs.
#[inline]
pub fn wait_u32(atomic: &AtomicU32, expected: u32) -> WaitResult {
    atomic_wait::wait(atomic, expected);
    WaitResult::Ok
}

/// Like [`wait_u32`] but gives up after `timeout`.
#[inline]
pub fn wait_u32_timeout(atomic: &AtomicU32, expected: u32, timeout: Duration) -> WaitResult {
    if timeout.is_zero() {
        return WaitResult::TimedOut;
    }
    imp::wait_u32_timeout(atomic, expected, timeout)
}

/// Wakes at most one waiter parked on `atomic`.
#[inline]
pub fn wake_one(atomic: &AtomicU32) {
    atomic_wait::wake_one(atomic as *const AtomicU32);
}

/// Wakes all waiters parked on `atomic`.
#[inline]
pub fn wake_all(atomic: &AtomicU32) {
    atomic_wait::wake_all(atomic as *const AtomicU32);
}

/// Spins briefly, then parks in short slices until `ready` accepts the value of `word`.
///
/// Returns [`ShmError::Halted`] as soon as `halt` becomes non-zero and
/// [`ShmError::TimedOut`] once `deadline` passes. Parking in slices means a
/// notify that races ahead of the park is never waited on for long.
pub fn park_until(
    word: &AtomicU32,
    mut ready: impl FnMut(u32) -> bool,
    halt: &AtomicU32,
    deadline: Option<Instant>,
) -> ShmResult<u32> {
    let started = Instant::now();
    let mut spins = 0;
    loop {
        let current = word.load(Ordering::Acquire);
        if ready(current) {
            return Ok(current);
        }
        if halt.load(Ordering::Acquire) != 0 {
            return Err(ShmError::Halted);
        }
        if spins < SPIN_LIMIT {
            spins += 1;
            hint::spin_loop();
            continue;
        }
        let slice = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(ShmError::TimedOut {
                        waited: now - started,
                    });
                }
                (deadline - now).min(PARK_SLICE)
            }
            None => PARK_SLICE,
        };
        wait_u32_timeout(word, current, slice);
    }
}
