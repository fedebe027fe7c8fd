//! Drainer thread lifecycle.
//!
//! Workers report to the emitter's notice channel, which outlives any single
//! drainer, and each owns an ack channel (emitter → drainer). A guard living
//! for the whole thread reports [`Notice::Exited`] last, whether the loop
//! returned or unwound.

use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use shunt_shm::HandoffChannel;

use crate::drainer::{Drainer, DrainerSettings};
use crate::error::{ShuntError, ShuntResult};
use crate::sink::{Transport, TransportError};

const JOIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub(crate) enum Notice {
    /// `[0, len)` of the data block was delivered and may be reused.
    Accepted { len: u32 },
    /// A chunk was dropped after exhausting its retries.
    Failed(TransportError),
    /// The loop hit an unrecoverable protocol error and is stopping.
    Fatal(ShuntError),
    Exited { panicked: bool },
}

struct ExitGuard {
    channel: Arc<HandoffChannel>,
    notices: Sender<Notice>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let panicked = thread::panicking();
        if panicked {
            // Release an emitter parked in a sync-flush rendezvous.
            self.channel.control().halt();
        }
        let _ = self.notices.send(Notice::Exited { panicked });
    }
}

pub(crate) struct WorkerHandle {
    generation: u64,
    thread: Option<JoinHandle<()>>,
    acks: Option<Sender<()>>,
    detached: bool,
}

pub(crate) fn spawn(
    channel: Arc<HandoffChannel>,
    transport: Box<dyn Transport>,
    settings: DrainerSettings,
    notices: Sender<Notice>,
    generation: u64,
) -> ShuntResult<WorkerHandle> {
    let (ack_tx, ack_rx) = crossbeam_channel::unbounded();

    let thread = thread::Builder::new()
        .name(format!("logshunt-drainer-{generation}"))
        .spawn(move || {
            let _guard = ExitGuard {
                channel: Arc::clone(&channel),
                notices: notices.clone(),
            };
            Drainer::new(channel, transport, settings, notices, ack_rx).run();
        })?;

    log::debug!("spawned drainer worker {generation}");
    Ok(WorkerHandle {
        generation,
        thread: Some(thread),
        acks: Some(ack_tx),
        detached: false,
    })
}

impl WorkerHandle {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Lets the drainer resume after an `Accepted` notice.
    pub(crate) fn ack(&self) {
        if let Some(acks) = &self.acks {
            let _ = acks.send(());
        }
    }

    /// Stops `terminate` from waiting on this thread.
    pub(crate) fn detach(&mut self) {
        self.detached = true;
    }

    /// Joins a thread that already reported `Exited`; returns its panic message, if any.
    pub(crate) fn reap(mut self) -> Option<String> {
        let handle = self.thread.take()?;
        match handle.join() {
            Ok(()) => None,
            Err(payload) => Some(panic_message(payload.as_ref())),
        }
    }

    /// Halts the channel and gives the thread up to `grace` to finish.
    pub(crate) fn terminate(mut self, channel: &HandoffChannel, grace: Duration) {
        channel.control().halt();
        self.acks = None;
        let Some(handle) = self.thread.take() else {
            return;
        };
        if self.detached {
            log::debug!("drainer worker {} detached", self.generation);
            return;
        }
        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "drainer worker {} still busy after {:?}; detaching",
                    self.generation,
                    grace
                );
                return;
            }
            thread::sleep(JOIN_POLL);
        }
        if handle.join().is_err() {
            log::error!("drainer worker {} panicked during shutdown", self.generation);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "drainer panicked".to_string()
    }
}
