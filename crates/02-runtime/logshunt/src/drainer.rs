//! Consumer side of the handoff, run on the worker thread.
//!
//! Idle drainers park on the doorbell word in `idle_park` slices. On WRITE
//! the published range is copied out and delivered:
//!
//! * ASYNC: deliver, reset POS, go READY, report `Accepted`, then block until
//!   the emitter acknowledges it.
//! * SYNC: deliver the resident segment, then follow the emitter's side
//!   channel segment by segment until it announces `Done`.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use shunt_shm::{HandoffChannel, Mode, Next, Status};

use crate::error::{ShuntError, ShuntResult};
use crate::sink::{Transport, TransportError};
use crate::worker::Notice;

#[derive(Clone, Copy, Debug)]
pub(crate) struct DrainerSettings {
    pub(crate) retries: u32,
    pub(crate) idle_park: Duration,
}

enum Flow {
    Continue,
    Stop,
}

pub(crate) struct Drainer {
    channel: Arc<HandoffChannel>,
    transport: Box<dyn Transport>,
    settings: DrainerSettings,
    notices: Sender<Notice>,
    acks: Receiver<()>,
}

impl Drainer {
    pub(crate) fn new(
        channel: Arc<HandoffChannel>,
        transport: Box<dyn Transport>,
        settings: DrainerSettings,
        notices: Sender<Notice>,
        acks: Receiver<()>,
    ) -> Self {
        Self {
            channel,
            transport,
            settings,
            notices,
            acks,
        }
    }

    pub(crate) fn run(mut self) {
        let channel = Arc::clone(&self.channel);
        let control = channel.control();
        loop {
            let seen = control.doorbell();
            if control.is_halted() {
                break;
            }
            if control.status() != Some(Status::Write) {
                control.park_on_doorbell(seen, self.settings.idle_park);
                continue;
            }
            let step = match control.mode() {
                Some(Mode::Sync) => self.drain_sync(),
                _ => self.drain_async(),
            };
            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(err) if err.is_halted() => break,
                Err(err) => {
                    log::error!("drainer stopping on fatal error: {err}");
                    let _ = self.notices.send(Notice::Fatal(err));
                    break;
                }
            }
        }
        log::debug!("drainer loop exited");
    }

    fn drain_async(&mut self) -> ShuntResult<Flow> {
        let channel = Arc::clone(&self.channel);
        let control = channel.control();
        control.set_status(Status::Writing);
        let to = control.pos();
        // SAFETY: WRITING grants the drainer `[0, POS)`.
        let chunk = unsafe { channel.copy_out(0..to as usize) };
        self.deliver(&chunk, false);
        control.set_pos(0);
        control.publish_status(Status::Ready);

        if self.notices.send(Notice::Accepted { len: to }).is_err() {
            return Ok(Flow::Stop);
        }
        match self.acks.recv() {
            Ok(()) => Ok(Flow::Continue),
            Err(_) => Ok(Flow::Stop),
        }
    }

    fn drain_sync(&mut self) -> ShuntResult<Flow> {
        let channel = Arc::clone(&self.channel);
        let control = channel.control();
        let barrier = control.barrier();

        control.publish_status(Status::Writing);
        barrier.wait()?;

        let resident = control.pos() as usize;
        if resident > 0 {
            // SAFETY: the emitter does not touch the data block until the next rendezvous.
            let chunk = unsafe { channel.copy_out(0..resident) };
            self.deliver(&chunk, true);
            barrier.wait()?;
        }

        loop {
            barrier.wait()?;
            barrier.wait()?;
            match control.next() {
                Next::More => {
                    let to = control.pos() as usize;
                    // SAFETY: as above; the segment stays put until it is confirmed.
                    let chunk = unsafe { channel.copy_out(0..to) };
                    self.deliver(&chunk, true);
                    barrier.wait()?;
                }
                Next::Done => {
                    control.set_pos(0);
                    control.set_next(Next::Pending);
                    control.set_mode(Mode::Async);
                    control.publish_status(Status::Ready);
                    return Ok(Flow::Continue);
                }
                Next::Pending => {
                    return Err(ShuntError::WorkerCrash(
                        "sync flush step published without a side-channel value".into(),
                    ));
                }
            }
        }
    }

    fn deliver(&mut self, chunk: &[u8], sync_flush: bool) {
        let transport = &mut self.transport;
        let outcome = deliver_with_retries(chunk, sync_flush, self.settings.retries, |bytes| {
            transport.write(bytes, sync_flush)
        });
        if let Err(err) = outcome {
            let _ = self.notices.send(Notice::Failed(err));
        }
    }
}

/// Calls `attempt` until it succeeds or `retries` extra attempts are used up.
/// Empty chunks are never delivered.
pub(crate) fn deliver_with_retries(
    chunk: &[u8],
    sync_flush: bool,
    retries: u32,
    mut attempt: impl FnMut(&[u8]) -> anyhow::Result<()>,
) -> Result<(), TransportError> {
    if chunk.is_empty() {
        return Ok(());
    }
    let mut tries = 0;
    loop {
        match attempt(chunk) {
            Ok(()) => {
                log::trace!("delivered {} bytes (sync_flush={sync_flush})", chunk.len());
                return Ok(());
            }
            Err(err) if tries < retries => {
                tries += 1;
                log::warn!(
                    "transport rejected {} bytes (attempt {tries}/{}): {err:#}",
                    chunk.len(),
                    retries + 1
                );
            }
            Err(err) => {
                log::error!(
                    "dropping {} bytes after {} failed attempts: {err:#}",
                    chunk.len(),
                    tries + 1
                );
                return Err(TransportError::new(chunk.len(), sync_flush, err));
            }
        }
    }
}
