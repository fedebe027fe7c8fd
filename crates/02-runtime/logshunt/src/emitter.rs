//! Producer side of the handoff.
//!
//! The emitter owns the data block while STATUS is READY and always owns the
//! bytes at or past the published POS, so `write` keeps appending behind an
//! in-flight drain. Payloads that do not fit go to the [`Cache`] in order.
//!
//! Producer state lives behind a mutex shared with a watcher thread. The
//! watcher handles drainer notices as they arrive, so an accepted cycle is
//! refilled and retriggered while the caller is idle. Blocking calls wait on
//! a condition variable the watcher signals after every notice.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use shunt_shm::{HandoffChannel, Mode, Next, ShmError, Status};

use crate::cache::Cache;
use crate::config::EmitterConfig;
use crate::drainer::{deliver_with_retries, DrainerSettings};
use crate::error::{ShuntError, ShuntResult};
use crate::events::{EmitterEvent, EventQueue};
use crate::registry::TransportRegistry;
use crate::sink::{Transport, TransportFactory};
use crate::worker::{self, Notice, WorkerHandle};

pub struct Emitter {
    shared: Arc<Shared>,
    config: EmitterConfig,
    capacity: usize,
    watcher: Option<JoinHandle<()>>,
}

struct Shared {
    core: Mutex<Core>,
    /// Signalled after the watcher handled a notice.
    progress: Condvar,
}

struct Core {
    config: EmitterConfig,
    factory: TransportFactory,
    channel: Arc<HandoffChannel>,
    cache: Cache,
    /// End of the emitter's bytes in the data block.
    pos: usize,
    /// A drain cycle was published and not yet accepted.
    writing: bool,
    /// `flush_sync` owns the channel; accepted cycles are not retriggered.
    flushing: bool,
    worker: Option<WorkerHandle>,
    /// Handed to every drainer this emitter spawns.
    notices: Sender<Notice>,
    /// In-process transport used once no drainer is available.
    fallback: Option<Box<dyn Transport>>,
    events: EventQueue,
    generation: u64,
    unref: bool,
    destroyed: bool,
}

impl Emitter {
    /// Resolves `config.transport` in `registry` and starts the drainer.
    pub fn new(config: EmitterConfig, registry: &TransportRegistry) -> ShuntResult<Self> {
        let factory = registry.resolve(&config.transport)?;
        Self::with_factory(config, factory)
    }

    /// Starts an emitter on an explicit transport factory; `config.transport`
    /// is informational only.
    pub fn with_factory(config: EmitterConfig, factory: TransportFactory) -> ShuntResult<Self> {
        config.validate()?;
        let transport = factory(&config.options).map_err(|err| {
            ShuntError::config(format!(
                "transport `{}` failed to initialise: {err:#}",
                config.transport
            ))
        })?;
        let channel = Arc::new(HandoffChannel::new(config.capacity)?);
        let capacity = channel.capacity();
        let (notices, notice_rx) = crossbeam_channel::unbounded();
        let settings = drainer_settings(&config);
        let worker = worker::spawn(Arc::clone(&channel), transport, settings, notices.clone(), 1)?;
        log::debug!(
            "emitter started (transport={}, capacity={}, mapped={})",
            config.transport,
            capacity,
            channel.is_mapped()
        );

        let shared = Arc::new(Shared {
            core: Mutex::new(Core {
                config: config.clone(),
                factory,
                channel,
                cache: Cache::new(),
                pos: 0,
                writing: false,
                flushing: false,
                worker: Some(worker),
                notices,
                fallback: None,
                events: EventQueue::new(),
                generation: 1,
                unref: false,
                destroyed: false,
            }),
            progress: Condvar::new(),
        });

        let slice = config.idle_park();
        let spawned = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("logshunt-watcher".into())
                .spawn(move || shared.watch(&notice_rx, slice))
        };
        let watcher = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                shared.core.lock().destroy_within(None, Duration::ZERO);
                return Err(err.into());
            }
        };

        Ok(Self {
            shared,
            config,
            capacity,
            watcher: Some(watcher),
        })
    }

    /// Receiver for lifecycle events. Receivers share one queue.
    pub fn events(&self) -> Receiver<EmitterEvent> {
        self.shared.core.lock().events.subscribe()
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes written but not yet handed to the transport.
    pub fn pending_bytes(&self) -> usize {
        self.shared.core.lock().pending_bytes()
    }

    pub fn is_writing(&self) -> bool {
        self.shared.core.lock().writing
    }

    /// True once the drainer exited and was not replaced.
    pub fn is_degraded(&self) -> bool {
        let core = self.shared.core.lock();
        !core.destroyed && core.worker.is_none()
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.core.lock().destroyed
    }

    /// Queues `data` for draining without blocking on the transport.
    ///
    /// Returns `false` when the caller should wait for [`EmitterEvent::Drain`]
    /// before writing more: part of `data` went to the overflow cache, or no
    /// drainer is running.
    pub fn write(&mut self, data: &[u8]) -> ShuntResult<bool> {
        self.shared.core.lock().write(data)
    }

    /// Starts a drain cycle unless one is already in flight.
    pub fn flush(&mut self) -> ShuntResult<()> {
        self.shared.core.lock().flush()
    }

    /// Blocks until every pending byte reached the transport, or the
    /// configured timeout elapses.
    ///
    /// On timeout the emitter is destroyed and the error carries the bytes
    /// that were not confirmed delivered.
    pub fn flush_sync(&mut self) -> ShuntResult<()> {
        let mut core = self.shared.core.lock();
        self.shared.flush_sync(&mut core)
    }

    /// `flush_sync` followed by `destroy`.
    pub fn end(&mut self) -> ShuntResult<()> {
        let mut core = self.shared.core.lock();
        self.shared.flush_sync(&mut core)?;
        core.destroy(None);
        Ok(())
    }

    /// Waits until the in-flight drain cycles settle or `timeout` elapses.
    /// Returns whether everything was handed off.
    pub fn wait_for_drain(&mut self, timeout: Duration) -> ShuntResult<bool> {
        let mut core = self.shared.core.lock();
        core.ensure_live()?;
        let deadline = Instant::now() + timeout;
        while core.writing && Instant::now() < deadline {
            let _ = self.shared.progress.wait_until(&mut core, deadline);
        }
        Ok(!core.writing && core.pending_bytes() == 0)
    }

    /// Stops `destroy` and `Drop` from waiting for background threads.
    pub fn unref(&mut self) {
        let mut core = self.shared.core.lock();
        core.unref = true;
        if let Some(worker) = core.worker.as_mut() {
            worker.detach();
        }
    }

    /// Halts the drainer and closes the emitter. Idempotent.
    ///
    /// Emits `Error(err)` when given, then `Close`. Bytes still pending are
    /// discarded; use `end` to flush first.
    pub fn destroy(&mut self, err: Option<ShuntError>) {
        self.shared.core.lock().destroy(err);
    }
}

impl Drop for Emitter {
    fn drop(&mut self) {
        let unref = {
            let mut core = self.shared.core.lock();
            if !core.destroyed {
                if let Err(err) = self.shared.flush_sync(&mut core) {
                    log::warn!("flush on drop failed: {err}");
                }
                core.destroy(None);
            }
            core.unref
        };
        let Some(watcher) = self.watcher.take() else {
            return;
        };
        if !unref && watcher.join().is_err() {
            log::error!("notice watcher panicked");
        }
    }
}

impl Shared {
    /// Watcher loop: hands every drainer notice to the core until the
    /// emitter is destroyed.
    fn watch(&self, notices: &Receiver<Notice>, slice: Duration) {
        loop {
            let live = match notices.recv_timeout(slice) {
                Ok(notice) => self.dispatch(notice),
                Err(RecvTimeoutError::Timeout) => !self.core.lock().destroyed,
                Err(RecvTimeoutError::Disconnected) => false,
            };
            if !live {
                break;
            }
        }
        log::debug!("notice watcher exited");
    }

    fn dispatch(&self, notice: Notice) -> bool {
        let mut core = self.core.lock();
        if core.destroyed {
            return false;
        }
        core.handle_notice(notice);
        let live = !core.destroyed;
        drop(core);
        self.progress.notify_all();
        live
    }

    fn flush_sync(&self, core: &mut MutexGuard<'_, Core>) -> ShuntResult<()> {
        core.ensure_live()?;
        core.flushing = true;
        let outcome = self.drain_blocking(core);
        core.flushing = false;
        outcome
    }

    fn drain_blocking(&self, core: &mut MutexGuard<'_, Core>) -> ShuntResult<()> {
        let started = Instant::now();
        let deadline = started + core.config.timeout();

        loop {
            if core.worker.is_none() && core.config.respawn_worker {
                core.respawn();
            }
            if core.worker.is_none() {
                core.fallback_flush();
                return Ok(());
            }

            match self.settle(core, started, deadline) {
                Ok(()) => {}
                Err(err) if err.is_timeout() => return Err(core.fail_timeout(started)),
                Err(err) => return Err(core.fail_fatal(err)),
            }
            if core.worker.is_none() {
                continue;
            }
            if core.pos == 0 && core.cache.is_empty() {
                return Ok(());
            }

            match core.sync_rendezvous(deadline) {
                Ok(()) => {
                    core.pos = 0;
                    core.writing = false;
                    core.events.emit(EmitterEvent::Drain);
                    return Ok(());
                }
                Err(err) if err.is_halted() => {
                    log::warn!("drainer halted during flush_sync; recovering");
                    match self.await_exit(core, started, deadline) {
                        Ok(()) => continue,
                        Err(err) if err.is_timeout() => return Err(core.fail_timeout(started)),
                        Err(err) => return Err(core.fail_fatal(err)),
                    }
                }
                Err(err) if err.is_timeout() => return Err(core.fail_timeout(started)),
                Err(err) => return Err(core.fail_fatal(err)),
            }
        }
    }

    /// Waits for an in-flight async cycle to be accepted without starting a new one.
    fn settle(
        &self,
        core: &mut MutexGuard<'_, Core>,
        started: Instant,
        deadline: Instant,
    ) -> ShuntResult<()> {
        while core.writing && core.worker.is_some() {
            if Instant::now() >= deadline {
                return Err(timed_out(started));
            }
            let _ = self.progress.wait_until(core, deadline);
        }
        Ok(())
    }

    /// After a halt observed mid-flush, waits until the watcher has run the
    /// crash path for the current drainer.
    fn await_exit(
        &self,
        core: &mut MutexGuard<'_, Core>,
        started: Instant,
        deadline: Instant,
    ) -> ShuntResult<()> {
        core.writing = false;
        let generation = core.generation;
        while core
            .worker
            .as_ref()
            .is_some_and(|worker| worker.generation() == generation)
        {
            if Instant::now() >= deadline {
                return Err(timed_out(started));
            }
            let _ = self.progress.wait_until(core, deadline);
        }
        Ok(())
    }
}

impl Core {
    fn ensure_live(&self) -> ShuntResult<()> {
        if self.destroyed {
            Err(ShuntError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }

    fn pending_bytes(&self) -> usize {
        self.pos + self.cache.len()
    }

    fn writable(&self) -> bool {
        self.cache.is_empty() && self.worker.is_some()
    }

    fn write(&mut self, data: &[u8]) -> ShuntResult<bool> {
        self.ensure_live()?;
        if data.is_empty() {
            return Ok(self.writable());
        }

        let capacity = self.channel.capacity();
        if !self.cache.is_empty() || self.pos == capacity {
            self.cache.push(data);
            if !self.writing {
                self.refill();
                self.trigger();
            }
            return Ok(false);
        }

        let take = data.len().min(capacity - self.pos);
        // SAFETY: the emitter owns `[pos, capacity)` regardless of STATUS.
        unsafe { self.channel.write_at(self.pos, &data[..take]) };
        self.pos += take;
        self.cache.push(&data[take..]);
        if !self.writing {
            self.trigger();
        }
        Ok(self.writable())
    }

    fn flush(&mut self) -> ShuntResult<()> {
        self.ensure_live()?;
        if self.writing {
            return Ok(());
        }
        self.refill();
        self.trigger();
        Ok(())
    }

    fn destroy(&mut self, err: Option<ShuntError>) {
        let grace = self.config.timeout();
        self.destroy_within(err, grace);
    }

    fn destroy_within(&mut self, err: Option<ShuntError>, grace: Duration) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(worker) = self.worker.take() {
            worker.terminate(&self.channel, grace);
        }
        let dropped = self.pending_bytes();
        if dropped > 0 {
            log::warn!("emitter destroyed with {dropped} bytes pending");
        }
        if let Some(err) = err {
            self.events.emit(EmitterEvent::Error(err));
        }
        self.events.emit(EmitterEvent::Close);
    }

    fn handle_notice(&mut self, notice: Notice) {
        match notice {
            Notice::Accepted { len } => self.on_accepted(len as usize),
            Notice::Failed(err) => self.events.emit(EmitterEvent::Error(err.into())),
            Notice::Fatal(err) => self.events.emit(EmitterEvent::Error(err)),
            Notice::Exited { panicked } => self.on_worker_exit(panicked),
        }
    }

    /// Publishes `[0, pos)` and rings the drainer.
    fn trigger(&mut self) {
        if self.worker.is_none() || self.pos == 0 {
            return;
        }
        self.writing = true;
        let control = self.channel.control();
        control.set_pos(self.pos as u32);
        control.set_status(Status::Write);
        control.ring();
    }

    fn on_accepted(&mut self, len: usize) {
        let len = len.min(self.pos);
        // SAFETY: the drainer is parked waiting for our ack and READY was
        // published, so the whole data block belongs to the emitter again.
        unsafe { self.channel.shift_to_front(len, self.pos) };
        self.pos -= len;
        self.writing = false;
        self.refill();

        if self.pos == 0 {
            self.events.emit(EmitterEvent::Drain);
        } else if !self.flushing {
            self.trigger();
        }
        if let Some(worker) = &self.worker {
            worker.ack();
        }
    }

    /// Moves cached bytes into the free tail of the data block.
    fn refill(&mut self) {
        let room = self.channel.capacity() - self.pos;
        if room == 0 || self.cache.is_empty() {
            return;
        }
        let channel = &self.channel;
        let mut end = self.pos;
        self.cache.fill(room, |bytes| {
            // SAFETY: `[pos, capacity)` is always emitter-owned.
            unsafe { channel.write_at(end, bytes) };
            end += bytes.len();
        });
        self.pos = end;
    }

    fn on_worker_exit(&mut self, panicked: bool) {
        let (generation, message) = match self.worker.take() {
            Some(worker) => (worker.generation(), worker.reap()),
            None => (self.generation, None),
        };
        self.channel.control().reset();
        self.writing = false;

        let reason = match (panicked, message) {
            (_, Some(message)) => format!("worker {generation} panicked: {message}"),
            (true, None) => format!("worker {generation} panicked"),
            (false, None) => format!("worker {generation} exited unexpectedly"),
        };
        log::error!("drainer {reason}");
        self.events.emit(EmitterEvent::Error(ShuntError::WorkerCrash(reason)));

        if self.config.respawn_worker && self.respawn() {
            self.trigger();
        } else {
            log::warn!("no drainer running; pending bytes go through the in-process transport");
            self.fallback_flush();
        }
    }

    fn respawn(&mut self) -> bool {
        let transport = match (self.factory)(&self.config.options) {
            Ok(transport) => transport,
            Err(err) => {
                log::error!("failed to recreate transport for a new drainer: {err:#}");
                self.events.emit(EmitterEvent::Error(ShuntError::WorkerCrash(format!(
                    "failed to recreate transport: {err:#}"
                ))));
                return false;
            }
        };
        self.generation += 1;
        self.channel.control().reset();
        let settings = drainer_settings(&self.config);
        let spawned = worker::spawn(
            Arc::clone(&self.channel),
            transport,
            settings,
            self.notices.clone(),
            self.generation,
        );
        match spawned {
            Ok(mut worker) => {
                if self.unref {
                    worker.detach();
                }
                log::warn!("respawned drainer worker {}", self.generation);
                self.worker = Some(worker);
                true
            }
            Err(err) => {
                log::error!("failed to respawn drainer: {err}");
                self.events.emit(EmitterEvent::Error(err));
                false
            }
        }
    }

    /// Delivers everything pending through the in-process transport.
    fn fallback_flush(&mut self) {
        if self.pending_bytes() == 0 {
            return;
        }
        if self.fallback.is_none() {
            match (self.factory)(&self.config.options) {
                Ok(transport) => self.fallback = Some(transport),
                Err(err) => {
                    log::error!("failed to create fallback transport: {err:#}");
                    self.events.emit(EmitterEvent::Error(ShuntError::WorkerCrash(format!(
                        "failed to create fallback transport: {err:#}"
                    ))));
                    return;
                }
            }
        }
        let Some(transport) = self.fallback.as_mut() else {
            return;
        };
        log::warn!(
            "delivering {} bytes through the in-process fallback transport",
            self.pos + self.cache.len()
        );

        let retries = self.config.transport_retries;
        let capacity = self.channel.capacity();
        let mut failures = Vec::new();
        // SAFETY: no drainer is running, so the emitter owns the whole data block.
        let resident = unsafe { self.channel.copy_out(0..self.pos) };
        self.pos = 0;
        if let Err(err) =
            deliver_with_retries(&resident, true, retries, |bytes| transport.write_sync(bytes))
        {
            failures.push(err);
        }
        let mut segment = Vec::with_capacity(capacity.min(self.cache.len()));
        while !self.cache.is_empty() {
            segment.clear();
            self.cache
                .fill(capacity, |bytes| segment.extend_from_slice(bytes));
            if let Err(err) =
                deliver_with_retries(&segment, true, retries, |bytes| transport.write_sync(bytes))
            {
                failures.push(err);
            }
        }

        for err in failures {
            self.events.emit(EmitterEvent::Error(err.into()));
        }
        self.events.emit(EmitterEvent::Drain);
    }

    /// Runs the emitter half of the sync-flush rendezvous.
    fn sync_rendezvous(&mut self, deadline: Instant) -> ShuntResult<()> {
        let channel = Arc::clone(&self.channel);
        let control = channel.control();
        let barrier = control.barrier();
        let capacity = channel.capacity();

        control.set_mode(Mode::Sync);
        control.set_next(Next::Pending);
        control.set_pos(self.pos as u32);
        control.set_status(Status::Write);
        control.ring();
        self.writing = true;

        // Drainer observed the request.
        barrier.wait_until(deadline)?;
        if self.pos > 0 {
            // Resident segment delivered.
            barrier.wait_until(deadline)?;
            self.pos = 0;
        }

        while !self.cache.is_empty() {
            barrier.wait_until(deadline)?;
            control.set_next(Next::More);
            let mut end = 0;
            self.cache.fill(capacity, |bytes| {
                // SAFETY: the drainer is parked on the next rendezvous and
                // does not read the data block until it is published.
                unsafe { channel.write_at(end, bytes) };
                end += bytes.len();
            });
            self.pos = end;
            control.set_pos(end as u32);
            barrier.wait_until(deadline)?;
            barrier.wait_until(deadline)?;
            self.pos = 0;
        }

        barrier.wait_until(deadline)?;
        control.set_next(Next::Done);
        barrier.wait_until(deadline)?;
        control.await_status(Status::Ready, Some(deadline))?;
        Ok(())
    }

    fn fail_timeout(&mut self, started: Instant) -> ShuntError {
        let waited = started.elapsed();
        // SAFETY: read-only copy; the drainer never writes the data block.
        let mut unflushed = unsafe { self.channel.copy_out(0..self.pos) };
        unflushed.extend(self.cache.snapshot());
        log::error!(
            "flush_sync timed out after {:?} with {} bytes unflushed",
            waited,
            unflushed.len()
        );
        self.destroy_within(None, Duration::ZERO);
        ShuntError::FlushTimeout { waited, unflushed }
    }

    fn fail_fatal(&mut self, err: ShuntError) -> ShuntError {
        log::error!("flush_sync failed: {err}");
        let reported = match &err {
            ShuntError::MutexInconsistency => Some(ShuntError::MutexInconsistency),
            _ => None,
        };
        self.destroy_within(reported, Duration::ZERO);
        err
    }
}

fn drainer_settings(config: &EmitterConfig) -> DrainerSettings {
    DrainerSettings {
        retries: config.transport_retries,
        idle_park: config.idle_park(),
    }
}

fn timed_out(started: Instant) -> ShuntError {
    ShmError::TimedOut {
        waited: started.elapsed(),
    }
    .into()
}
