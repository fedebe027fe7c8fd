//! The transport abstraction: where drained bytes end up.

use std::error::Error as StdError;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::config::TransportOptions;

/// Sink for drained byte chunks.
///
/// `write` is called from the drainer thread with each chunk in order;
/// `sync_flush` is set for chunks delivered during `flush_sync`.
/// `write_sync` is the entry point of the in-process fallback used when no
/// drainer is available. `flush` pushes buffered output to its destination.
pub trait Transport: Send {
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()>;

    fn write_sync(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        self.write(chunk, true)
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()> {
        (**self).write(chunk, sync_flush)
    }

    fn write_sync(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        (**self).write_sync(chunk)
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        (**self).flush()
    }
}

/// Builds a transport instance from pass-through options.
pub type TransportFactory =
    Arc<dyn Fn(&TransportOptions) -> anyhow::Result<Box<dyn Transport>> + Send + Sync>;

pub fn factory<F>(f: F) -> TransportFactory
where
    F: Fn(&TransportOptions) -> anyhow::Result<Box<dyn Transport>> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A chunk the transport rejected after all retries.
#[derive(Debug, Error)]
#[error("transport rejected {len}-byte chunk (sync_flush={sync_flush}): {source}")]
pub struct TransportError {
    pub len: usize,
    pub sync_flush: bool,
    #[source]
    pub source: Box<dyn StdError + Send + Sync + 'static>,
}

impl TransportError {
    pub fn new(len: usize, sync_flush: bool, err: anyhow::Error) -> Self {
        Self {
            len,
            sync_flush,
            source: err.into(),
        }
    }
}

/// Adapts a closure into a [`Transport`].
pub struct FnTransport<F>(F);

impl<F> FnTransport<F>
where
    F: FnMut(&[u8], bool) -> anyhow::Result<()> + Send,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Transport for FnTransport<F>
where
    F: FnMut(&[u8], bool) -> anyhow::Result<()> + Send,
{
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()> {
        (self.0)(chunk, sync_flush)
    }
}

/// Delivery record kept by [`MemorySink`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub len: usize,
    pub sync_flush: bool,
}

/// In-memory collector. Clones share the same buffer, so the drainer's
/// instance and the fallback instance append to one byte stream.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    bytes: Arc<Mutex<Vec<u8>>>,
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory handing out clones of this sink.
    pub fn factory(&self) -> TransportFactory {
        let sink = self.clone();
        factory(move |_| Ok(Box::new(sink.clone()) as Box<dyn Transport>))
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.bytes.lock())
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }
}

impl Transport for MemorySink {
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()> {
        self.bytes.lock().extend_from_slice(chunk);
        self.deliveries.lock().push(Delivery {
            len: chunk.len(),
            sync_flush,
        });
        Ok(())
    }
}
