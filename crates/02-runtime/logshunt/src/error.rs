use std::io;
use std::time::Duration;

use shunt_shm::ShmError;
use thiserror::Error;

use crate::sink::TransportError;

pub type ShuntResult<T> = Result<T, ShuntError>;

#[derive(Debug, Error)]
pub enum ShuntError {
    #[error("invalid emitter configuration: {0}")]
    Configuration(String),

    #[error("inconsistent mutex state (unlock on unlocked mutex)")]
    MutexInconsistency,

    #[error(
        "flush_sync timed out after {} ms with {} bytes unflushed",
        .waited.as_millis(),
        .unflushed.len()
    )]
    FlushTimeout { waited: Duration, unflushed: Vec<u8> },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("emitter already destroyed")]
    AlreadyDestroyed,

    #[error("drainer worker crashed: {0}")]
    WorkerCrash(String),

    #[error("shared region error: {0}")]
    Region(ShmError),

    #[error("failed to spawn drainer worker: {0}")]
    Io(#[from] io::Error),
}

impl ShuntError {
    pub fn config(msg: impl Into<String>) -> Self {
        ShuntError::Configuration(msg.into())
    }

    pub(crate) fn is_timeout(&self) -> bool {
        matches!(self, ShuntError::Region(ShmError::TimedOut { .. }))
    }

    pub(crate) fn is_halted(&self) -> bool {
        matches!(self, ShuntError::Region(ShmError::Halted))
    }
}

impl From<ShmError> for ShuntError {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::MutexInconsistency => ShuntError::MutexInconsistency,
            other => ShuntError::Region(other),
        }
    }
}
