//! Worker-less output: every write goes straight to the destination on the
//! caller's thread.

use std::path::PathBuf;

use crate::config::TransportOptions;
use crate::error::{ShuntError, ShuntResult};
use crate::registry::{FileSink, StreamSink};
use crate::sink::{Transport, TransportError};

/// Where a [`DirectWriter`] sends its bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    Stderr,
    File { path: PathBuf, append: bool },
}

impl Destination {
    /// Reads `dest` (file path, with `append` defaulting to true) or `fd`
    /// (1 or 2). With neither set the destination is stdout.
    pub fn from_options(options: &TransportOptions) -> ShuntResult<Self> {
        if let Some(dest) = options.get("dest") {
            let path = dest
                .as_str()
                .ok_or_else(|| ShuntError::config("`dest` must be a string path"))?;
            let append = match options.get("append") {
                None => true,
                Some(value) => value
                    .as_bool()
                    .ok_or_else(|| ShuntError::config("`append` must be a boolean"))?,
            };
            return Ok(Destination::File {
                path: PathBuf::from(path),
                append,
            });
        }
        match options.get("fd").map(|fd| fd.as_integer()) {
            None | Some(Some(1)) => Ok(Destination::Stdout),
            Some(Some(2)) => Ok(Destination::Stderr),
            Some(Some(fd)) => Err(ShuntError::config(format!(
                "fd {fd} is not supported; use 1, 2 or `dest`"
            ))),
            Some(None) => Err(ShuntError::config("`fd` must be an integer")),
        }
    }
}

/// Synchronous writer with the emitter's surface and no drainer.
///
/// Transport errors are returned from the call that hit them.
pub struct DirectWriter {
    sink: Box<dyn Transport>,
    destroyed: bool,
}

impl DirectWriter {
    pub fn open(destination: Destination) -> ShuntResult<Self> {
        let sink: Box<dyn Transport> = match &destination {
            Destination::Stdout => Box::new(StreamSink::stdout()),
            Destination::Stderr => Box::new(StreamSink::stderr()),
            Destination::File { path, append } => {
                let file = FileSink::open(path, *append).map_err(|err| {
                    ShuntError::config(format!("cannot open {}: {err}", path.display()))
                })?;
                Box::new(file)
            }
        };
        log::debug!("direct writer opened on {destination:?}");
        Ok(Self {
            sink,
            destroyed: false,
        })
    }

    pub fn from_options(options: &TransportOptions) -> ShuntResult<Self> {
        Self::open(Destination::from_options(options)?)
    }

    /// Writes `data` before returning. Never reports backpressure.
    pub fn write(&mut self, data: &[u8]) -> ShuntResult<bool> {
        self.ensure_live()?;
        if !data.is_empty() {
            self.sink
                .write(data, false)
                .map_err(|err| TransportError::new(data.len(), false, err))?;
        }
        Ok(true)
    }

    /// Nothing is buffered between calls, so there is nothing to start.
    pub fn flush(&mut self) -> ShuntResult<()> {
        self.ensure_live()
    }

    /// Flushes the destination's own buffers.
    pub fn flush_sync(&mut self) -> ShuntResult<()> {
        self.ensure_live()?;
        self.sink
            .flush()
            .map_err(|err| TransportError::new(0, true, err))?;
        Ok(())
    }

    pub fn end(&mut self) -> ShuntResult<()> {
        self.flush_sync()?;
        self.destroyed = true;
        Ok(())
    }

    pub fn destroy(&mut self) {
        self.destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    fn ensure_live(&self) -> ShuntResult<()> {
        if self.destroyed {
            Err(ShuntError::AlreadyDestroyed)
        } else {
            Ok(())
        }
    }
}
