//! Locator → transport factory lookup, plus the built-in sinks.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::TransportOptions;
use crate::error::{ShuntError, ShuntResult};
use crate::sink::{factory, Transport, TransportFactory};

#[derive(Clone, Default)]
pub struct TransportRegistry {
    factories: HashMap<String, TransportFactory>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `stdout`, `stderr`, `null` and `file`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                "stdout",
                factory(|_| Ok(Box::new(StreamSink::stdout()) as Box<dyn Transport>)),
            )
            .register(
                "stderr",
                factory(|_| Ok(Box::new(StreamSink::stderr()) as Box<dyn Transport>)),
            )
            .register("null", factory(|_| Ok(Box::new(NullSink) as Box<dyn Transport>)))
            .register(
                "file",
                factory(|options| {
                    Ok(Box::new(FileSink::from_options(options)?) as Box<dyn Transport>)
                }),
            );
        registry
    }

    /// Registers `factory` under `locator`, replacing any previous entry.
    pub fn register(&mut self, locator: impl Into<String>, factory: TransportFactory) -> &mut Self {
        self.factories.insert(locator.into(), factory);
        self
    }

    pub fn contains(&self, locator: &str) -> bool {
        self.factories.contains_key(locator)
    }

    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn resolve(&self, locator: &str) -> ShuntResult<TransportFactory> {
        if locator.trim().is_empty() {
            return Err(ShuntError::config("transport locator is empty"));
        }
        self.factories
            .get(locator)
            .cloned()
            .ok_or_else(|| {
                let mut known: Vec<_> = self.locators().collect();
                known.sort_unstable();
                ShuntError::config(format!(
                    "unknown transport `{locator}` (registered: {})",
                    known.join(", ")
                ))
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Writes chunks to the process's stdout or stderr.
#[derive(Debug)]
pub struct StreamSink {
    stream: Stream,
}

impl StreamSink {
    pub fn stdout() -> Self {
        Self {
            stream: Stream::Stdout,
        }
    }

    pub fn stderr() -> Self {
        Self {
            stream: Stream::Stderr,
        }
    }
}

impl Transport for StreamSink {
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()> {
        fn emit(mut out: impl Write, chunk: &[u8], sync_flush: bool) -> io::Result<()> {
            out.write_all(chunk)?;
            if sync_flush {
                out.flush()?;
            }
            Ok(())
        }
        let written = match self.stream {
            Stream::Stdout => emit(io::stdout().lock(), chunk, sync_flush),
            Stream::Stderr => emit(io::stderr().lock(), chunk, sync_flush),
        };
        written.with_context(|| format!("writing {} bytes to {:?}", chunk.len(), self.stream))
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        let flushed = match self.stream {
            Stream::Stdout => io::stdout().flush(),
            Stream::Stderr => io::stderr().flush(),
        };
        flushed.with_context(|| format!("flushing {:?}", self.stream))
    }
}

/// Discards every chunk.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl Transport for NullSink {
    fn write(&mut self, _chunk: &[u8], _sync_flush: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Appends (or truncates and writes) chunks to a file.
/// Sync-flush chunks are followed by `sync_data`.
#[derive(Debug)]
pub struct FileSink {
    file: File,
    path: PathBuf,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>, append: bool) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options.open(&path)?;
        Ok(Self { file, path })
    }

    /// Reads `path` (string, required) and `append` (bool, default true).
    pub fn from_options(options: &TransportOptions) -> anyhow::Result<Self> {
        let path = options
            .get("path")
            .and_then(toml::Value::as_str)
            .ok_or_else(|| anyhow!("file transport requires a string `path` option"))?;
        let append = match options.get("append") {
            None => true,
            Some(value) => value
                .as_bool()
                .ok_or_else(|| anyhow!("file transport option `append` must be a boolean"))?,
        };
        Self::open(path, append).with_context(|| format!("opening log file {path}"))
    }
}

impl Transport for FileSink {
    fn write(&mut self, chunk: &[u8], sync_flush: bool) -> anyhow::Result<()> {
        self.file
            .write_all(chunk)
            .with_context(|| format!("appending to {}", self.path.display()))?;
        if sync_flush {
            self.file
                .sync_data()
                .with_context(|| format!("syncing {}", self.path.display()))?;
        }
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        self.file
            .sync_data()
            .with_context(|| format!("syncing {}", self.path.display()))
    }
}
