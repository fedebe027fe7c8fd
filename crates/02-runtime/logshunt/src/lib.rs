//! Non-blocking log output through a shared-memory handoff.
//!
//! An [`Emitter`] copies log bytes into a fixed data block and a drainer
//! thread hands them to a [`Transport`]. `write` never blocks on the sink;
//! `flush_sync` is the bounded, blocking drain meant for shutdown.
//! [`DirectWriter`] skips the drainer and writes on the caller's thread.
//!
//! ```no_run
//! use logshunt::{Emitter, EmitterConfig, TransportRegistry};
//!
//! # fn main() -> logshunt::ShuntResult<()> {
//! let config = EmitterConfig::new("stderr").with_capacity(64 * 1024);
//! let mut emitter = Emitter::new(config, &TransportRegistry::with_builtins())?;
//! emitter.write(b"service started\n")?;
//! emitter.end()?;
//! # Ok(())
//! # }
//! ```

mod cache;
mod config;
mod direct;
mod drainer;
mod emitter;
mod error;
mod events;
mod registry;
mod sink;
mod worker;

pub use config::{
    EmitterConfig, TransportOptions, DEFAULT_CAPACITY, DEFAULT_IDLE_PARK_MS, DEFAULT_TIMEOUT_MS,
    DEFAULT_TRANSPORT_RETRIES,
};
pub use direct::{Destination, DirectWriter};
pub use emitter::Emitter;
pub use error::{ShuntError, ShuntResult};
pub use events::EmitterEvent;
pub use registry::{FileSink, NullSink, StreamSink, TransportRegistry};
pub use sink::{factory, Delivery, FnTransport, MemorySink, Transport, TransportError, TransportFactory};
pub use shunt_shm::{ShmError, MAX_CAPACITY};
