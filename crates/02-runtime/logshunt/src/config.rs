//! Emitter configuration.
//!
//! Every field has a default so a TOML document only needs to name the
//! transport. `options` is handed to the transport factory untouched.

use std::time::Duration;

use serde::Deserialize;
use shunt_shm::MAX_CAPACITY;

use crate::error::{ShuntError, ShuntResult};

/// Opaque pass-through options for a transport factory.
pub type TransportOptions = toml::Table;

pub const DEFAULT_CAPACITY: usize = 16 * 1024 * 1024;
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 2;
pub const DEFAULT_IDLE_PARK_MS: u64 = 50;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitterConfig {
    /// Registry locator of the transport factory.
    pub transport: String,
    /// Data block size in bytes.
    pub capacity: usize,
    /// Upper bound for `flush_sync` and for joining the drainer on destroy.
    pub timeout_ms: u64,
    /// Spawn a fresh drainer when the current one exits unexpectedly.
    pub respawn_worker: bool,
    /// Extra attempts for a failing chunk before it is dropped and reported.
    pub transport_retries: u32,
    /// Longest single park of an idle drainer.
    pub idle_park_ms: u64,
    pub options: TransportOptions,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            transport: String::new(),
            capacity: DEFAULT_CAPACITY,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            respawn_worker: true,
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            idle_park_ms: DEFAULT_IDLE_PARK_MS,
            options: TransportOptions::new(),
        }
    }
}

impl EmitterConfig {
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(src: &str) -> ShuntResult<Self> {
        let config: Self = toml::from_str(src)
            .map_err(|err| ShuntError::config(format!("failed to parse emitter config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_respawn(mut self, respawn_worker: bool) -> Self {
        self.respawn_worker = respawn_worker;
        self
    }

    pub fn with_transport_retries(mut self, retries: u32) -> Self {
        self.transport_retries = retries;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn idle_park(&self) -> Duration {
        Duration::from_millis(self.idle_park_ms)
    }

    /// Checks the numeric bounds. The locator is checked by the registry.
    pub fn validate(&self) -> ShuntResult<()> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(ShuntError::config(format!(
                "capacity {} must be between 1 and {MAX_CAPACITY} bytes",
                self.capacity
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ShuntError::config("timeout_ms must be non-zero"));
        }
        if self.idle_park_ms == 0 {
            return Err(ShuntError::config("idle_park_ms must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_fills_in_defaults() {
        let config = EmitterConfig::from_toml_str(
            r#"
            transport = "file"

            [options]
            path = "/tmp/app.log"
            append = false
            "#,
        )
        .expect("parse config");

        assert_eq!(config.transport, "file");
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(config.respawn_worker);
        assert_eq!(
            config.options.get("path").and_then(toml::Value::as_str),
            Some("/tmp/app.log")
        );
        assert_eq!(
            config.options.get("append").and_then(toml::Value::as_bool),
            Some(false)
        );
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EmitterConfig::from_toml_str("transport = \"null\"\ncapacity = 0")
            .expect_err("zero capacity");
        assert!(matches!(err, ShuntError::Configuration(_)));

        let err = EmitterConfig::from_toml_str("transport = \"null\"\ntimeout_ms = 0")
            .expect_err("zero timeout");
        assert!(matches!(err, ShuntError::Configuration(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = EmitterConfig::from_toml_str("transport = \"null\"\nbuffer = 12")
            .expect_err("unknown key");
        assert!(err.to_string().contains("buffer"));
    }

    #[test]
    fn builder_helpers_compose() {
        let config = EmitterConfig::new("memory")
            .with_capacity(64)
            .with_timeout(Duration::from_millis(250))
            .with_respawn(false)
            .with_transport_retries(0)
            .with_option("label", "audit");
        assert_eq!(config.capacity, 64);
        assert_eq!(config.timeout_ms, 250);
        assert!(!config.respawn_worker);
        assert_eq!(config.transport_retries, 0);
        assert!(config.validate().is_ok());
    }
}
