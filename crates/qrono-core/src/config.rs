//! Worker configuration (spec.md §6's option table), built the way the
//! teacher crate builds `RuntimeBuilder`/`EngineBuilder`: a plain struct
//! with sensible defaults plus a fluent builder.
//!
//! Default values are ported directly from `original_source/client.go`'s
//! `NewClient` defaulting block.

use crate::tenant::{HeaderOwnerSetter, SharedOwnerSetter};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration from the environment: {0}")]
    Env(#[from] config::ConfigError),
}

/// Tunables for one [`crate::engine::Worker`] (spec.md §6).
#[derive(Clone)]
pub struct WorkerConfig {
    /// Claim batch size / in-flight cap. Default 100.
    pub max_in_flight: u64,
    /// Dispatch tick period. Default 1s.
    pub poll_interval: Duration,
    /// Batcher tick period. Default 1s.
    pub flush_interval: Duration,
    /// Batcher size threshold. Default 100.
    pub max_flush_size: usize,
    /// Reaper tick period. Default 60s.
    pub reset_interval: Duration,
    /// Maximum `retries` a caller may request at `create` time. Default 20.
    pub max_retries: i32,
    /// Middleware binding caller identity to a `TenantScope`.
    pub owner_setter: SharedOwnerSetter,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("max_in_flight", &self.max_in_flight)
            .field("poll_interval", &self.poll_interval)
            .field("flush_interval", &self.flush_interval)
            .field("max_flush_size", &self.max_flush_size)
            .field("reset_interval", &self.reset_interval)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            poll_interval: Duration::from_secs(1),
            flush_interval: Duration::from_secs(1),
            max_flush_size: 100,
            reset_interval: Duration::from_secs(60),
            max_retries: crate::job::DEFAULT_MAX_RETRIES,
            owner_setter: Arc::new(HeaderOwnerSetter::default()),
        }
    }
}

/// Fluent builder over [`WorkerConfig`], mirroring the teacher's
/// `RuntimeBuilder`/`EngineBuilder` style.
#[derive(Default)]
pub struct WorkerConfigBuilder {
    config: WorkerConfig,
}

impl WorkerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_in_flight(mut self, n: u64) -> Self {
        self.config.max_in_flight = n;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.config.poll_interval = d;
        self
    }

    pub fn flush_interval(mut self, d: Duration) -> Self {
        self.config.flush_interval = d;
        self
    }

    pub fn max_flush_size(mut self, n: usize) -> Self {
        self.config.max_flush_size = n;
        self
    }

    pub fn reset_interval(mut self, d: Duration) -> Self {
        self.config.reset_interval = d;
        self
    }

    pub fn max_retries(mut self, n: i32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn owner_setter(mut self, setter: SharedOwnerSetter) -> Self {
        self.config.owner_setter = setter;
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::new()
    }

    /// Layer environment overrides (`QRONO_MAX_IN_FLIGHT`,
    /// `QRONO_POLL_INTERVAL_MS`, `QRONO_FLUSH_INTERVAL_MS`,
    /// `QRONO_MAX_FLUSH_SIZE`, `QRONO_RESET_INTERVAL_MS`,
    /// `QRONO_MAX_RETRIES`) over the defaults, for deployments that
    /// configure workers from the environment rather than code.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = WorkerConfig::default();
        let settings = config::Config::builder()
            .set_default("max_in_flight", defaults.max_in_flight)?
            .set_default("poll_interval_ms", defaults.poll_interval.as_millis() as i64)?
            .set_default("flush_interval_ms", defaults.flush_interval.as_millis() as i64)?
            .set_default("max_flush_size", defaults.max_flush_size as i64)?
            .set_default("reset_interval_ms", defaults.reset_interval.as_millis() as i64)?
            .set_default("max_retries", defaults.max_retries as i64)?
            .add_source(config::Environment::with_prefix("QRONO"))
            .build()?;

        Ok(WorkerConfig {
            max_in_flight: settings.get_int("max_in_flight")? as u64,
            poll_interval: Duration::from_millis(settings.get_int("poll_interval_ms")? as u64),
            flush_interval: Duration::from_millis(settings.get_int("flush_interval_ms")? as u64),
            max_flush_size: settings.get_int("max_flush_size")? as usize,
            reset_interval: Duration::from_millis(settings.get_int("reset_interval_ms")? as u64),
            max_retries: settings.get_int("max_retries")? as i32,
            owner_setter: defaults.owner_setter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.max_in_flight, 100);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.flush_interval, Duration::from_secs(1));
        assert_eq!(cfg.max_flush_size, 100);
        assert_eq!(cfg.reset_interval, Duration::from_secs(60));
    }

    #[test]
    fn builder_overrides_fields() {
        let cfg = WorkerConfig::builder()
            .max_in_flight(5)
            .poll_interval(Duration::from_millis(10))
            .build();
        assert_eq!(cfg.max_in_flight, 5);
        assert_eq!(cfg.poll_interval, Duration::from_millis(10));
    }
}
