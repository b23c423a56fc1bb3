use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::pipeline::retry::RetryPolicy;

/// Tunables for the cache and pipeline, read from an optional TOML file with
/// environment-variable overrides on top. Every field has a default so a
/// missing file still yields a working setup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub cache_capacity: usize,
    pub sweep_interval_secs: u64,
    pub batch_size: usize,
    pub inter_batch_pause_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub default_city: String,
    pub throttle_requests: u32,
    pub throttle_interval_secs: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            cache_capacity: 1000,
            sweep_interval_secs: 300,
            batch_size: 50,
            inter_batch_pause_ms: 250,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            retry_max_delay_ms: 5000,
            default_city: "Wien".to_string(),
            throttle_requests: 30,
            throttle_interval_secs: 60,
        }
    }
}

fn env_override<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(value) = std::env::var(name) {
        if let Ok(parsed) = value.parse() {
            *target = parsed;
        }
    }
}

impl PipelineSettings {
    /// Load settings: defaults, then the TOML file if given, then env vars.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Self::default(),
        };
        env_override("VES_CACHE_CAPACITY", &mut settings.cache_capacity);
        env_override("VES_SWEEP_INTERVAL_SECS", &mut settings.sweep_interval_secs);
        env_override("VES_BATCH_SIZE", &mut settings.batch_size);
        env_override("VES_DEFAULT_CITY", &mut settings.default_city);
        debug!(?settings, "pipeline settings loaded");
        Ok(settings)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    pub fn inter_batch_pause(&self) -> Duration {
        Duration::from_millis(self.inter_batch_pause_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
