use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the linklens agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// HTTP API server configuration.
    #[serde(default)]
    pub api: ApiConfig,

    /// Event delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Analysis tuning.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Capacity of the batch channel between sources and the engine.
    /// Default: 1024.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// HTTP API server configuration.
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Listen address. Default: ":8088".
    #[serde(default = "default_api_addr")]
    pub addr: String,
}

/// Event delivery configuration. Batches can arrive from a capture file
/// replayed at startup, from polling an upstream collector, or pushed over
/// the API; all three feed the same single-writer channel.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryConfig {
    /// Capture file replay configuration.
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Upstream collector polling configuration.
    #[serde(default)]
    pub poll: PollConfig,
}

/// Capture file replay configuration.
#[derive(Debug, Default, Deserialize)]
pub struct ReplayConfig {
    /// Path to a JSON capture file (array or one object per line).
    /// Empty disables replay.
    #[serde(default)]
    pub path: String,
}

/// Upstream collector polling configuration.
#[derive(Debug, Deserialize)]
pub struct PollConfig {
    /// Enable polling. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Collector HTTP endpoint returning a JSON array of events.
    #[serde(default)]
    pub endpoint: String,

    /// Poll interval. Default: 5s.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_poll_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Analysis tuning.
#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    /// Complete transactions slower than this get the high-latency
    /// annotation. Default: 1s.
    #[serde(default = "default_high_latency_threshold", with = "humantime_serde")]
    pub high_latency_threshold: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_addr() -> String {
    ":8088".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_high_latency_threshold() -> Duration {
    Duration::from_secs(1)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api: ApiConfig::default(),
            delivery: DeliveryConfig::default(),
            analysis: AnalysisConfig::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: default_api_addr(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            interval: default_poll_interval(),
            timeout: default_poll_timeout(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            high_latency_threshold: default_high_latency_threshold(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be positive");
        }

        if self.delivery.poll.enabled {
            if self.delivery.poll.endpoint.is_empty() {
                bail!("delivery.poll.endpoint is required when polling is enabled");
            }
            if self.delivery.poll.interval.is_zero() {
                bail!("delivery.poll.interval must be positive");
            }
        }

        if self.analysis.high_latency_threshold.is_zero() {
            bail!("analysis.high_latency_threshold must be positive");
        }

        Ok(())
    }
}
