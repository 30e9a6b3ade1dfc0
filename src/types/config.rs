//! Configuration structures.
//!
//! The global section is set once at startup and read-only thereafter; the
//! shutting-down signal lives on the pipeline's cancellation token, not here.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Global runtime knobs.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Default retry policy for supervised plugins (overridable per plugin).
    #[serde(default)]
    pub retry: RetryConfig,

    /// Keys accepted by the frame authenticator.
    #[serde(default)]
    pub signers: Vec<SignerKeyConfig>,

    /// Log output configuration for the daemon.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Daemon log output configuration. `RUST_LOG` overrides `level` when set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing filter directive (e.g. "info", "sluice_core=debug").
    pub level: String,

    /// Emit JSON log lines instead of the compact human format.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Global runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Number of envelopes in each pool (input and injection).
    pub pool_size: usize,

    /// Bounded channel capacity for every plugin inbound channel.
    pub plugin_chan_size: usize,

    /// Re-injected envelopes whose loop count exceeds this are dropped.
    pub max_message_loops: u32,

    /// An in-flight envelope untouched for longer than this is reported
    /// as a leak by the auditor.
    #[serde(with = "humantime_serde")]
    pub max_pack_idle: Duration,

    /// How often the leak auditor scans in-flight envelopes.
    #[serde(with = "humantime_serde")]
    pub leak_audit_interval: Duration,

    /// Read deadline for input I/O so the stop signal is observed.
    #[serde(with = "humantime_serde")]
    pub read_deadline: Duration,

    /// Base directory for runtime state (per-output spools live under it).
    pub base_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            pool_size: 100,
            plugin_chan_size: 30,
            max_message_loops: 4,
            max_pack_idle: Duration::from_secs(120),
            leak_audit_interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(5),
            base_dir: PathBuf::from("."),
        }
    }
}

/// Exponential-backoff retry policy for supervised plugins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial delay between retries.
    #[serde(with = "humantime_serde")]
    pub delay: Duration,

    /// Ceiling for the doubled delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Uniform random jitter added to every wait.
    #[serde(with = "humantime_serde")]
    pub max_jitter: Duration,

    /// Retry budget; -1 means retry forever.
    pub max_retries: i32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(500),
            max_retries: -1,
        }
    }
}

/// One accepted HMAC key, looked up as `"{signer}_{key_version}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerKeyConfig {
    pub signer: String,
    pub key_version: u32,
    pub key: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let g = GlobalConfig::default();
        assert_eq!(g.pool_size, 100);
        assert_eq!(g.plugin_chan_size, 30);
        assert_eq!(g.max_message_loops, 4);
        assert_eq!(g.max_pack_idle, Duration::from_secs(120));
        assert_eq!(g.leak_audit_interval, Duration::from_secs(30));
        assert_eq!(g.read_deadline, Duration::from_secs(5));

        let r = RetryConfig::default();
        assert_eq!(r.delay, Duration::from_millis(250));
        assert_eq!(r.max_delay, Duration::from_secs(30));
        assert_eq!(r.max_jitter, Duration::from_millis(500));
        assert_eq!(r.max_retries, -1);

        let l = LoggingConfig::default();
        assert_eq!(l.level, "info");
        assert!(!l.json);
    }

    #[test]
    fn retry_config_deserializes_humantime() {
        let r: RetryConfig = serde_json::from_value(serde_json::json!({
            "delay": "1s",
            "max_delay": "1m",
            "max_jitter": "100ms",
            "max_retries": 3,
        }))
        .unwrap();
        assert_eq!(r.delay, Duration::from_secs(1));
        assert_eq!(r.max_delay, Duration::from_secs(60));
        assert_eq!(r.max_jitter, Duration::from_millis(100));
        assert_eq!(r.max_retries, 3);
    }
}
