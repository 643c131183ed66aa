//! Agent configuration

use anyhow::{Context, Result};
use neon_core::sync::SchedulerConfig;
use serde::Deserialize;
use std::time::Duration;

pub const ENV_PREFIX: &str = "NEON_AGENT";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique name of this host on the master
    pub server_name: String,

    /// Base URL of the master, e.g. `http://master:3000`
    pub master_url: String,

    /// Shared secret presented at registration
    pub agent_secret: String,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_containers_interval")]
    pub containers_interval_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Keep samples locally while the master is unreachable
    #[serde(default = "default_buffer_enabled")]
    pub buffer_enabled: bool,

    #[serde(default = "default_buffer_max_size")]
    pub buffer_max_size: usize,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Base backoff delay in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_metrics_interval() -> u64 {
    300
}

fn default_containers_interval() -> u64 {
    900
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_buffer_enabled() -> bool {
    true
}

fn default_buffer_max_size() -> usize {
    100
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_port() -> u16 {
    9100
}

impl AgentConfig {
    /// Load configuration from `NEON_AGENT_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: AgentConfig = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read agent configuration")?
            .try_deserialize()
            .context("Invalid agent configuration (server_name, master_url and agent_secret are required)")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("server_name", &self.server_name),
            ("master_url", &self.master_url),
            ("agent_secret", &self.agent_secret),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{name} must not be empty");
            }
        }

        for (name, secs) in [
            ("metrics_interval_secs", self.metrics_interval_secs),
            ("containers_interval_secs", self.containers_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
        ] {
            if secs < 1 {
                anyhow::bail!("{name} must be at least 1 second");
            }
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            server_name: self.server_name.clone(),
            metrics_interval: Duration::from_secs(self.metrics_interval_secs),
            containers_interval: Duration::from_secs(self.containers_interval_secs),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            buffer_enabled: self.buffer_enabled,
            buffer_max_size: self.buffer_max_size,
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> config::Environment {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}_{}", k.to_uppercase()), v.to_string()))
            .collect();
        config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(Some(source))
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("server_name", "web-1"),
        ("master_url", "http://master:3000"),
        ("agent_secret", "s3cret"),
    ];

    #[test]
    fn test_defaults_apply() {
        let config = AgentConfig::from_source(env(REQUIRED)).unwrap();

        assert_eq!(config.server_name, "web-1");
        assert_eq!(config.metrics_interval_secs, 300);
        assert_eq!(config.containers_interval_secs, 900);
        assert_eq!(config.heartbeat_interval_secs, 60);
        assert!(config.buffer_enabled);
        assert_eq!(config.buffer_max_size, 100);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.api_port, 9100);
    }

    #[test]
    fn test_overrides_parse() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("metrics_interval_secs", "5"),
            ("buffer_enabled", "false"),
            ("buffer_max_size", "10"),
        ]);
        let config = AgentConfig::from_source(env(&pairs)).unwrap();

        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.metrics_interval, Duration::from_secs(5));
        assert!(!scheduler.buffer_enabled);
        assert_eq!(scheduler.buffer_max_size, 10);
    }

    #[test]
    fn test_missing_required_is_fatal() {
        for skipped in ["server_name", "master_url", "agent_secret"] {
            let pairs: Vec<_> = REQUIRED
                .iter()
                .copied()
                .filter(|(k, _)| *k != skipped)
                .collect();
            assert!(AgentConfig::from_source(env(&pairs)).is_err(), "{skipped}");
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("heartbeat_interval_secs", "0"));
        let err = AgentConfig::from_source(env(&pairs)).unwrap_err();
        assert!(err.to_string().contains("heartbeat_interval_secs"));
    }
}
