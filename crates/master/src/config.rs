//! Master configuration

use anyhow::{Context, Result};
use neon_core::auth::{DEFAULT_ISSUER, DEFAULT_TOKEN_TTL_SECS, MAX_TOKEN_TTL_SECS};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;

pub const ENV_PREFIX: &str = "NEON_MASTER";
/// Environment variable naming an optional config file
pub const CONFIG_PATH_VAR: &str = "NEON_MASTER_CONFIG";

#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// HMAC key for agent bearer tokens
    pub jwt_secret: String,

    /// Shared registration secret; without one every registration is refused
    #[serde(default)]
    pub agent_secret: Option<String>,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,

    #[serde(default = "default_token_issuer")]
    pub token_issuer: String,
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_token_ttl() -> i64 {
    DEFAULT_TOKEN_TTL_SECS
}

fn default_token_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

impl MasterConfig {
    /// Load from the optional config file, overridden by `NEON_MASTER_*` variables
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_VAR).ok();
        Self::from_sources(
            file.as_deref().map(Path::new),
            config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
        )
    }

    fn from_sources(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: MasterConfig = builder
            .add_source(env)
            .build()
            .context("Failed to read master configuration")?
            .try_deserialize()
            .context("Invalid master configuration (jwt_secret is required)")?;

        if config.jwt_secret.is_empty() {
            anyhow::bail!("jwt_secret must not be empty");
        }
        if !(1..=MAX_TOKEN_TTL_SECS).contains(&config.token_ttl_secs) {
            anyhow::bail!("token_ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}");
        }
        Ok(config)
    }
}
