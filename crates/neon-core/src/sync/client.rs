//! HTTP transport to the master
//!
//! This module provides the agent side of the wire protocol:
//! - Registration with the shared agent secret
//! - Bearer-authenticated metrics, containers and heartbeat calls
//! - Bounded retries with exponential backoff for transient failures
//! - Token clearing on 401 so the next cycle re-registers

use super::token::TokenState;
use crate::models::{
    ApiResponse, ContainerInfo, ContainersReport, HeartbeatRequest, HeartbeatResponse,
    MetricsReport, RegistrationRequest, RegistrationResponse, ServerInfo, ServerMetrics,
    SyncSummary,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Header carrying the shared registration secret
pub const AGENT_SECRET_HEADER: &str = "X-Agent-Secret";

pub const REGISTER_PATH: &str = "api/agent/register";
pub const HEARTBEAT_PATH: &str = "api/agent/heartbeat";
pub const METRICS_PATH: &str = "api/agent/metrics";
pub const CONTAINERS_PATH: &str = "api/agent/containers";

#[derive(Debug, Error)]
pub enum TransportError {
    /// A bearer call was attempted without a token; no request was sent
    #[error("not registered with master")]
    NotRegistered,
    #[error("unauthorized: token expired or invalid")]
    Unauthorized,
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("master error ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("invalid response from master: {0}")]
    Decode(String),
    #[error("invalid master url: {0}")]
    InvalidUrl(String),
}

impl TransportError {
    /// Failures worth retrying and buffering for
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_) | TransportError::Server { .. }
        )
    }
}

/// Agent-side view of the master
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register this host and hold the issued token
    async fn register(&self, info: &ServerInfo) -> Result<RegistrationResponse, TransportError>;

    async fn send_metrics(&self, samples: &[ServerMetrics]) -> Result<(), TransportError>;

    async fn send_containers(
        &self,
        containers: &[ContainerInfo],
    ) -> Result<SyncSummary, TransportError>;

    /// Returns the token's remaining lifetime in seconds
    async fn heartbeat(&self) -> Result<u64, TransportError>;

    async fn token_state(&self) -> TokenState;

    async fn clear_registration(&self);

    async fn is_registered(&self) -> bool {
        self.token_state().await.is_registered()
    }
}

/// Configuration for the master client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Master base URL (e.g., "http://master:3000")
    pub master_url: String,
    pub server_name: String,
    pub agent_secret: String,
    pub agent_version: String,
    /// Attempts per call, including the first one
    pub retry_attempts: u32,
    /// Backoff before the second attempt; doubled for each further attempt
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master_url: "http://localhost:3000".to_string(),
            server_name: String::new(),
            agent_secret: String::new(),
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Delay before the attempt following `attempt` (1-based)
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent)
}

enum Credential {
    AgentSecret,
    Bearer(String),
}

/// reqwest-backed transport
pub struct MasterClient {
    config: ClientConfig,
    http: Client,
    base_url: Url,
    token: RwLock<TokenState>,
}

impl MasterClient {
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        // Url::join drops the last path segment unless the base ends with '/'
        let mut base = config.master_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self {
            config,
            http,
            base_url,
            token: RwLock::new(TokenState::NoToken),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    async fn bearer(&self) -> Result<Credential, TransportError> {
        self.token
            .read()
            .await
            .bearer()
            .map(|t| Credential::Bearer(t.to_string()))
            .ok_or(TransportError::NotRegistered)
    }

    /// POST with retries, returning the envelope's `data`
    async fn post<B, R>(
        &self,
        path: &'static str,
        body: &B,
        credential: Credential,
    ) -> Result<Option<R>, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let attempts = self.config.retry_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.post_once(&url, body, &credential).await {
                Ok(data) => return Ok(data),
                Err(TransportError::Unauthorized) => {
                    warn!(endpoint = path, "Master rejected credentials, clearing token");
                    self.clear_registration().await;
                    return Err(TransportError::Unauthorized);
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = backoff_delay(self.config.retry_delay, attempt);
                    warn!(
                        endpoint = path,
                        attempt = attempt,
                        attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        endpoint = path,
                        attempt = attempt,
                        attempts = attempts,
                        error = %e,
                        "Request failed"
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn post_once<B, R>(
        &self,
        url: &Url,
        body: &B,
        credential: &Credential,
    ) -> Result<Option<R>, TransportError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Send,
    {
        let request = self.http.post(url.clone()).json(body);
        let request = match credential {
            Credential::AgentSecret => request.header(AGENT_SECRET_HEADER, self.config.agent_secret.as_str()),
            Credential::Bearer(token) => request.bearer_auth(token),
        };

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        let envelope = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text);

        if !status.is_success() {
            let message = match envelope {
                Ok(ApiResponse {
                    error: Some(error), ..
                }) => error,
                _ => text,
            };
            return Err(if status.is_server_error() {
                TransportError::Server {
                    status: status.as_u16(),
                    message,
                }
            } else {
                TransportError::Rejected {
                    status: status.as_u16(),
                    message,
                }
            });
        }

        let envelope = envelope.map_err(|e| TransportError::Decode(e.to_string()))?;
        if !envelope.success {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message: envelope.error.unwrap_or_else(|| "Unknown error".to_string()),
            });
        }

        envelope
            .data
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for MasterClient {
    async fn register(&self, info: &ServerInfo) -> Result<RegistrationResponse, TransportError> {
        let body = RegistrationRequest {
            server_name: self.config.server_name.clone(),
            server_info: info.clone(),
            agent_version: self.config.agent_version.clone(),
        };

        let registration: RegistrationResponse = self
            .post(REGISTER_PATH, &body, Credential::AgentSecret)
            .await?
            .ok_or_else(|| TransportError::Decode("registration response has no data".into()))?;

        self.token
            .write()
            .await
            .issue(registration.token.clone(), registration.server_id);

        info!(
            server_id = registration.server_id,
            server_name = %self.config.server_name,
            "Registered with master"
        );
        Ok(registration)
    }

    async fn send_metrics(&self, samples: &[ServerMetrics]) -> Result<(), TransportError> {
        let credential = self.bearer().await?;
        let body = MetricsReport {
            metrics: samples.to_vec(),
        };
        self.post::<_, serde_json::Value>(METRICS_PATH, &body, credential)
            .await?;
        debug!(samples = samples.len(), "Metrics delivered");
        Ok(())
    }

    async fn send_containers(
        &self,
        containers: &[ContainerInfo],
    ) -> Result<SyncSummary, TransportError> {
        let credential = self.bearer().await?;
        let body = ContainersReport {
            containers: containers.to_vec(),
        };
        let summary: Option<SyncSummary> = self.post(CONTAINERS_PATH, &body, credential).await?;
        Ok(summary.unwrap_or_default())
    }

    async fn heartbeat(&self) -> Result<u64, TransportError> {
        let credential = self.bearer().await?;
        let body = HeartbeatRequest {
            timestamp: chrono::Utc::now(),
            agent_version: self.config.agent_version.clone(),
        };

        let response: HeartbeatResponse = self
            .post(HEARTBEAT_PATH, &body, credential)
            .await?
            .ok_or_else(|| TransportError::Decode("heartbeat response has no data".into()))?;

        self.token
            .write()
            .await
            .record_expiry(response.token_expires_in, chrono::Utc::now());
        Ok(response.token_expires_in)
    }

    async fn token_state(&self) -> TokenState {
        self.token.read().await.clone()
    }

    async fn clear_registration(&self) {
        self.token.write().await.clear();
    }
}

/// Builder for MasterClient configuration
pub struct MasterClientBuilder {
    config: ClientConfig,
}

impl MasterClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    pub fn master_url(mut self, url: impl Into<String>) -> Self {
        self.config.master_url = url.into();
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.config.server_name = name.into();
        self
    }

    pub fn agent_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.agent_secret = secret.into();
        self
    }

    pub fn agent_version(mut self, version: impl Into<String>) -> Self {
        self.config.agent_version = version.into();
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn build(self) -> anyhow::Result<MasterClient> {
        if self.config.server_name.is_empty() {
            anyhow::bail!("server_name is required");
        }
        Ok(MasterClient::new(self.config)?)
    }
}

impl Default for MasterClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
