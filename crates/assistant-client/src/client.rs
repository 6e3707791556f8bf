use crate::client::wire::{ChatRequest, ChatResponse};
use anyhow::{Context, Result};
use async_trait::async_trait;
use voice_session_core::capability::AssistantClient;
use voice_session_core::{AssistantError, BackendStatus, Reply};

pub(crate) mod config;
mod consts;
mod wire;

pub use consts::BASE_URL as DEFAULT_BASE_URL;

/// Talks to the assistant backend over HTTP.
///
/// One POST per message, no conversation context is sent along.
#[derive(Debug, Clone)]
pub struct HttpAssistant {
    http: reqwest::Client,
    config: config::ClientConfig,
}

impl HttpAssistant {
    pub fn new(config: config::ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &config::ClientConfig {
        &self.config
    }
}

// Transport timeouts are reported separately so the session can tell the
// user the backend was too slow rather than unreachable.
fn transport_error(e: reqwest::Error) -> AssistantError {
    if e.is_timeout() {
        AssistantError::Timeout
    } else {
        AssistantError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl AssistantClient for HttpAssistant {
    async fn submit(&self, message: &str) -> Result<Reply, AssistantError> {
        let url = self.config.endpoint(consts::CHAT_PATH);
        tracing::debug!("posting message to {}", url);

        let response = self
            .http
            .post(&url)
            .header(consts::ACCEPT_HEADER, consts::JSON_CONTENT_TYPE)
            .json(&ChatRequest { message })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<ChatResponse>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_default();
            tracing::warn!("assistant backend returned {}: {}", status, detail);
            return Err(AssistantError::Unavailable(
                format!("{status} {detail}").trim().to_string(),
            ));
        }

        let body = response.json::<ChatResponse>().await.map_err(|e| {
            if e.is_timeout() {
                AssistantError::Timeout
            } else {
                AssistantError::InvalidResponse(e.to_string())
            }
        })?;
        tracing::debug!("assistant response: {:?}", body);
        body.into_reply()
    }

    async fn health(&self) -> BackendStatus {
        let url = self.config.endpoint(consts::HEALTH_PATH);
        let result = self
            .http
            .get(&url)
            .header(reqwest::header::CONTENT_TYPE, consts::JSON_CONTENT_TYPE)
            .timeout(self.config.health_timeout())
            .send()
            .await;

        match result {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                tracing::info!("assistant backend connected");
                BackendStatus::Connected
            }
            Ok(response) => {
                tracing::error!("backend health check failed: {}", response.status());
                BackendStatus::Disconnected
            }
            Err(e) => {
                tracing::error!("backend not available: {}", e);
                BackendStatus::Disconnected
            }
        }
    }
}
