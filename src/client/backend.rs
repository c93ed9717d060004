//! Transport boundary for the generation service.
//!
//! `GenerationBackend` is the seam between the retry policy (owned by
//! `GenerationClient`) and the wire. The production implementation speaks
//! the Ollama HTTP API; tests substitute scripted backends to exercise the
//! retry contract without a network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::errors::GenerationError;

/// Reachability probe timeout, independent of the generation timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Model-listing timeout.
const TAGS_TIMEOUT: Duration = Duration::from_secs(10);

/// Model metadata from the server's listing endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

/// Sampling options forwarded to the service.
#[derive(Debug, Clone, Serialize)]
pub struct SamplingOptions {
    pub temperature: f32,
    pub num_predict: u32,
}

/// Wire payload for one generation call.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratePayload {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: SamplingOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// One attempt against the generation service.
///
/// Implementations map failures onto the `GenerationError` taxonomy:
/// transport/timeout problems to `Transport`, non-success envelopes to
/// `Service`, and an empty response body to `EmptyOutput`. Retrying is the
/// caller's job, never the backend's.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Single best-effort reachability probe.
    async fn probe(&self) -> Result<(), GenerationError>;

    /// List the models the server has available.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError>;

    /// Trigger a model fetch/download on the server.
    async fn pull_model(&self, name: &str) -> Result<(), GenerationError>;

    /// One generation attempt; `Ok` implies a non-empty response body.
    async fn generate(&self, payload: &GeneratePayload) -> Result<String, GenerationError>;
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Ollama-compatible HTTP backend.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("failed to construct HTTP client: {e}"))?;
        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    fn map_transport(err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Transport("request timed out".to_string())
        } else {
            GenerationError::Transport(err.to_string())
        }
    }

    fn check_status(status: reqwest::StatusCode) -> Result<(), GenerationError> {
        if status.is_success() {
            Ok(())
        } else {
            Err(GenerationError::Service {
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn probe(&self) -> Result<(), GenerationError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(Self::map_transport)?;
        Self::check_status(response.status())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, GenerationError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(TAGS_TIMEOUT)
            .send()
            .await
            .map_err(Self::map_transport)?;
        Self::check_status(response.status())?;

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("invalid tags body: {e}")))?;
        debug!(count = tags.models.len(), "listed models");
        Ok(tags.models)
    }

    async fn pull_model(&self, name: &str) -> Result<(), GenerationError> {
        let response = self
            .client
            .post(format!("{}/api/pull", self.base_url))
            .timeout(self.timeout)
            .json(&serde_json::json!({ "name": name, "stream": false }))
            .send()
            .await
            .map_err(Self::map_transport)?;
        Self::check_status(response.status())?;
        debug!(model = name, "model pull completed");
        Ok(())
    }

    async fn generate(&self, payload: &GeneratePayload) -> Result<String, GenerationError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(Self::map_transport)?;
        Self::check_status(response.status())?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Transport(format!("invalid response body: {e}")))?;

        if body.response.is_empty() {
            return Err(GenerationError::EmptyOutput);
        }

        debug!(chars = body.response.len(), "generation attempt succeeded");
        Ok(body.response)
    }
}
