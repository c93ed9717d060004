//! Resilient client for the generation service.
//!
//! The client hides two failure axes behind a bounded contract:
//! - network failures are retried by re-issuing the request, up to
//!   `max_retries` attempts with a fixed inter-attempt delay;
//! - decode failures on structured output are retried by re-examining the
//!   already-obtained text through local repair passes, never by another
//!   remote call.
//!
//! Nothing here returns an error to callers: every operation yields a
//! value, an explicit absence, or a boolean.

pub mod backend;
pub mod repair;

pub use backend::{GeneratePayload, GenerationBackend, HttpBackend, ModelInfo, SamplingOptions};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FabulaConfig;
use crate::errors::GenerationError;

/// A single generation request. Immutable once constructed; the builder
/// methods consume and return the request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    model: String,
    user_prompt: String,
    system_prompt: Option<String>,
    temperature: f32,
    num_predict: u32,
    format: Option<String>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            user_prompt: user_prompt.into(),
            system_prompt: None,
            temperature: 0.7,
            num_predict: 4096,
            format: None,
        }
    }

    pub fn system(mut self, system_prompt: impl Into<String>) -> Self {
        let sys = system_prompt.into();
        self.system_prompt = if sys.is_empty() { None } else { Some(sys) };
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn num_predict(mut self, num_predict: u32) -> Self {
        self.num_predict = num_predict;
        self
    }

    /// Ask the service for structured JSON output.
    pub fn format_json(mut self) -> Self {
        self.format = Some("json".to_string());
        self
    }

    /// The full prompt text: system prompt and user prompt separated by a
    /// blank line when both are present.
    pub fn full_prompt(&self) -> String {
        match &self.system_prompt {
            Some(sys) => format!("{}\n\n{}", sys, self.user_prompt),
            None => self.user_prompt.clone(),
        }
    }

    fn to_payload(&self) -> GeneratePayload {
        GeneratePayload {
            model: self.model.clone(),
            prompt: self.full_prompt(),
            stream: false,
            options: SamplingOptions {
                temperature: self.temperature,
                num_predict: self.num_predict,
            },
            format: self.format.clone(),
        }
    }
}

/// Outcome of a generation call: the value (or absence) plus how many
/// attempts were spent. `attempts` never exceeds the configured budget.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub value: Option<String>,
    pub attempts: u32,
}

/// Client over a `GenerationBackend` with a bounded retry policy.
pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl GenerationClient {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        model: impl Into<String>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            backend,
            model: model.into(),
            max_retries,
            retry_delay,
        }
    }

    /// Build a client with an HTTP backend from configuration.
    pub fn from_config(config: &FabulaConfig) -> anyhow::Result<Self> {
        let backend = HttpBackend::new(
            config.base_url(),
            Duration::from_secs(config.server.timeout_secs),
        )?;
        Ok(Self::new(
            Arc::new(backend),
            config.model.name.clone(),
            config.server.max_retries,
            Duration::from_secs(config.server.retry_delay_secs),
        ))
    }

    /// The configured model id.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Single best-effort reachability probe; no retry.
    pub async fn check_server(&self) -> bool {
        match self.backend.probe().await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "generation server is not reachable");
                false
            }
        }
    }

    /// Best-effort model listing; empty on any error.
    pub async fn list_models(&self) -> Vec<ModelInfo> {
        match self.backend.list_models().await {
            Ok(models) => models,
            Err(err) => {
                warn!(%err, "failed to list models");
                Vec::new()
            }
        }
    }

    /// Whether the configured model is already present on the server.
    pub async fn model_available(&self) -> bool {
        self.list_models().await.iter().any(|m| m.name == self.model)
    }

    /// Ensure the configured model is ready, pulling it if absent.
    /// Never raises; failure is a `false` return.
    pub async fn ensure_model_ready(&self) -> bool {
        if self.model_available().await {
            debug!(model = %self.model, "model already available");
            return true;
        }

        debug!(model = %self.model, "model not found, pulling");
        match self.backend.pull_model(&self.model).await {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, model = %self.model, "model pull failed");
                false
            }
        }
    }

    /// Run the bounded retry loop for one request.
    ///
    /// Each attempt is classified by the backend: transport error,
    /// non-success envelope, or empty body all count as a failed attempt
    /// and are retried after the fixed delay; a non-empty response returns
    /// immediately. Exhaustion yields absence, never an error.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let payload = request.to_payload();

        for attempt in 1..=self.max_retries {
            debug!(attempt, max_retries = self.max_retries, "generation attempt");

            match self.backend.generate(&payload).await {
                Ok(text) => {
                    return GenerationResult {
                        value: Some(text),
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_retryable() => {
                    warn!(%err, attempt, "generation attempt failed");
                }
                Err(err) => {
                    warn!(%err, attempt, "generation failed without retry");
                    return GenerationResult {
                        value: None,
                        attempts: attempt,
                    };
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let err = GenerationError::ExhaustedRetries {
            attempts: self.max_retries,
        };
        warn!(%err, "generation gave up");
        GenerationResult {
            value: None,
            attempts: self.max_retries,
        }
    }

    /// Free-text generation; absence after the retry budget is spent.
    pub async fn generate_text(&self, request: &GenerationRequest) -> Option<String> {
        self.generate(request).await.value
    }

    /// Structured generation: one pass through the text path (the format
    /// hint rides along on the same request), then local parsing.
    ///
    /// With `validate` set, a parse failure triggers up to two repair
    /// passes against the same raw text; no new remote call is made.
    /// Without it, a single parse attempt decides the outcome.
    pub async fn generate_structured(
        &self,
        request: &GenerationRequest,
        validate: bool,
    ) -> Option<serde_json::Value> {
        let request = if request.format.is_none() {
            request.clone().format_json()
        } else {
            request.clone()
        };

        let raw = self.generate(&request).await.value?;

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                if !validate {
                    warn!(%err, "structured output did not parse; validation disabled");
                    return None;
                }
                debug!(%err, "structured output did not parse, attempting repair");
                let repaired = repair::reparse_with_repairs(&raw);
                if repaired.is_none() {
                    warn!(
                        error = %GenerationError::Decode(err.to_string()),
                        "structured output unrecoverable after repair passes"
                    );
                }
                repaired
            }
        }
    }
}
