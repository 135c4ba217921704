//! Vertex AI Gemini client implementation
//!
//! Provides an async HTTP client for `generateContent` with:
//! - Bearer auth from a [`TokenProvider`]
//! - Model fallback with automatic retry
//! - Rate limit handling with exponential backoff

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client as HttpClient;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::gcp::TokenProvider;

use super::LanguageModel;
use super::types::{GenerateRequest, GenerateResponse, LlmResponse, Message};

/// Maximum number of retry attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff (in milliseconds)
const BACKOFF_BASE_MS: u64 = 1000;

/// Vertex AI endpoint root for a location
pub fn vertex_base_url(location: &str) -> String {
    if location == "global" {
        "https://aiplatform.googleapis.com/v1".to_string()
    } else {
        format!("https://{}-aiplatform.googleapis.com/v1", location)
    }
}

/// Gemini client on Vertex AI
///
/// Cheap to clone; share one instance per process.
#[derive(Clone)]
pub struct LlmClient {
    /// HTTP client for making requests
    http_client: HttpClient,
    /// LLM configuration (model, temperature, etc.)
    config: LlmConfig,
    /// Source of OAuth access tokens
    tokens: Arc<dyn TokenProvider>,
    project: String,
    location: String,
    /// Base URL for the API
    base_url: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("location", &self.location)
            .field("model", &self.config.model)
            .finish()
    }
}

/// Builder for creating an LlmClient
#[derive(Default)]
pub struct LlmClientBuilder {
    config: Option<LlmConfig>,
    tokens: Option<Arc<dyn TokenProvider>>,
    project: Option<String>,
    location: Option<String>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

impl LlmClientBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the LLM configuration
    pub fn config(mut self, config: LlmConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the token provider
    pub fn tokens(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Set the GCP project that owns the Vertex AI quota
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Set the Vertex AI location (defaults to us-central1)
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Override the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Build the LlmClient
    pub fn build(self) -> Result<LlmClient> {
        let config = self.config.unwrap_or_default();
        let tokens = self
            .tokens
            .ok_or_else(|| Error::LLMError("A token provider is required".to_string()))?;
        let project = self
            .project
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| Error::LLMError("A GCP project is required for Vertex AI".to_string()))?;
        let location = self.location.unwrap_or_else(|| "us-central1".to_string());

        let timeout_secs = self.timeout_secs.unwrap_or(config.timeout_secs);

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;

        Ok(LlmClient {
            http_client,
            config,
            tokens,
            project,
            base_url: self
                .base_url
                .unwrap_or_else(|| vertex_base_url(&location)),
            location,
        })
    }
}

impl LlmClient {
    /// Create a new builder for LlmClient
    pub fn builder() -> LlmClientBuilder {
        LlmClientBuilder::new()
    }

    /// Get the default model from configuration
    pub fn default_model(&self) -> &str {
        &self.config.model
    }

    /// Get the fallback models from configuration
    pub fn fallback_models(&self) -> &[String] {
        &self.config.fallback_models
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/projects/{}/locations/{}/publishers/google/models/{}:generateContent",
            self.base_url, self.project, self.location, model
        )
    }

    /// Make a generation request against one model
    pub async fn generate(&self, messages: &[Message], model: Option<&str>) -> Result<LlmResponse> {
        let model = model.unwrap_or(&self.config.model);

        let request = GenerateRequest::new(model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_output_tokens);

        self.execute_request(&request).await
    }

    /// Make a generation request with automatic fallback
    ///
    /// Tries the default model first, then falls back to alternative models
    /// if the primary model fails with a recoverable error.
    pub async fn complete_with_fallback(&self, messages: &[Message]) -> Result<LlmResponse> {
        let mut models = vec![self.config.model.clone()];
        models.extend(self.config.fallback_models.iter().cloned());

        let mut last_error = None;

        for model in &models {
            debug!(model = %model, "Attempting generation");

            match self.generate(messages, Some(model)).await {
                Ok(response) => {
                    info!(model = %model, tokens = response.tokens_used, "Generation successful");
                    return Ok(response);
                }
                Err(Error::RateLimited(secs)) => {
                    warn!(model = %model, wait_secs = secs, "Rate limited, trying next model");
                    last_error = Some(Error::RateLimited(secs));
                }
                Err(Error::LLMError(msg)) if is_model_error(&msg) => {
                    warn!(model = %model, error = %msg, "Model error, trying next model");
                    last_error = Some(Error::LLMError(msg));
                }
                Err(e) => {
                    error!(model = %model, error = %e, "Non-recoverable error");
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::NoSuitableModel("All models failed".to_string())))
    }

    /// Execute a request with retry logic
    async fn execute_request(&self, request: &GenerateRequest) -> Result<LlmResponse> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Ok(response) => return Ok(response),
                Err(Error::RateLimited(wait_secs)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = calculate_backoff(attempts, wait_secs);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send a single request to the API
    async fn send_request(&self, request: &GenerateRequest) -> Result<LlmResponse> {
        let url = self.endpoint(&request.model);
        let token = self.tokens.access_token().await?;

        debug!(
            model = %request.model,
            turns = request.contents.len(),
            "Sending generateContent request"
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(Error::NetworkError)?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_error_status(status.as_u16(), &body));
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .map_err(|e| Error::LLMError(format!("Failed to parse response: {}", e)))?;

        LlmResponse::from_generate_response(generated, &request.model)
            .ok_or_else(|| Error::LLMError("Empty response from API".to_string()))
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse> {
        self.complete_with_fallback(&messages).await
    }
}

/// Map an error status from Vertex AI
fn map_error_status(status: u16, body: &str) -> Error {
    match status {
        401 | 403 => Error::AuthFailed(format!(
            "Vertex AI rejected the credentials ({}): {}",
            status, body
        )),
        429 => {
            let wait_secs = extract_retry_after(body).unwrap_or(60);
            Error::RateLimited(wait_secs)
        }
        400 => Error::LLMError(format!("Bad request: {}", body)),
        404 => Error::LLMError(format!(
            "Model not found or endpoint unavailable: {}",
            body
        )),
        500..=599 => Error::LLMError(format!("Server error ({}): {}", status, body)),
        _ => Error::LLMError(format!("HTTP error {}: {}", status, body)),
    }
}

/// Check if an error message indicates a model-specific error
fn is_model_error(msg: &str) -> bool {
    let model_error_patterns = [
        "model not found",
        "unavailable",
        "not available",
        "overloaded",
        "capacity",
        "server error",
    ];

    let msg_lower = msg.to_lowercase();
    model_error_patterns
        .iter()
        .any(|pattern| msg_lower.contains(pattern))
}

/// Calculate backoff delay with jitter
fn calculate_backoff(attempt: u32, suggested_wait: u64) -> u64 {
    let base = BACKOFF_BASE_MS * 2u64.pow(attempt - 1);
    let max_wait = suggested_wait * 1000;

    // Use the larger of calculated backoff or suggested wait
    let delay = base.max(max_wait);

    // 10% jitter
    let jitter = (delay / 10).max(1);
    delay + rand::thread_rng().gen_range(0..jitter)
}

/// Extract a retry delay from a `google.rpc.RetryInfo` detail (`"30s"`)
fn extract_retry_after(body: &str) -> Option<u64> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let details = json.get("error")?.get("details")?.as_array()?;
    details.iter().find_map(|detail| {
        detail
            .get("retryDelay")?
            .as_str()?
            .trim_end_matches('s')
            .parse::<f64>()
            .ok()
            .map(|secs| secs.ceil() as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::StaticTokenProvider;

    fn test_config() -> LlmConfig {
        LlmConfig {
            model: "gemini-test".to_string(),
            fallback_models: vec!["gemini-fallback".to_string()],
            temperature: 0.2,
            max_output_tokens: 1024,
            timeout_secs: 30,
        }
    }

    fn test_client() -> LlmClient {
        LlmClient::builder()
            .config(test_config())
            .tokens(Arc::new(StaticTokenProvider::new("token")))
            .project("my-project")
            .build()
            .unwrap()
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::builder()
            .config(test_config())
            .tokens(Arc::new(StaticTokenProvider::new("token")))
            .project("my-project")
            .location("europe-west1")
            .timeout_secs(60)
            .build()
            .unwrap();

        assert_eq!(client.default_model(), "gemini-test");
        assert_eq!(client.base_url, "https://europe-west1-aiplatform.googleapis.com/v1");
    }

    #[test]
    fn test_client_builder_requires_project() {
        let result = LlmClient::builder()
            .config(test_config())
            .tokens(Arc::new(StaticTokenProvider::new("token")))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_client_builder_requires_tokens() {
        let result = LlmClient::builder().project("p").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint() {
        let client = test_client();
        assert_eq!(
            client.endpoint("gemini-test"),
            "https://us-central1-aiplatform.googleapis.com/v1/projects/my-project/locations/us-central1/publishers/google/models/gemini-test:generateContent"
        );
        assert_eq!(vertex_base_url("global"), "https://aiplatform.googleapis.com/v1");
    }

    #[test]
    fn test_client_debug_and_fallbacks() {
        let client = test_client();
        let debug = format!("{:?}", client);
        assert!(debug.contains("LlmClient"));
        assert!(debug.contains("my-project"));
        assert_eq!(client.fallback_models(), &["gemini-fallback"]);
    }

    #[test]
    fn test_client_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmClient>();
    }

    #[test]
    fn test_is_model_error() {
        assert!(is_model_error("Model not found or endpoint unavailable"));
        assert!(is_model_error("Server error (503): overloaded"));
        assert!(!is_model_error("Bad request: invalid argument"));
    }

    #[test]
    fn test_map_error_status() {
        assert!(matches!(map_error_status(403, "denied"), Error::AuthFailed(_)));
        assert!(matches!(map_error_status(429, "{}"), Error::RateLimited(60)));
        assert!(matches!(map_error_status(400, "x"), Error::LLMError(_)));
    }

    #[test]
    fn test_calculate_backoff() {
        let backoff1 = calculate_backoff(1, 0);
        assert!(backoff1 >= BACKOFF_BASE_MS);

        let backoff2 = calculate_backoff(2, 0);
        assert!(backoff2 >= BACKOFF_BASE_MS * 2);

        let backoff_with_wait = calculate_backoff(1, 5);
        assert!(backoff_with_wait >= 5000);
    }

    #[test]
    fn test_extract_retry_after() {
        let body = r#"{"error": {"code": 429, "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "30s"}]}}"#;
        assert_eq!(extract_retry_after(body), Some(30));

        let body = r#"{"error": {"code": 429, "message": "Resource exhausted"}}"#;
        assert_eq!(extract_retry_after(body), None);
    }
}
