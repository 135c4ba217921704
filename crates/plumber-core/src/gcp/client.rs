//! Authenticated JSON client for Google Cloud REST APIs
//!
//! One client serves every service (Dataflow, Dataproc, Storage, Logging,
//! Monitoring). Non-success responses are mapped onto the error enum:
//! 404 becomes [`Error::NotFound`], everything else
//! [`Error::ExternalCallFailed`] carrying Google's error message.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client as HttpClient, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::auth::TokenProvider;
use crate::error::{Error, Result};

/// Default request timeout for cloud API calls
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Shared Google Cloud REST client
#[derive(Clone)]
pub struct GcpClient {
    http_client: HttpClient,
    tokens: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for GcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpClient").finish_non_exhaustive()
    }
}

impl GcpClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_timeout(tokens, DEFAULT_TIMEOUT_SECS)
    }

    pub fn with_timeout(tokens: Arc<dyn TokenProvider>, timeout_secs: u64) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(Error::NetworkError)?;
        Ok(Self {
            http_client,
            tokens,
        })
    }

    /// Access token for callers that talk to Google endpoints directly
    pub async fn access_token(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.request(Method::GET, url).await?.query(query);
        self.send_json(url, request).await
    }

    pub async fn post_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let request = self.request(Method::POST, url).await?.json(body);
        self.send_json(url, request).await
    }

    pub async fn post_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
    ) -> Result<T> {
        let request = self
            .request(Method::POST, url)
            .await?
            .query(query)
            .json(body);
        self.send_json(url, request).await
    }

    pub async fn put_json<T: DeserializeOwned>(&self, url: &str, body: &Value) -> Result<T> {
        let request = self.request(Method::PUT, url).await?.json(body);
        self.send_json(url, request).await
    }

    pub async fn patch_json_with_query<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        body: &Value,
    ) -> Result<T> {
        let request = self
            .request(Method::PATCH, url)
            .await?
            .query(query)
            .json(body);
        self.send_json(url, request).await
    }

    /// DELETE that returns a body, e.g. a long-running operation
    pub async fn delete_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let request = self.request(Method::DELETE, url).await?;
        self.send_json(url, request).await
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        let request = self.request(Method::DELETE, url).await?;
        let response = self.send(url, request).await?;
        // Some deletes return an operation body, none of which callers need
        let _ = response.bytes().await;
        Ok(())
    }

    /// Download raw bytes (GCS `alt=media`)
    pub async fn get_bytes(&self, url: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
        let request = self.request(Method::GET, url).await?.query(query);
        let response = self.send(url, request).await?;
        Ok(response.bytes().await.map_err(Error::NetworkError)?.to_vec())
    }

    /// Upload raw bytes (GCS `uploadType=media`)
    pub async fn post_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<Value> {
        let request = self
            .request(Method::POST, url)
            .await?
            .query(query)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body);
        self.send_json(url, request).await
    }

    async fn request(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let token = self.tokens.access_token().await?;
        debug!(method = %method, url = %url, "Calling Google Cloud API");
        Ok(self.http_client.request(method, url).bearer_auth(token))
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(Error::NetworkError)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let error = map_error_response(service_name(url), status, &body);
        warn!(url = %url, status = status.as_u16(), error = %error, "Google Cloud API call failed");
        Err(error)
    }

    async fn send_json<T: DeserializeOwned>(&self, url: &str, request: RequestBuilder) -> Result<T> {
        let response = self.send(url, request).await?;
        let text = response.text().await.map_err(Error::NetworkError)?;
        // Empty bodies (e.g. some cancels) deserialize as null
        let text = if text.trim().is_empty() { "null" } else { text.as_str() };
        Ok(serde_json::from_str(text)?)
    }
}

/// Short service name for an API URL (`dataflow` for `dataflow.googleapis.com`)
pub fn service_name(url: &str) -> &str {
    let host = url
        .split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or_default();
    let first = host.split('.').next().unwrap_or(host);
    // Regional endpoints look like us-central1-aiplatform
    first.rsplit('-').next().unwrap_or(first)
}

/// Map a failed response onto the error enum
fn map_error_response(service: &str, status: StatusCode, body: &str) -> Error {
    let message = google_error_message(body).unwrap_or_else(|| body.trim().to_string());
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{} resource ({})", service, message)),
        StatusCode::UNAUTHORIZED => Error::AuthFailed(message),
        _ => Error::external(service, status.as_u16(), message),
    }
}

/// Pull `error.message` out of a Google API error body
fn google_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}
