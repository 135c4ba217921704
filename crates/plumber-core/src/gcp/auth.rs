//! Access tokens for Google Cloud APIs
//!
//! Tokens come from `gcloud auth print-access-token` (honouring service
//! account impersonation) and are cached until shortly before they expire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::runner::{CommandRunner, CommandSpec};

/// gcloud access tokens live for an hour; refresh well before that
const TOKEN_TTL: Duration = Duration::from_secs(45 * 60);

/// Source of OAuth bearer tokens
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Token provider backed by the gcloud CLI
pub struct GcloudTokenProvider {
    runner: Arc<dyn CommandRunner>,
    impersonate: Option<String>,
    cache: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcloudTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcloudTokenProvider")
            .field("impersonate", &self.impersonate)
            .finish()
    }
}

impl GcloudTokenProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            impersonate: None,
            cache: Mutex::new(None),
        }
    }

    /// Mint tokens as the given service account
    pub fn impersonating(mut self, service_account: Option<String>) -> Self {
        self.impersonate = service_account.filter(|sa| !sa.trim().is_empty());
        self
    }

    fn command(&self) -> CommandSpec {
        let spec = CommandSpec::new("gcloud").args(["auth", "print-access-token"]);
        match &self.impersonate {
            Some(sa) => spec.arg(format!("--impersonate-service-account={}", sa)),
            None => spec,
        }
    }
}

#[async_trait]
impl TokenProvider for GcloudTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && cached.expires_at > Instant::now()
        {
            debug!("Using cached access token");
            return Ok(cached.token.clone());
        }

        let spec = self.command();
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(Error::AuthFailed(format!(
                "gcloud could not print an access token: {}",
                output.stderr.trim()
            )));
        }

        let token = output.stdout.trim().to_string();
        if token.is_empty() {
            return Err(Error::AuthFailed(
                "gcloud returned an empty access token".to_string(),
            ));
        }

        info!(impersonated = self.impersonate.is_some(), "Obtained access token");
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + TOKEN_TTL,
        });
        Ok(token)
    }
}

/// Fixed token, for `GOOGLE_OAUTH_ACCESS_TOKEN` and tests
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{CommandOutput, RecordingRunner};

    #[tokio::test]
    async fn test_gcloud_token_is_cached() {
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "ya29.token\n".to_string(),
            stderr: String::new(),
        });
        let provider = GcloudTokenProvider::new(runner.clone());

        assert_eq!(provider.access_token().await.unwrap(), "ya29.token");
        assert_eq!(provider.access_token().await.unwrap(), "ya29.token");
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_gcloud_token_impersonation_flag() {
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 0,
            stdout: "tok".to_string(),
            stderr: String::new(),
        });
        let provider = GcloudTokenProvider::new(runner.clone())
            .impersonating(Some("sa@proj.iam.gserviceaccount.com".to_string()));
        provider.access_token().await.unwrap();

        let calls = runner.calls();
        assert_eq!(
            calls[0].args.last().map(String::as_str),
            Some("--impersonate-service-account=sa@proj.iam.gserviceaccount.com")
        );
    }

    #[tokio::test]
    async fn test_gcloud_token_failure() {
        let runner = Arc::new(RecordingRunner::new());
        runner.push_output(CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "You do not currently have an active account".to_string(),
        });
        let provider = GcloudTokenProvider::new(runner);
        let err = provider.access_token().await.unwrap_err();
        assert!(matches!(err, Error::AuthFailed(_)));
        assert!(err.to_string().contains("active account"));
    }

    #[tokio::test]
    async fn test_static_token() {
        let provider = StaticTokenProvider::new("abc");
        assert_eq!(provider.access_token().await.unwrap(), "abc");
    }
}
