//! Error types for Plumber

use serde::Serialize;
use thiserror::Error;

/// Result type alias using Plumber's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Plumber error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Validation errors (E001-E099)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Lookup errors (E100-E199)
    #[error("{0} not found")]
    NotFound(String),

    #[error("Template '{0}' not found. Run `plumber dataflow templates` to see the catalog.")]
    TemplateNotFound(String),

    // External call errors (E200-E299)
    #[error("{service} API error ({status}): {message}")]
    ExternalCallFailed {
        service: String,
        status: u16,
        message: String,
    },

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command `{0}` timed out after {1} seconds")]
    CommandTimeout(String, u64),

    #[error("Network error: {0}. Check your internet connection.")]
    NetworkError(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    // LLM errors (E300-E399)
    #[error("LLM API error: {0}. Check `plumber config get gcp.location` and your gcloud credentials.")]
    LLMError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("No suitable model found: {0}")]
    NoSuitableModel(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, reported to the conversational layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Caller-correctable input problem
    ValidationFailed,
    /// The referenced resource does not exist
    NotFound,
    /// A cloud API or subprocess reported a failure
    ExternalCallFailed,
    /// Anything else
    Unexpected,
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "E001",
            Self::InvalidInput(_) => "E002",
            Self::NotFound(_) => "E100",
            Self::TemplateNotFound(_) => "E101",
            Self::ExternalCallFailed { .. } => "E200",
            Self::CommandFailed { .. } => "E201",
            Self::CommandTimeout(..) => "E202",
            Self::NetworkError(_) => "E203",
            Self::AuthFailed(_) => "E204",
            Self::LLMError(_) => "E300",
            Self::RateLimited(_) => "E301",
            Self::NoSuitableModel(_) => "E302",
            Self::ConfigError(_) => "E600",
            Self::Git(_) => "E700",
            Self::Json(_) => "E800",
            Self::Unexpected(_) | Self::Io(_) => "E9999",
        }
    }

    /// Classify this error for the tool boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationFailed(_) | Self::InvalidInput(_) => ErrorKind::ValidationFailed,
            Self::NotFound(_) | Self::TemplateNotFound(_) => ErrorKind::NotFound,
            Self::ExternalCallFailed { .. }
            | Self::CommandFailed { .. }
            | Self::CommandTimeout(..)
            | Self::NetworkError(_)
            | Self::AuthFailed(_)
            | Self::LLMError(_)
            | Self::RateLimited(_)
            | Self::NoSuitableModel(_)
            | Self::Git(_) => ErrorKind::ExternalCallFailed,
            Self::ConfigError(_) | Self::Json(_) | Self::Unexpected(_) | Self::Io(_) => {
                ErrorKind::Unexpected
            }
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::TemplateNotFound(_) => Some("plumber dataflow templates".to_string()),
            Self::AuthFailed(_) => Some("gcloud auth login".to_string()),
            Self::NetworkError(_) => Some("Check internet connection".to_string()),
            Self::LLMError(_) => Some("plumber config get gcp.location".to_string()),
            Self::ConfigError(_) => Some("plumber config list".to_string()),
            Self::CommandFailed { command, .. } if command.starts_with("gcloud") => {
                Some("gcloud auth list".to_string())
            }
            _ => None,
        }
    }

    /// Build an external call error for a service response
    pub fn external(service: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self::ExternalCallFailed {
            service: service.into(),
            status,
            message: message.into(),
        }
    }
}
