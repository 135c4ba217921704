//! Plumber Core Library
//!
//! This crate provides the core functionality for Plumber, including:
//! - Agents (router plus Dataflow, Dataproc, Dataproc template, dbt, GitHub and monitoring agents)
//! - Dataflow template catalog, parameter validation and job launching
//! - Dataproc clusters, serverless batches and template runs
//! - Cloud Storage, Cloud Logging and Cloud Monitoring clients
//! - GitHub repositories and local git working copies
//! - LLM integration (Vertex AI Gemini)
//! - STTM to SQL generation

pub mod agents;
pub mod config;
pub mod dataflow;
pub mod dataproc;
pub mod error;
pub mod gcp;
pub mod gcs;
pub mod git;
pub mod github;
pub mod llm;
pub mod logs;
pub mod monitoring;
pub mod runner;
pub mod sttm;
pub mod templates;

pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agents::{AgentKind, Assistant, Services, ToolCall, ToolOutcome};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::llm::{LanguageModel, Message};
    pub use crate::runner::{CommandRunner, CommandSpec};
    pub use crate::templates::{TemplateCatalog, TemplateParams, UserParams};
}
