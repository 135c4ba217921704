//! Agents: the router, the six domain agents and their tools

mod assistant;
mod prompts;
mod router;
mod tools;

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::{Error, Result};

pub use assistant::{AgentReply, Assistant, Turn};
pub use router::{Route, RouteSource, Router};
pub use tools::{Args, Services, ToolCall, ToolOutcome, ToolSpec, ToolStatus, dispatch};

/// The domain agents a request can be routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Dataflow,
    Dataproc,
    DataprocTemplate,
    Dbt,
    GitHub,
    Monitoring,
}

impl AgentKind {
    pub const ALL: [AgentKind; 6] = [
        Self::Dataflow,
        Self::Dataproc,
        Self::DataprocTemplate,
        Self::Dbt,
        Self::GitHub,
        Self::Monitoring,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Dataflow => "dataflow_agent",
            Self::Dataproc => "dataproc_agent",
            Self::DataprocTemplate => "dataproc_template_agent",
            Self::Dbt => "dbt_agent",
            Self::GitHub => "github_agent",
            Self::Monitoring => "monitoring_agent",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Dataflow => {
                "Creates, deploys and manages Dataflow jobs; finds, customises and builds Dataflow templates"
            }
            Self::Dataproc => "Manages Dataproc clusters and Dataproc Serverless batches",
            Self::DataprocTemplate => "Finds and runs Dataproc templates, optionally with an STTM transformation",
            Self::Dbt => "Converts a source-to-target mapping sheet into a dbt SQL model",
            Self::GitHub => "Searches and clones GitHub repositories, manages local git repositories and Cloud Storage",
            Self::Monitoring => "Fetches Cloud Logging entries and VM CPU utilisation",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Self::Dataflow => prompts::DATAFLOW_INSTRUCTION,
            Self::Dataproc => prompts::DATAPROC_INSTRUCTION,
            Self::DataprocTemplate => prompts::DATAPROC_TEMPLATE_INSTRUCTION,
            Self::Dbt => prompts::DBT_INSTRUCTION,
            Self::GitHub => prompts::GITHUB_INSTRUCTION,
            Self::Monitoring => prompts::MONITORING_INSTRUCTION,
        }
    }

    pub fn tools(self) -> &'static [ToolSpec] {
        tools::catalog(self)
    }

    pub fn has_tool(self, name: &str) -> bool {
        self.tools().iter().any(|t| t.name == name)
    }

    /// Words that point at this agent when the model cannot route
    pub(crate) fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Dataflow => &["dataflow", "beam", "pipeline", "flex"],
            Self::Dataproc => &["cluster", "batch", "batches", "serverless", "spark", "pyspark"],
            Self::DataprocTemplate => &["dataproc template", "dataproc templates", "start.sh"],
            Self::Dbt => &["dbt", "model sql"],
            Self::GitHub => &[
                "github", "git", "repository", "repo", "branch", "commit", "bucket", "gcs", "upload", "download",
            ],
            Self::Monitoring => &["log", "logs", "monitor", "monitoring", "cpu", "utilization", "severity"],
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AgentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().trim_matches('`').to_lowercase();
        Self::ALL
            .into_iter()
            .find(|a| a.name() == wanted || a.name().trim_end_matches("_agent") == wanted)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown agent '{}'", s.trim())))
    }
}
