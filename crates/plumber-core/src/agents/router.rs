//! Top-level routing of a request to one agent

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use super::AgentKind;
use super::prompts::ROUTER_PROMPT;
use crate::error::{Error, Result};
use crate::llm::LanguageModel;

/// How a route was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    Model,
    Keywords,
    /// Chosen by the caller
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Route {
    pub agent: AgentKind,
    pub source: RouteSource,
}

/// Classifies requests with the model, constrained to the known agents
pub struct Router {
    model: Arc<dyn LanguageModel>,
}

impl Router {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    fn prompt(request: &str) -> String {
        let agents = AgentKind::ALL
            .iter()
            .map(|a| format!("- {}: {}", a.name(), a.description()))
            .collect::<Vec<_>>()
            .join("\n");
        ROUTER_PROMPT
            .replace("{agents}", &agents)
            .replace("{request}", request)
    }

    /// Pick the agent for `request`.
    ///
    /// The model's answer must name a known agent. Anything else, or a
    /// failing model, falls back to keyword matching.
    pub async fn route(&self, request: &str) -> Result<Route> {
        match self.model.prompt(&Self::prompt(request)).await {
            Ok(answer) => match answer.parse::<AgentKind>() {
                Ok(agent) => {
                    debug!(agent = %agent, "Routed by model");
                    return Ok(Route {
                        agent,
                        source: RouteSource::Model,
                    });
                }
                Err(_) => debug!(answer = %answer.trim(), "Model answer is not an agent"),
            },
            Err(e) => warn!(error = %e, "Routing by model failed, using keywords"),
        }

        route_by_keywords(request)
            .map(|agent| Route {
                agent,
                source: RouteSource::Keywords,
            })
            .ok_or_else(|| {
                Error::ValidationFailed(
                    "Could not tell which service the request is about. Mention Dataflow, Dataproc, dbt, GitHub, Cloud Storage or logs."
                        .to_string(),
                )
            })
    }
}

/// Best keyword match; phrases weigh more than single words
pub fn route_by_keywords(request: &str) -> Option<AgentKind> {
    let text = request.to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut best: Option<(usize, AgentKind)> = None;
    for agent in AgentKind::ALL {
        let score: usize = agent
            .keywords()
            .iter()
            .map(|k| {
                if k.contains(' ') || k.contains('.') {
                    if text.contains(k) { 2 } else { 0 }
                } else {
                    words.iter().filter(|w| *w == k).count()
                }
            })
            .sum();
        if score > 0 && best.is_none_or(|(top, _)| score > top) {
            best = Some((score, agent));
        }
    }
    best.map(|(_, agent)| agent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;

    #[tokio::test]
    async fn test_route_by_model() {
        let model = Arc::new(ScriptedModel::new(["dataproc_agent\n"]));
        let router = Router::new(model.clone());
        let route = router.route("spin up a cluster").await.unwrap();
        assert_eq!(route.agent, AgentKind::Dataproc);
        assert_eq!(route.source, RouteSource::Model);
        let prompt = &model.prompts()[0][0].content;
        assert!(prompt.contains("- github_agent: "));
        assert!(prompt.ends_with("Request: spin up a cluster"));
    }

    #[tokio::test]
    async fn test_unknown_answer_falls_back_to_keywords() {
        let router = Router::new(Arc::new(ScriptedModel::new(["billing_agent"])));
        let route = router.route("show me the logs of job 42").await.unwrap();
        assert_eq!(route.agent, AgentKind::Monitoring);
        assert_eq!(route.source, RouteSource::Keywords);
    }

    #[tokio::test]
    async fn test_failing_model_falls_back_to_keywords() {
        let router = Router::new(Arc::new(ScriptedModel::failing()));
        let route = router.route("clone the repo from GitHub").await.unwrap();
        assert_eq!(route.agent, AgentKind::GitHub);
    }

    #[tokio::test]
    async fn test_unroutable_request() {
        let router = Router::new(Arc::new(ScriptedModel::new(["none"])));
        let err = router.route("what's the weather like").await.unwrap_err();
        assert!(matches!(err, Error::ValidationFailed(_)));
    }

    #[test]
    fn test_keyword_routing() {
        assert_eq!(route_by_keywords("Run the Dataproc template GCSToBigQuery"), Some(AgentKind::DataprocTemplate));
        assert_eq!(route_by_keywords("write a dbt model"), Some(AgentKind::Dbt));
        assert_eq!(route_by_keywords("list my dataflow jobs"), Some(AgentKind::Dataflow));
        assert_eq!(route_by_keywords("delete the bucket raw-data"), Some(AgentKind::GitHub));
        assert_eq!(route_by_keywords("commit my changes to git"), Some(AgentKind::GitHub));
        assert_eq!(route_by_keywords("open the catalog"), None);
    }
}
