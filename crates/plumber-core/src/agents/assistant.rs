//! The conversation loop: route, ask the agent, run its tool call

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use super::prompts::TOOL_CALL_PROMPT;
use super::router::{Route, RouteSource, Router};
use super::tools::{Services, ToolCall, ToolOutcome, dispatch};
use super::AgentKind;
use crate::error::Result;
use crate::llm::Message;

/// What an agent answered
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentReply {
    /// Plain text, usually a question for missing details
    Message { text: String },
    /// A tool was run on the agent's behalf
    Tool { call: ToolCall, outcome: ToolOutcome },
}

impl AgentReply {
    /// Text to show the user
    pub fn text(&self) -> &str {
        match self {
            Self::Message { text } => text,
            Self::Tool { outcome, .. } => &outcome.report,
        }
    }
}

/// One request and its answer
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub agent: AgentKind,
    pub route: RouteSource,
    pub reply: AgentReply,
}

impl Turn {
    /// Messages to append to the history for the next turn
    pub fn history_messages(&self, request: &str) -> [Message; 2] {
        [Message::user(request), Message::assistant(self.reply.text())]
    }
}

/// Routes requests to agents and runs the tools they pick
pub struct Assistant {
    services: Arc<Services>,
    router: Router,
}

impl Assistant {
    pub fn new(services: Arc<Services>) -> Self {
        let router = Router::new(services.model.clone());
        Self { services, router }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    fn system_prompt(&self, agent: AgentKind) -> String {
        let tools = agent
            .tools()
            .iter()
            .map(|t| format!("- {}({}): {}", t.name, t.args.join(", "), t.description))
            .collect::<Vec<_>>()
            .join("\n");
        let tool_prompt = TOOL_CALL_PROMPT
            .replace("{tools}", &tools)
            .replace("{project}", &self.services.project)
            .replace("{region}", &self.services.config.gcp.resolved_region());
        format!("{}\n\n{}", agent.instruction(), tool_prompt)
    }

    /// Route `request` and let the chosen agent answer it
    pub async fn handle(&self, request: &str, history: &[Message]) -> Result<Turn> {
        let Route { agent, source } = self.router.route(request).await?;
        info!(agent = %agent, route = ?source, "Request routed");
        self.ask(agent, source, request, history).await
    }

    /// Send `request` straight to `agent`
    pub async fn handle_with(&self, agent: AgentKind, request: &str, history: &[Message]) -> Result<Turn> {
        self.ask(agent, RouteSource::Explicit, request, history).await
    }

    async fn ask(&self, agent: AgentKind, route: RouteSource, request: &str, history: &[Message]) -> Result<Turn> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.system_prompt(agent)));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(request));

        let response = self.services.model.complete(messages).await?;
        let reply = match ToolCall::parse(&response.content) {
            Some(call) => {
                debug!(tool = %call.tool, "Agent chose a tool");
                let outcome = dispatch(&self.services, agent, &call).await;
                AgentReply::Tool { call, outcome }
            }
            None => AgentReply::Message {
                text: response.content.trim().to_string(),
            },
        };
        Ok(Turn { agent, route, reply })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageRole, ScriptedModel};
    use crate::logs::fake::{FakeLogSource, page};
    use crate::runner::RecordingRunner;

    fn assistant(dir: &std::path::Path, model: Arc<ScriptedModel>, logs: FakeLogSource) -> Assistant {
        let services = Services::fake(dir, Arc::new(RecordingRunner::new()), model, Arc::new(logs));
        Assistant::new(Arc::new(services))
    }

    #[tokio::test]
    async fn test_tool_call_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new([
            "monitoring_agent",
            r#"{"tool": "get_dataflow_job_logs", "args": {"job_id": "job-7"}}"#,
        ]));
        let logs = FakeLogSource::new(vec![page(&["disk full"], None)]);
        let turn = assistant(dir.path(), model.clone(), logs)
            .handle("why did job-7 fail?", &[])
            .await
            .unwrap();

        assert_eq!(turn.agent, AgentKind::Monitoring);
        assert_eq!(turn.route, RouteSource::Model);
        let AgentReply::Tool { call, outcome } = &turn.reply else {
            panic!("expected a tool reply");
        };
        assert_eq!(call.tool, "get_dataflow_job_logs");
        assert!(outcome.is_success());
        assert!(turn.reply.text().contains("disk full"));

        let agent_prompt = &model.prompts()[1];
        assert_eq!(agent_prompt[0].role, MessageRole::System);
        assert!(agent_prompt[0].content.contains("- get_cpu_utilization(): "));
        assert!(agent_prompt[0].content.contains("Default project: proj"));
    }

    #[tokio::test]
    async fn test_plain_answer_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new(["Which region is the cluster in?\n"]));
        let history = vec![Message::user("hello"), Message::assistant("hi")];
        let turn = assistant(dir.path(), model.clone(), FakeLogSource::default())
            .handle_with(AgentKind::Dataproc, "delete my cluster", &history)
            .await
            .unwrap();

        assert_eq!(turn.route, RouteSource::Explicit);
        assert_eq!(turn.reply.text(), "Which region is the cluster in?");
        let sent = &model.prompts()[0];
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[1].content, "hello");
        assert_eq!(sent[3].content, "delete my cluster");

        let [user, assistant] = turn.history_messages("delete my cluster");
        assert_eq!(user.role, MessageRole::User);
        assert_eq!(assistant.content, "Which region is the cluster in?");
    }

    #[tokio::test]
    async fn test_foreign_tool_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(ScriptedModel::new([r#"{"tool": "delete_bucket", "args": {"bucket_name": "b"}}"#]));
        let turn = assistant(dir.path(), model, FakeLogSource::default())
            .handle_with(AgentKind::Dbt, "drop the bucket", &[])
            .await
            .unwrap();
        let AgentReply::Tool { outcome, .. } = &turn.reply else {
            panic!("expected a tool reply");
        };
        assert!(!outcome.is_success());
    }
}
