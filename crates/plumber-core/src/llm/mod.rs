//! LLM integration - Vertex AI Gemini
//!
//! This module provides:
//! - Vertex AI HTTP client for `generateContent`
//! - Request/response types for the Gemini API
//! - Model fallback with automatic retry
//! - The [`LanguageModel`] seam that agents and tools depend on

mod client;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{LlmClient, LlmClientBuilder, vertex_base_url};
pub use types::{
    Candidate, Content, FinishReason, GenerateRequest, GenerateResponse, InlineData, LlmResponse,
    Message, MessageRole, Part, UsageMetadata,
};

/// Anything that can answer a conversation
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse>;

    /// Single-prompt convenience returning only the text
    async fn prompt(&self, prompt: &str) -> Result<String> {
        Ok(self.complete(vec![Message::user(prompt)]).await?.content)
    }
}

/// Remove markdown code fences (```sql, ```json, ```) from a model answer
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !is_fence_line(line))
        .collect::<Vec<_>>()
        .join("\n")
        .replace("```", "")
        .trim()
        .to_string()
}

fn is_fence_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with("```")
        && trimmed
            .trim_start_matches('`')
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
}

/// Model double that replays canned answers and records prompts
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedModel {
    answers: std::sync::Mutex<Vec<Result<String>>>,
    prompts: std::sync::Mutex<Vec<Vec<Message>>>,
}

#[cfg(test)]
impl ScriptedModel {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: std::sync::Mutex::new(answers.into_iter().map(|a| Ok(a.into())).collect()),
            prompts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A model whose every call fails
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, messages: Vec<Message>) -> Result<LlmResponse> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages);
        }
        let next = self.answers.lock().ok().and_then(|mut a| {
            if a.is_empty() { None } else { Some(a.remove(0)) }
        });
        match next {
            Some(answer) => answer.map(LlmResponse::text),
            None => Err(crate::error::Error::LLMError(
                "Server error (503): no scripted answer".to_string(),
            )),
        }
    }
}
