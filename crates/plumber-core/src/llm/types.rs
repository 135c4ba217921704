//! LLM types for the Vertex AI Gemini `generateContent` API

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions/context)
    System,
    /// User message (human input)
    User,
    /// Assistant message (LLM response)
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Binary attachment sent inline with a message (STTM screenshots)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A message in a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Role of the message sender
    pub role: MessageRole,
    /// Text content of the message
    pub content: String,
    /// Optional attachments sent after the text
    pub attachments: Vec<InlineData>,
}

impl Message {
    /// Create a new message
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
        }
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Attach binary data (e.g. an image) to this message
    pub fn with_attachment(mut self, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.attachments.push(InlineData {
            mime_type: mime_type.into(),
            bytes,
        });
        self
    }
}

/// A content part on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }
}

/// Base64 payload of an inline part
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// One turn of the conversation on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// Sampling configuration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Request body for `generateContent`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Model identifier, part of the URL rather than the body
    #[serde(skip)]
    pub model: String,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    pub generation_config: GenerationConfig,
}

impl GenerateRequest {
    /// Create a request; system messages are merged into the system instruction
    pub fn new(model: impl Into<String>, messages: &[Message]) -> Self {
        let system_text: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();
        let system_instruction = (!system_text.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system_text.join("\n\n"))],
        });

        let contents = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                let mut parts = vec![Part::text(m.content.clone())];
                parts.extend(m.attachments.iter().map(|a| Part {
                    text: None,
                    inline_data: Some(Blob {
                        mime_type: a.mime_type.clone(),
                        data: BASE64.encode(&a.bytes),
                    }),
                }));
                Content {
                    role: Some(role.to_string()),
                    parts,
                }
            })
            .collect();

        Self {
            model: model.into(),
            contents,
            system_instruction,
            generation_config: GenerationConfig {
                temperature: None,
                max_output_tokens: None,
            },
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.generation_config.temperature = Some(temperature);
        self
    }

    /// Set max output tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.generation_config.max_output_tokens = Some(max_tokens);
        self
    }
}

/// Token usage information from the API response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageMetadata {
    pub prompt_token_count: u32,
    pub candidates_token_count: u32,
    pub total_token_count: u32,
}

/// Reason for completion finishing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    /// Natural stop (end of response)
    Stop,
    /// Max tokens reached
    MaxTokens,
    /// Blocked by the safety system
    Safety,
    /// Blocked for reciting training data
    Recitation,
    /// Unknown reason (catch-all)
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::MaxTokens => write!(f, "max_tokens"),
            FinishReason::Safety => write!(f, "safety"),
            FinishReason::Recitation => write!(f, "recitation"),
            FinishReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// A single candidate from the API response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

/// Response from the `generateContent` API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub model_version: Option<String>,
}

/// Simplified response returned by the LLM client
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated content
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Total tokens used (input + output)
    pub tokens_used: u32,
    /// Input tokens
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Reason for stopping
    pub finish_reason: FinishReason,
}

impl LlmResponse {
    /// Create a new LLM response from API response
    pub fn from_generate_response(response: GenerateResponse, requested_model: &str) -> Option<Self> {
        let candidate = response.candidates.first()?;
        let content: String = candidate
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let usage = response.usage_metadata.unwrap_or_default();

        Some(Self {
            content,
            model: response
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            tokens_used: usage.total_token_count,
            input_tokens: usage.prompt_token_count,
            output_tokens: usage.candidates_token_count,
            finish_reason: candidate
                .finish_reason
                .clone()
                .unwrap_or(FinishReason::Unknown),
        })
    }

    /// Plain text response (tests and fakes)
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: String::new(),
            tokens_used: 0,
            input_tokens: 0,
            output_tokens: 0,
            finish_reason: FinishReason::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are Plumber");
        assert_eq!(system.role, MessageRole::System);
        let user = Message::user("hi").with_attachment("image/png", vec![1, 2, 3]);
        assert_eq!(user.attachments.len(), 1);
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![
            Message::system("rules"),
            Message::user("list jobs"),
            Message::assistant("ok"),
            Message::user("img").with_attachment("image/png", b"abc".to_vec()),
        ];
        let request = GenerateRequest::new("gemini-2.0-flash", &messages)
            .with_temperature(0.2)
            .with_max_tokens(100);
        let json = serde_json::to_value(&request).unwrap();

        assert!(json.get("model").is_none());
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "rules");
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["contents"][2]["parts"][1]["inlineData"]["data"], "YWJj");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn test_request_without_system() {
        let request = GenerateRequest::new("m", &[Message::user("x")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
        assert!(json["generationConfig"].get("temperature").is_none());
    }

    #[test]
    fn test_response_parsing() {
        let body = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "SELECT "}, {"text": "1"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15},
            "modelVersion": "gemini-2.0-flash-001"
        }"#;
        let response: GenerateResponse = serde_json::from_str(body).unwrap();
        let llm = LlmResponse::from_generate_response(response, "gemini-2.0-flash").unwrap();
        assert_eq!(llm.content, "SELECT 1");
        assert_eq!(llm.tokens_used, 15);
        assert_eq!(llm.model, "gemini-2.0-flash-001");
        assert_eq!(llm.finish_reason, FinishReason::Stop);
    }

    #[test]
    fn test_response_without_candidates() {
        let response: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert!(LlmResponse::from_generate_response(response, "m").is_none());
    }

    #[test]
    fn test_unknown_finish_reason() {
        let reason: FinishReason = serde_json::from_str(r#""BLOCKLIST""#).unwrap();
        assert_eq!(reason, FinishReason::Unknown);
    }
}
