//! # Language Model Capability
//!
//! The orchestration core treats the model as a capability:
//! `invoke(history) -> response`, optionally constrained to a declared output
//! schema, or bound to a set of tools it may request calls for.
//!
//! ## Modules
//!
//! - `openai` - Streaming client for OpenAI-compatible chat-completions APIs

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ModelInvocationError;
use crate::state::{Message, ToolCall};

pub use openai::OpenAiCompatibleClient;

/// Callback receiving incremental text fragments while a response streams
pub type TokenCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Token callback for calls whose fragments are not worth surfacing
pub fn ignore_tokens(_fragment: &str) {}

/// JSON schema the response must conform to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Schema name reported to the backend
    pub name: String,
    /// JSON schema document
    pub schema: serde_json::Value,
}

/// A capability the model may request calls for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the argument payload
    pub parameters: serde_json::Value,
}

/// How the model output is constrained
#[derive(Debug, Clone, PartialEq)]
pub enum OutputMode {
    /// Free-form text
    Text,
    /// JSON matching a schema
    Structured(OutputSchema),
    /// Text and/or zero or more tool calls
    Tools(Vec<ToolSpec>),
}

/// One round trip to the model
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Stage instruction, prepended as a system message
    pub system: String,
    /// Full dialogue history
    pub messages: Vec<Message>,
    pub output: OutputMode,
}

impl ModelRequest {
    pub fn text(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            output: OutputMode::Text,
        }
    }

    pub fn structured(
        system: impl Into<String>,
        messages: Vec<Message>,
        schema: OutputSchema,
    ) -> Self {
        Self {
            system: system.into(),
            messages,
            output: OutputMode::Structured(schema),
        }
    }

    pub fn with_tools(
        system: impl Into<String>,
        messages: Vec<Message>,
        tools: Vec<ToolSpec>,
    ) -> Self {
        Self {
            system: system.into(),
            messages,
            output: OutputMode::Tools(tools),
        }
    }

    /// System instruction followed by the history, as sent on the wire
    pub fn full_history(&self) -> Vec<Message> {
        let mut history = Vec::with_capacity(self.messages.len() + 1);
        history.push(Message::system(self.system.clone()));
        history.extend(self.messages.iter().cloned());
        history
    }
}

/// Model answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ModelResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn into_message(self) -> Message {
        Message::ai_with_tools(self.content, self.tool_calls)
    }
}

/// A language-model backend
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion. Text fragments are reported to `on_token` as they
    /// arrive; the returned response is the complete answer.
    async fn invoke(
        &self,
        request: ModelRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<ModelResponse, ModelInvocationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_history_prepends_system() {
        let request = ModelRequest::text("be brief", vec![Message::human("hi")]);
        let history = request.full_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], Message::system("be brief"));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_response_into_message_keeps_tool_calls() {
        let response = ModelResponse {
            content: String::new(),
            tool_calls: vec![ToolCall::new("c1", "search-papers", json!({"query": "x"}))],
        };
        let message = response.into_message();
        assert_eq!(message.tool_calls().len(), 1);
    }
}
