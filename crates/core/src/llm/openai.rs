//! # OpenAI-Compatible Client
//!
//! Streams chat completions over SSE. Content deltas go to the token
//! callback as they arrive; tool-call fragments are reassembled by index.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::{ChatModel, ModelRequest, ModelResponse, OutputMode, TokenCallback};
use crate::error::ModelInvocationError;
use crate::models::ModelConfig;
use crate::state::{Message, ToolCall};

/// Chat-completions client for any OpenAI-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    config: ModelConfig,
    api_key: String,
}

impl OpenAiCompatibleClient {
    /// Create a client; fails when the config carries no API key
    pub fn new(config: &ModelConfig) -> Result<Self, ModelInvocationError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            ModelInvocationError::MissingApiKey(config.provider.api_key_env().to_string())
        })?;
        let http = reqwest::Client::builder()
            .user_agent("agentic-researcher/0.1")
            .build()
            .map_err(|e| ModelInvocationError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            config: config.clone(),
            api_key,
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        let messages: Vec<Value> = request.full_history().iter().map(to_wire).collect();
        let mut body = json!({
            "model": self.config.model,
            "temperature": self.config.temperature,
            "stream": true,
            "messages": messages,
        });

        match &request.output {
            OutputMode::Text => {}
            OutputMode::Structured(schema) => {
                body["response_format"] = json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": schema.name,
                        "schema": schema.schema,
                    }
                });
            }
            OutputMode::Tools(tools) if !tools.is_empty() => {
                body["tools"] = tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect();
            }
            OutputMode::Tools(_) => {}
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiCompatibleClient {
    async fn invoke(
        &self,
        request: ModelRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<ModelResponse, ModelInvocationError> {
        let url = format!("{}/chat/completions", self.config.endpoint());
        let body = self.request_body(&request);

        tracing::debug!(
            provider = self.config.provider.display_name(),
            model = %self.config.model,
            messages = request.messages.len(),
            "Invoking model"
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelInvocationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelInvocationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream().eventsource();
        let mut accumulator = StreamAccumulator::default();

        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| ModelInvocationError::Transport(e.to_string()))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: Value = serde_json::from_str(&event.data).map_err(|e| {
                ModelInvocationError::MalformedOutput(format!(
                    "SSE parsing error: {}, data: {}",
                    e, event.data
                ))
            })?;
            accumulator.ingest(&chunk, on_token)?;
        }

        accumulator.finish()
    }
}

/// Convert a message into the chat-completions wire shape
fn to_wire(message: &Message) -> Value {
    match message {
        Message::System { content } => json!({"role": "system", "content": content}),
        Message::Human { content } => json!({"role": "user", "content": content}),
        Message::Ai {
            content,
            tool_calls,
        } => {
            let mut wire = json!({"role": "assistant", "content": content});
            if !tool_calls.is_empty() {
                wire["tool_calls"] = tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.args.to_string(),
                            }
                        })
                    })
                    .collect();
            }
            wire
        }
        Message::Tool {
            content,
            tool_call_id,
            ..
        } => json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}),
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Folds streamed completion chunks into one response
#[derive(Debug, Default)]
struct StreamAccumulator {
    content: String,
    tool_calls: BTreeMap<u64, PartialToolCall>,
}

impl StreamAccumulator {
    fn ingest(&mut self, chunk: &Value, on_token: TokenCallback<'_>) -> Result<(), ModelInvocationError> {
        if let Some(error) = chunk.get("error") {
            let message = error
                .get("message")
                .and_then(|m| m.as_str())
                .or_else(|| error.as_str())
                .unwrap_or("An error occurred during streaming");
            return Err(ModelInvocationError::MalformedOutput(message.to_string()));
        }

        let Some(delta) = chunk.pointer("/choices/0/delta") else {
            // usage-only and keepalive chunks carry no choices
            return Ok(());
        };

        if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
            if !text.is_empty() {
                self.content.push_str(text);
                on_token(text);
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
            for call in calls {
                let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
                let entry = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                    entry.id = Some(id.to_string());
                }
                if let Some(function) = call.get("function") {
                    if let Some(name) = function.get("name").and_then(|n| n.as_str()) {
                        entry.name.push_str(name);
                    }
                    if let Some(args) = function.get("arguments").and_then(|a| a.as_str()) {
                        entry.arguments.push_str(args);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<ModelResponse, ModelInvocationError> {
        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for (_, partial) in self.tool_calls {
            let args = if partial.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&partial.arguments).map_err(|e| {
                    ModelInvocationError::MalformedOutput(format!(
                        "Tool call '{}' has invalid arguments: {}",
                        partial.name, e
                    ))
                })?
            };
            let id = partial
                .id
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
            tool_calls.push(ToolCall::new(id, partial.name, args));
        }

        Ok(ModelResponse {
            content: self.content,
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ignore_tokens, OutputSchema, ToolSpec};
    use std::sync::Mutex;

    fn client() -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(&ModelConfig::default().with_api_key("test")).unwrap()
    }

    #[test]
    fn test_missing_api_key_is_reported() {
        let err = OpenAiCompatibleClient::new(&ModelConfig::default()).unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_accumulates_content_and_reports_tokens() {
        let seen = Mutex::new(Vec::new());
        let on_token = |t: &str| seen.lock().unwrap().push(t.to_string());
        let mut acc = StreamAccumulator::default();

        for text in ["Atten", "tion"] {
            let chunk = json!({"choices": [{"delta": {"content": text}}]});
            acc.ingest(&chunk, &on_token).unwrap();
        }
        acc.ingest(&json!({"choices": [], "usage": {"total_tokens": 3}}), &on_token)
            .unwrap();

        let response = acc.finish().unwrap();
        assert_eq!(response.content, "Attention");
        assert_eq!(*seen.lock().unwrap(), vec!["Atten", "tion"]);
    }

    #[test]
    fn test_reassembles_tool_call_fragments() {
        let mut acc = StreamAccumulator::default();
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "search-papers", "arguments": "{\"que"}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "ry\": \"rlhf\"}"}},
                {"index": 1, "id": "call_b", "function": {"name": "download-paper", "arguments": ""}}
            ]}}]}),
        ];
        for chunk in &chunks {
            acc.ingest(chunk, &ignore_tokens).unwrap();
        }

        let response = acc.finish().unwrap();
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[0].args, json!({"query": "rlhf"}));
        assert_eq!(response.tool_calls[1].name, "download-paper");
        assert_eq!(response.tool_calls[1].args, json!({}));
    }

    #[test]
    fn test_invalid_tool_arguments_are_malformed_output() {
        let mut acc = StreamAccumulator::default();
        let chunk = json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c", "function": {"name": "search-papers", "arguments": "{oops"}}
        ]}}]});
        acc.ingest(&chunk, &ignore_tokens).unwrap();
        assert!(matches!(
            acc.finish(),
            Err(ModelInvocationError::MalformedOutput(_))
        ));
    }

    #[test]
    fn test_stream_error_payload() {
        let mut acc = StreamAccumulator::default();
        let err = acc
            .ingest(&json!({"error": {"message": "quota exceeded"}}), &ignore_tokens)
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn test_request_body_for_structured_output() {
        let request = ModelRequest::structured(
            "decide",
            vec![Message::human("hi")],
            OutputSchema {
                name: "decision".to_string(),
                schema: json!({"type": "object"}),
            },
        );
        let body = client().request_body(&request);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["stream"], true);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_request_body_binds_tools_and_serializes_history() {
        let history = vec![
            Message::human("find papers"),
            Message::ai_with_tools(
                "",
                vec![ToolCall::new("c1", "search-papers", json!({"query": "x"}))],
            ),
            Message::tool("\"found\"", "c1", "search-papers"),
        ];
        let request = ModelRequest::with_tools(
            "act",
            history,
            vec![ToolSpec {
                name: "search-papers".to_string(),
                description: "Search".to_string(),
                parameters: json!({"type": "object"}),
            }],
        );
        let body = client().request_body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], "search-papers");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"], "{\"query\":\"x\"}");
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
    }
}
