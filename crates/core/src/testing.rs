//! # Test Doubles
//!
//! A scripted model and fake capabilities for driving the graph without
//! network access.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{CapabilityError, ModelInvocationError};
use crate::llm::{ChatModel, ModelRequest, ModelResponse, OutputMode, TokenCallback};
use crate::skills::tools::{Capability, CapabilityContext, CapabilityKind};
use crate::state::ToolCall;

enum Step {
    Respond(Result<ModelResponse, ModelInvocationError>),
    /// Never answers; for cancellation tests
    Stall,
}

/// Model that replays a queue of canned responses and records every request
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    pub fn respond(self, response: ModelResponse) -> Self {
        self.push(Step::Respond(Ok(response)))
    }

    pub fn respond_text(self, content: &str) -> Self {
        self.respond(ModelResponse::text(content))
    }

    /// Structured answer, serialized as the backend would return it
    pub fn respond_json(self, value: Value) -> Self {
        self.respond(ModelResponse::text(value.to_string()))
    }

    pub fn respond_tool_calls(self, tool_calls: Vec<ToolCall>) -> Self {
        self.respond(ModelResponse {
            content: String::new(),
            tool_calls,
        })
    }

    pub fn fail(self, error: ModelInvocationError) -> Self {
        self.push(Step::Respond(Err(error)))
    }

    pub fn stall(self) -> Self {
        self.push(Step::Stall)
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(
        &self,
        request: ModelRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<ModelResponse, ModelInvocationError> {
        let streams_tokens = !matches!(request.output, OutputMode::Structured(_));
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());

        match step {
            Some(Step::Respond(Ok(response))) => {
                if streams_tokens {
                    for fragment in response.content.split_inclusive(' ') {
                        on_token(fragment);
                    }
                }
                Ok(response)
            }
            Some(Step::Respond(Err(error))) => Err(error),
            Some(Step::Stall) => std::future::pending().await,
            None => Err(ModelInvocationError::MalformedOutput(
                "scripted model has no response left".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    Reply(Value),
    Fail(String),
}

/// Capability with canned behavior that counts its invocations
#[derive(Debug, Clone)]
pub struct FakeCapability {
    kind: CapabilityKind,
    behavior: Behavior,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
}

impl FakeCapability {
    fn with_behavior(kind: CapabilityKind, behavior: Behavior) -> Self {
        Self {
            kind,
            behavior,
            delay: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns `{"echo": <args>}`
    pub fn echo(kind: CapabilityKind) -> Self {
        Self::with_behavior(kind, Behavior::Echo)
    }

    pub fn reply(kind: CapabilityKind, value: Value) -> Self {
        Self::with_behavior(kind, Behavior::Reply(value))
    }

    /// Fails with an upstream error after (simulated) retries
    pub fn failing(kind: CapabilityKind, message: &str) -> Self {
        Self::with_behavior(kind, Behavior::Fail(message.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Shared invocation counter; stays valid after registration
    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl Capability for FakeCapability {
    fn kind(&self) -> CapabilityKind {
        self.kind
    }

    fn description(&self) -> &str {
        "Fake capability for tests."
    }

    fn args_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string"}}
        })
    }

    async fn invoke(&self, args: Value, _ctx: CapabilityContext) -> Result<Value, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            Behavior::Echo => Ok(json!({ "echo": args })),
            Behavior::Reply(value) => Ok(value.clone()),
            Behavior::Fail(message) => Err(CapabilityError::Upstream {
                service: "fake".to_string(),
                status: 503,
                body: message.clone(),
            }),
        }
    }
}
