//! # Feedback Tools
//!
//! `ask-human-feedback`: put a question to a human and wait for the answer.
//!
//! Where the human sits depends on the surface: the CLI reads the answer from
//! the console, the HTTP server parks the question in a [`FeedbackInbox`]
//! and announces it on the run's event stream.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;

use super::{parse_args, Capability, CapabilityContext, CapabilityKind};
use crate::error::CapabilityError;
use crate::skills::llm_helpers::schema_value;
use crate::swarm::pipeline::Stage;

/// Custom signal announcing a pending question
pub const FEEDBACK_REQUESTED: &str = "feedback_requested";

/// Input object to ask a human for feedback.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AskHumanFeedbackArgs {
    /// The question to ask the human.
    pub question: String,
}

/// Somewhere a human can answer a question
#[async_trait]
pub trait FeedbackChannel: Send + Sync {
    async fn ask(&self, question: &str, ctx: &CapabilityContext) -> Result<String, CapabilityError>;
}

/// Interactive console: prints the question, reads one line of input.
///
/// One buffered reader is kept for the life of the channel so piped answers
/// are consumed line by line, and its lock keeps concurrent prompts apart.
pub struct ConsoleFeedback {
    input: tokio::sync::Mutex<Box<dyn AsyncBufRead + Send + Unpin>>,
}

impl ConsoleFeedback {
    /// Answers come from stdin
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            input: tokio::sync::Mutex::new(Box::new(reader)),
        }
    }
}

impl Default for ConsoleFeedback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedbackChannel for ConsoleFeedback {
    async fn ask(&self, question: &str, _ctx: &CapabilityContext) -> Result<String, CapabilityError> {
        let io_err = |e: std::io::Error| CapabilityError::Feedback(e.to_string());
        let mut input = self.input.lock().await;

        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(format!("\n{}\n> ", question).as_bytes())
            .await
            .map_err(io_err)?;
        stderr.flush().await.map_err(io_err)?;

        let mut line = String::new();
        let read = input.read_line(&mut line).await.map_err(io_err)?;
        if read == 0 {
            return Err(CapabilityError::Feedback("stdin closed".to_string()));
        }
        Ok(line.trim().to_string())
    }
}

/// Questions waiting for an answer delivered out of band
#[derive(Debug)]
pub struct FeedbackInbox {
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    timeout: Duration,
}

impl FeedbackInbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<String>>> {
        // a panic while holding the lock cannot leave the map inconsistent
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver an answer. Returns `false` when no question with that id is
    /// waiting (unknown, already answered, or timed out).
    pub fn resolve(&self, request_id: &str, answer: impl Into<String>) -> bool {
        match self.pending().remove(request_id) {
            Some(tx) => tx.send(answer.into()).is_ok(),
            None => false,
        }
    }

    pub fn pending_ids(&self) -> Vec<String> {
        self.pending().keys().cloned().collect()
    }
}

#[async_trait]
impl FeedbackChannel for FeedbackInbox {
    async fn ask(&self, question: &str, ctx: &CapabilityContext) -> Result<String, CapabilityError> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(request_id.clone(), tx);

        tracing::info!(request_id = %request_id, run_id = %ctx.run_id, "Waiting for human feedback");
        ctx.emitter.custom(
            Some(Stage::Tools),
            FEEDBACK_REQUESTED,
            json!({
                "request_id": request_id,
                "question": question,
                "tool_call_id": ctx.call_id,
            }),
        );

        let outcome = tokio::time::timeout(self.timeout, rx).await;
        self.pending().remove(&request_id);

        match outcome {
            Ok(Ok(answer)) => Ok(answer),
            Ok(Err(_)) => Err(CapabilityError::Feedback(format!(
                "request {} was dropped",
                request_id
            ))),
            Err(_) => Err(CapabilityError::Feedback(format!(
                "no answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// The `ask-human-feedback` capability over any channel
#[derive(Clone)]
pub struct AskHumanFeedback {
    channel: Arc<dyn FeedbackChannel>,
}

impl AskHumanFeedback {
    pub fn new(channel: Arc<dyn FeedbackChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Capability for AskHumanFeedback {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::AskHumanFeedback
    }

    fn description(&self) -> &str {
        "Ask for human feedback. You should call this tool when encountering unexpected errors."
    }

    fn args_schema(&self) -> Value {
        schema_value::<AskHumanFeedbackArgs>()
    }

    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, CapabilityError> {
        let args: AskHumanFeedbackArgs = parse_args(self.kind(), args)?;
        let answer = self.channel.ask(&args.question, &ctx).await?;
        Ok(Value::String(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swarm::events::{EventEmitter, GraphEventKind};

    #[tokio::test]
    async fn test_inbox_delivers_answer() {
        let inbox = Arc::new(FeedbackInbox::new(Duration::from_secs(30)));
        let (emitter, mut events) = EventEmitter::channel();
        let capability = AskHumanFeedback::new(inbox.clone());

        let task = tokio::spawn(async move {
            capability
                .invoke(
                    json!({"question": "Which year?"}),
                    CapabilityContext::new("run-1", "call-1", emitter),
                )
                .await
        });

        let event = events.recv().await.unwrap();
        let GraphEventKind::Custom { name, data } = event.kind else {
            panic!("expected custom event, got {:?}", event.kind);
        };
        assert_eq!(name, FEEDBACK_REQUESTED);
        assert_eq!(data["question"], "Which year?");

        let request_id = data["request_id"].as_str().unwrap();
        assert!(inbox.resolve(request_id, "2017"));
        assert_eq!(task.await.unwrap().unwrap(), json!("2017"));
        assert!(inbox.pending_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbox_times_out() {
        let inbox = FeedbackInbox::new(Duration::from_secs(5));
        let err = inbox
            .ask("Anyone there?", &CapabilityContext::detached("call-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no answer within 5s"));
        assert!(inbox.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn test_console_reads_piped_answers_in_order() {
        let console = ConsoleFeedback::from_reader(&b"2017\nyes, go ahead\n"[..]);
        let ctx = CapabilityContext::detached("call-1");

        assert_eq!(console.ask("Which year?", &ctx).await.unwrap(), "2017");
        assert_eq!(console.ask("Proceed?", &ctx).await.unwrap(), "yes, go ahead");
        let err = console.ask("Anything else?", &ctx).await.unwrap_err();
        assert!(err.to_string().contains("stdin closed"));
    }

    #[test]
    fn test_resolve_unknown_request() {
        let inbox = FeedbackInbox::new(Duration::from_secs(5));
        assert!(!inbox.resolve("missing", "hello"));
    }
}
