//! # Event Stream Translator
//!
//! Turns the driver's [`GraphEvent`]s into the typed records a stream
//! consumer sees. Events are released in sequence order through a small
//! reorder buffer, so stage outputs keep the order the graph produced them in
//! even if the transport delivers them out of order. Translation has no
//! hidden state beyond that order: replaying the same events yields the same
//! records.

use futures::Stream;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

use super::events::{GraphEvent, GraphEventKind};
use crate::state::{Message, ToolCall};

/// Custom signal whose payload is a complete message
pub const CUSTOM_MESSAGE: &str = "message";

/// A message as exposed to stream consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "human", "ai" or "tool"
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Capability name, for tool messages
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub run_id: Option<String>,
}

impl ChatMessage {
    /// Convert a graph message. System messages are never exposed.
    pub fn from_message(message: &Message, run_id: &str) -> Result<Self, String> {
        let (tool_call_id, name) = match message {
            Message::System { .. } => {
                return Err("system messages cannot be streamed".to_string());
            }
            Message::Tool {
                tool_call_id, name, ..
            } => (Some(tool_call_id.clone()), Some(name.clone())),
            _ => (None, None),
        };

        Ok(Self {
            kind: message.kind().to_string(),
            content: message.content().to_string(),
            tool_calls: message.tool_calls().to_vec(),
            tool_call_id,
            name,
            run_id: Some(run_id.to_string()),
        })
    }
}

/// One output record
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamRecord {
    /// A completed message
    Message {
        event_name: String,
        content: ChatMessage,
    },
    /// Incremental text fragment
    Token { event_name: String, content: String },
    /// Named lifecycle event
    Info {
        event_name: String,
        event: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    Error { event_name: String, content: String },
}

impl StreamRecord {
    pub fn event_name(&self) -> &str {
        match self {
            StreamRecord::Message { event_name, .. }
            | StreamRecord::Token { event_name, .. }
            | StreamRecord::Info { event_name, .. }
            | StreamRecord::Error { event_name, .. } => event_name,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            StreamRecord::Message { .. } => "message",
            StreamRecord::Token { .. } => "token",
            StreamRecord::Info { .. } => "info",
            StreamRecord::Error { .. } => "error",
        }
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    event_name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl<'de> Deserialize<'de> for StreamRecord {
    /// Unknown record types are read as `info`.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawRecord::deserialize(deserializer)?;
        let text = |content: Value| match content {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };

        Ok(match raw.kind.as_str() {
            "message" => StreamRecord::Message {
                event_name: raw.event_name,
                content: ChatMessage::deserialize(raw.content).map_err(D::Error::custom)?,
            },
            "token" => StreamRecord::Token {
                event_name: raw.event_name,
                content: text(raw.content),
            },
            "error" => StreamRecord::Error {
                event_name: raw.event_name,
                content: text(raw.content),
            },
            other => StreamRecord::Info {
                event: raw.event.unwrap_or_else(|| other.to_string()),
                event_name: raw.event_name,
                data: raw.data,
            },
        })
    }
}

/// Item of the output stream: a record, or the end-of-stream sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Record(StreamRecord),
    Done,
}

impl StreamFrame {
    /// Payload of the SSE `data:` field
    pub fn to_sse_data(&self) -> String {
        match self {
            StreamFrame::Record(record) => serde_json::to_string(record).unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to serialize stream record");
                serde_json::json!({
                    "event_name": record.event_name(),
                    "type": "error",
                    "content": "Unexpected error",
                })
                .to_string()
            }),
            StreamFrame::Done => "[DONE]".to_string(),
        }
    }

    /// Complete SSE frame
    pub fn to_sse(&self) -> String {
        format!("data: {}\n\n", self.to_sse_data())
    }
}

/// Ordered, deterministic event-to-record translation for one run
#[derive(Debug)]
pub struct StreamTranslator {
    input_text: String,
    run_id: String,
    stream_tokens: bool,
    next_seq: u64,
    buffer: BTreeMap<u64, GraphEvent>,
    finished: bool,
}

impl StreamTranslator {
    /// `input_text` is the caller's submitted message, used for echo suppression
    pub fn new(input_text: impl Into<String>, run_id: impl Into<String>, stream_tokens: bool) -> Self {
        Self {
            input_text: input_text.into(),
            run_id: run_id.into(),
            stream_tokens,
            next_seq: 0,
            buffer: BTreeMap::new(),
            finished: false,
        }
    }

    /// Whether the terminal event has been translated
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Accept one event; returns the records that became releasable
    pub fn push(&mut self, event: GraphEvent) -> Vec<StreamRecord> {
        if self.finished || event.seq < self.next_seq {
            tracing::debug!(seq = event.seq, "Dropping late or duplicate graph event");
            return Vec::new();
        }
        self.buffer.insert(event.seq, event);

        let mut records = Vec::new();
        while !self.finished {
            let Some(event) = self.buffer.remove(&self.next_seq) else {
                break;
            };
            self.next_seq += 1;
            records.extend(self.translate(event));
        }
        records
    }

    /// Release whatever is still buffered, in sequence order, skipping gaps
    pub fn finish(&mut self) -> Vec<StreamRecord> {
        let mut records = Vec::new();
        while !self.finished {
            let Some((seq, event)) = self.buffer.pop_first() else {
                break;
            };
            self.next_seq = seq + 1;
            records.extend(self.translate(event));
        }
        self.buffer.clear();
        self.finished = true;
        records
    }

    fn translate(&mut self, event: GraphEvent) -> Vec<StreamRecord> {
        let event_name = event.source_name().to_string();
        let info = |name: &str, data: Option<Value>| StreamRecord::Info {
            event_name: event_name.clone(),
            event: name.to_string(),
            data,
        };

        match event.kind {
            GraphEventKind::RunStarted { input } => {
                let mut records = self.message_records(&event_name, &input);
                records.push(info("on_run_start", None));
                records
            }
            GraphEventKind::StageStarted => vec![info("on_stage_start", None)],
            GraphEventKind::StageCompleted { messages } => {
                let mut records = self.message_records(&event_name, &messages);
                records.push(info("on_stage_end", None));
                records
            }
            GraphEventKind::Token { text } => {
                if self.stream_tokens && !text.is_empty() {
                    vec![StreamRecord::Token {
                        event_name,
                        content: text,
                    }]
                } else {
                    Vec::new()
                }
            }
            GraphEventKind::Custom { name, data } if name == CUSTOM_MESSAGE => {
                match serde_json::from_value::<Message>(data) {
                    Ok(message) => self.message_records(&event_name, &[message]),
                    Err(e) => {
                        tracing::error!(error = %e, "Error parsing message");
                        vec![unexpected_error(&event_name)]
                    }
                }
            }
            GraphEventKind::Custom { name, data } => vec![info(&name, Some(data))],
            GraphEventKind::RunCompleted => {
                self.finished = true;
                vec![info("on_run_end", None)]
            }
            GraphEventKind::RunFailed { error } => {
                self.finished = true;
                vec![StreamRecord::Error {
                    event_name,
                    content: error,
                }]
            }
        }
    }

    fn message_records(&self, event_name: &str, messages: &[Message]) -> Vec<StreamRecord> {
        messages
            .iter()
            .filter_map(|message| match ChatMessage::from_message(message, &self.run_id) {
                Ok(chat) if chat.kind == "human" && chat.content == self.input_text => None,
                Ok(chat) => Some(StreamRecord::Message {
                    event_name: event_name.to_string(),
                    content: chat,
                }),
                Err(e) => {
                    tracing::error!(error = %e, "Error parsing message");
                    Some(unexpected_error(event_name))
                }
            })
            .collect()
    }
}

fn unexpected_error(event_name: &str) -> StreamRecord {
    StreamRecord::Error {
        event_name: event_name.to_string(),
        content: "Unexpected error".to_string(),
    }
}

/// Translate a recorded event sequence in one go
pub fn translate_all(
    events: impl IntoIterator<Item = GraphEvent>,
    input_text: &str,
    run_id: &str,
    stream_tokens: bool,
) -> Vec<StreamRecord> {
    let mut translator = StreamTranslator::new(input_text, run_id, stream_tokens);
    let mut records: Vec<StreamRecord> = events
        .into_iter()
        .flat_map(|event| translator.push(event))
        .collect();
    records.extend(translator.finish());
    records
}

struct StreamState {
    events: mpsc::UnboundedReceiver<GraphEvent>,
    translator: StreamTranslator,
    pending: VecDeque<StreamFrame>,
    done: bool,
    // cancels the run when the consumer drops the stream
    _cancel_on_drop: Option<DropGuard>,
}

impl StreamState {
    fn close(&mut self) {
        let rest = self.translator.finish();
        self.pending.extend(rest.into_iter().map(StreamFrame::Record));
        self.pending.push_back(StreamFrame::Done);
        self.done = true;
    }
}

/// Lazy record stream over a live event channel, ending with
/// [`StreamFrame::Done`] once the run finished or its emitters are gone.
pub fn translate_events(
    events: mpsc::UnboundedReceiver<GraphEvent>,
    translator: StreamTranslator,
    cancel_on_drop: Option<DropGuard>,
) -> impl Stream<Item = StreamFrame> + Send + 'static {
    let state = StreamState {
        events,
        translator,
        pending: VecDeque::new(),
        done: false,
        _cancel_on_drop: cancel_on_drop,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((frame, state));
            }
            if state.done {
                return None;
            }
            if state.translator.is_finished() {
                state.close();
                continue;
            }
            match state.events.recv().await {
                Some(event) => {
                    let records = state.translator.push(event);
                    state
                        .pending
                        .extend(records.into_iter().map(StreamFrame::Record));
                }
                None => {
                    tracing::debug!("Event channel closed before the run reported completion");
                    state.close();
                }
            }
        }
    })
}
