//! # Graph Events
//!
//! Typed progress events emitted by the driver at defined points: run start,
//! stage start, stage end (with the messages the stage appended), token
//! fragments, custom signals, run end.
//!
//! Every event carries a sequence number assigned at emission, so consumers
//! can restore emission order even if the transport reorders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::pipeline::Stage;
use crate::state::Message;

/// Kind of graph event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphEventKind {
    /// Run accepted, with the messages it starts from
    RunStarted { input: Vec<Message> },
    StageStarted,
    /// Stage finished; `messages` are the entries it appended
    StageCompleted { messages: Vec<Message> },
    /// Incremental model output
    Token { text: String },
    /// Named progress signal with an arbitrary payload
    Custom { name: String, data: serde_json::Value },
    RunCompleted,
    RunFailed { error: String },
}

/// An event of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEvent {
    /// Emission order within the run, starting at 0
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Stage that produced the event; `None` for run-level events
    #[serde(default)]
    pub stage: Option<Stage>,
    pub kind: GraphEventKind,
}

impl GraphEvent {
    pub fn new(seq: u64, stage: Option<Stage>, kind: GraphEventKind) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            stage,
            kind,
        }
    }

    /// Name of the graph element that produced the event
    pub fn source_name(&self) -> &'static str {
        self.stage.map(|s| s.as_str()).unwrap_or("graph")
    }
}

/// Non-blocking event sink shared by the driver and its capabilities.
///
/// Sending never waits: a stage is not stalled by a slow consumer, and a
/// dropped consumer turns emission into a no-op.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<GraphEvent>,
    seq: Arc<AtomicU64>,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<GraphEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                seq: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// An emitter nobody listens to
    pub fn detached() -> Self {
        Self::channel().0
    }

    pub fn emit(&self, stage: Option<Stage>, kind: GraphEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        // receiver gone means the caller stopped listening
        let _ = self.tx.send(GraphEvent::new(seq, stage, kind));
    }

    pub fn token(&self, stage: Stage, text: &str) {
        self.emit(
            Some(stage),
            GraphEventKind::Token {
                text: text.to_string(),
            },
        );
    }

    pub fn custom(&self, stage: Option<Stage>, name: impl Into<String>, data: serde_json::Value) {
        self.emit(
            stage,
            GraphEventKind::Custom {
                name: name.into(),
                data,
            },
        );
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sequence_numbers_are_shared_across_clones() {
        let (emitter, mut rx) = EventEmitter::channel();
        let clone = emitter.clone();

        emitter.emit(None, GraphEventKind::RunCompleted);
        clone.token(Stage::Agent, "hi");
        emitter.custom(Some(Stage::Tools), "progress", json!({"step": 1}));

        let seqs: Vec<u64> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_emit_without_receiver_is_noop() {
        let emitter = EventEmitter::detached();
        assert!(emitter.is_closed());
        emitter.emit(None, GraphEventKind::StageStarted);
    }

    #[test]
    fn test_source_name() {
        let event = GraphEvent::new(0, Some(Stage::Judge), GraphEventKind::StageStarted);
        assert_eq!(event.source_name(), "judge");
        let event = GraphEvent::new(1, None, GraphEventKind::RunCompleted);
        assert_eq!(event.source_name(), "graph");
    }
}
