//! # Conversation State
//!
//! The mutable record threaded through every stage of a run. Stages never
//! mutate it directly: they return a [`StateDelta`] which the driver applies.

use serde::{Deserialize, Serialize};

use super::message::{Message, ToolCall};

/// State of one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Full dialogue history, append-only within a run
    pub messages: Vec<Message>,
    /// Set once by the decision stage
    pub requires_research: bool,
    /// Number of judge evaluations that invoked the model
    pub num_feedback_requests: u32,
    /// Set by the judge stage
    pub is_good_answer: bool,
}

/// Partial update returned by a stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    /// Messages to append, in order
    pub messages: Vec<Message>,
    pub requires_research: Option<bool>,
    pub num_feedback_requests: Option<u32>,
    pub is_good_answer: Option<bool>,
}

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages.extend(messages);
        self
    }

    pub fn with_requires_research(mut self, value: bool) -> Self {
        self.requires_research = Some(value);
        self
    }

    pub fn with_num_feedback_requests(mut self, value: u32) -> Self {
        self.num_feedback_requests = Some(value);
        self
    }

    pub fn with_is_good_answer(mut self, value: bool) -> Self {
        self.is_good_answer = Some(value);
        self
    }
}

impl ConversationState {
    /// Start a run from prior history plus the new messages
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Apply a stage delta.
    ///
    /// Messages are appended, never replaced. The feedback counter only moves
    /// forward: a lower value in the delta is ignored.
    pub fn apply(&mut self, delta: StateDelta) {
        self.messages.extend(delta.messages);
        if let Some(value) = delta.requires_research {
            self.requires_research = value;
        }
        if let Some(value) = delta.num_feedback_requests {
            if value < self.num_feedback_requests {
                tracing::warn!(
                    current = self.num_feedback_requests,
                    proposed = value,
                    "Ignoring attempt to decrease num_feedback_requests"
                );
            } else {
                self.num_feedback_requests = value;
            }
        }
        if let Some(value) = delta.is_good_answer {
            self.is_good_answer = value;
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Tool calls carried by the latest message, if it is an `ai` message
    pub fn pending_tool_calls(&self) -> &[ToolCall] {
        self.last_message().map(Message::tool_calls).unwrap_or(&[])
    }

    /// The answer: content of the last `ai` message
    pub fn final_answer(&self) -> Option<&str> {
        self.messages.iter().rev().find_map(|m| match m {
            Message::Ai { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Check that every run of `tool` messages answers a call of the `ai`
    /// message right before it.
    pub fn tool_messages_are_paired(&self) -> bool {
        tool_results_follow_calls(&self.messages)
    }
}

/// Check prior dialogue submitted by a caller.
///
/// System messages are built fresh for each model call and never stored, and
/// every `tool` message must answer a call of the `ai` message before it.
pub fn validate_history(messages: &[Message]) -> Result<(), String> {
    if let Some(idx) = messages
        .iter()
        .position(|m| matches!(m, Message::System { .. }))
    {
        return Err(format!("message {} is a system message", idx));
    }
    if !tool_results_follow_calls(messages) {
        return Err("tool message without a matching tool call".to_string());
    }
    Ok(())
}

fn tool_results_follow_calls(messages: &[Message]) -> bool {
    let mut open: Vec<&str> = Vec::new();
    for message in messages {
        match message {
            Message::Ai { tool_calls, .. } => {
                open = tool_calls.iter().map(|c| c.id.as_str()).collect();
            }
            Message::Tool { tool_call_id, .. } => {
                match open.iter().position(|id| id == tool_call_id) {
                    Some(idx) => {
                        open.remove(idx);
                    }
                    None => return false,
                }
            }
            _ => open.clear(),
        }
    }
    true
}
