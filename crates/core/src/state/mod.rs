//! # State Management
//!
//! In-memory state of a single orchestration run.
//!
//! ## Modules
//!
//! - `message` - Message variants and tool calls
//! - `conversation` - Conversation State and the stage deltas applied to it

pub mod conversation;
pub mod message;

pub use conversation::{validate_history, ConversationState, StateDelta};
pub use message::{Message, ToolCall};
