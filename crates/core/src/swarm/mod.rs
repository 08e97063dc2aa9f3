//! # Swarm Orchestration
//!
//! The research graph and its event plumbing.
//!
//! ## Pipeline Flow
//!
//! ```text
//! Decision → Planning → Agent ⇄ Tools → Judge ─┐
//!    │          ▲                              │
//!    ▼          └────────── (rejected) ────────┘
//!   END  ◀──────────────── (accepted / cap) ───┘
//! ```

pub mod coordinator;
pub mod events;
pub mod pipeline;
pub mod stream;

pub use coordinator::{extract_urls, Coordinator, RunInput, RunOutcome};
pub use events::{EventEmitter, GraphEvent, GraphEventKind};
pub use pipeline::{route, JudgePolicy, Next, Pipeline, Stage};
pub use stream::{
    translate_all, translate_events, ChatMessage, StreamFrame, StreamRecord, StreamTranslator,
};
