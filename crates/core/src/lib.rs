//! # Researcher Core
//!
//! The orchestration core of the Agentic Researcher: a five-stage research
//! graph driven by a language model, the capabilities it can call, and the
//! translation of its progress into an ordered record stream.
//!
//! ## Architecture
//!
//! - `llm/` - Model capability trait and the OpenAI-compatible client
//! - `models` - LLM provider selection
//! - `config` - Explicit configuration, read once from the environment
//! - `skills/` - One skill per graph stage, prompts, and capabilities
//! - `state/` - Messages and the per-run conversation state
//! - `swarm/` - Pipeline state machine, driver loop, events, stream translation
//!
//! ## Usage
//!
//! ```rust,ignore
//! use researcher_core::swarm::{Coordinator, RunInput};
//!
//! let coordinator = Coordinator::new(model, registry, config.run.clone());
//! let outcome = coordinator.run(RunInput::new("Find recent papers on RLHF")).await?;
//! println!("{}", outcome.answer().unwrap_or_default());
//! ```

pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod skills;
pub mod state;
pub mod swarm;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::ResearcherConfig;
pub use error::{CapabilityError, ConfigError, ModelInvocationError, RunError};
