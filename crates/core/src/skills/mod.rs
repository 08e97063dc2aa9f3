//! # Researcher Skills
//!
//! One skill per graph stage, plus the capabilities the act stage can call.
//!
//! ## Architecture
//!
//! ```text
//! Coordinator (driver loop)
//!   └── Skills (one per stage, return a StateDelta)
//!         └── Tools (capabilities dispatched by the tool stage)
//! ```
//!
//! - `DecisionSkill` - Direct answer or research
//! - `PlanningSkill` - Step by step plan over the available capabilities
//! - `AgentSkill` - Act on the plan, optionally requesting tool calls
//! - `JudgeSkill` - Bounded self-assessment of the answer

pub mod llm_helpers;
pub mod prompts;
pub mod tools;

pub mod agent_skill;
pub mod decision_skill;
pub mod judge_skill;
pub mod planning_skill;

pub use agent_skill::AgentSkill;
pub use decision_skill::{DecisionOutput, DecisionSkill};
pub use judge_skill::{JudgeOutput, JudgeSkill, JudgeStep};
pub use planning_skill::PlanningSkill;
