//! # Pipeline Stages
//!
//! The five-stage state machine and its router predicates.
//!
//! ```text
//! decision_making ──(research)──▶ planning ──▶ agent ⇄ tools
//!        │                            ▲          │
//!        └──(direct answer)──▶ END    └─(reject)─ judge ──(accept)──▶ END
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RunError;
use crate::state::ConversationState;

/// Node of the orchestration graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Decide whether the query needs research
    DecisionMaking,
    /// Write a step-by-step plan
    Planning,
    /// Act: answer or request tool calls
    Agent,
    /// Execute the requested tool calls
    Tools,
    /// Self-assess the answer
    Judge,
}

impl Stage {
    pub const ENTRY: Stage = Stage::DecisionMaking;

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::DecisionMaking => "decision_making",
            Stage::Planning => "planning",
            Stage::Agent => "agent",
            Stage::Tools => "tools",
            Stage::Judge => "judge",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where control goes after a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(Stage),
    End,
}

/// Transition function: a pure predicate over the state a stage left behind.
pub fn route(stage: Stage, state: &ConversationState) -> Next {
    match stage {
        Stage::DecisionMaking if state.requires_research => Next::Stage(Stage::Planning),
        Stage::DecisionMaking => Next::End,
        Stage::Planning => Next::Stage(Stage::Agent),
        Stage::Agent if !state.pending_tool_calls().is_empty() => Next::Stage(Stage::Tools),
        Stage::Agent => Next::Stage(Stage::Judge),
        Stage::Tools => Next::Stage(Stage::Agent),
        Stage::Judge if state.is_good_answer => Next::End,
        Stage::Judge => Next::Stage(Stage::Planning),
    }
}

/// Bounded self-correction: how many judge evaluations may call the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JudgePolicy {
    pub max_feedback_requests: u32,
}

impl Default for JudgePolicy {
    fn default() -> Self {
        Self {
            max_feedback_requests: 2,
        }
    }
}

impl JudgePolicy {
    pub fn new(max_feedback_requests: u32) -> Self {
        Self {
            max_feedback_requests,
        }
    }

    /// Whether the judge must accept without consulting the model
    pub fn should_force_accept(&self, num_feedback_requests: u32) -> bool {
        num_feedback_requests >= self.max_feedback_requests
    }
}

/// Position of a run in the state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Stage to execute next; `None` once the run reached END
    pub stage: Option<Stage>,
    /// Stages executed so far, in order
    pub visited: Vec<Stage>,
    /// Maximum number of stage executions
    pub max_steps: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(25)
    }
}

impl Pipeline {
    pub fn new(max_steps: usize) -> Self {
        Self {
            stage: Some(Stage::ENTRY),
            visited: Vec::new(),
            max_steps,
        }
    }

    /// Record entry into the current stage, enforcing the step limit
    pub fn enter(&mut self) -> Result<Option<Stage>, RunError> {
        let Some(stage) = self.stage else {
            return Ok(None);
        };
        if self.visited.len() >= self.max_steps {
            return Err(RunError::StepLimit(self.max_steps));
        }
        self.visited.push(stage);
        Ok(Some(stage))
    }

    /// Re-evaluate the router of the stage that just ran
    pub fn advance(&mut self, state: &ConversationState) -> Next {
        let next = match self.stage {
            Some(stage) => route(stage, state),
            None => Next::End,
        };
        self.stage = match next {
            Next::Stage(stage) => Some(stage),
            Next::End => None,
        };
        next
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_none()
    }

    /// How many times a stage has been executed
    pub fn visits(&self, stage: Stage) -> usize {
        self.visited.iter().filter(|s| **s == stage).count()
    }
}
