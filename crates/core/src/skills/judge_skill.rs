//! # Judge Skill
//!
//! Self-assessment of the final answer with a bounded number of
//! self-correction cycles. Once the cap is reached the answer is accepted
//! without consulting the model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelInvocationError;
use crate::llm::ChatModel;
use crate::skills::llm_helpers::invoke_structured;
use crate::skills::prompts;
use crate::state::{ConversationState, Message, StateDelta};
use crate::swarm::pipeline::JudgePolicy;

/// Output object of the judge stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct JudgeOutput {
    /// Whether the answer is good or not.
    pub is_good_answer: bool,
    /// Detailed feedback about why the answer is not good. It should be None
    /// if the answer is good.
    #[serde(default)]
    pub feedback: Option<String>,
}

/// Result of one judge evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeStep {
    pub delta: StateDelta,
    /// The cap was reached and the answer accepted as-is
    pub forced_acceptance: bool,
}

pub struct JudgeSkill;

impl JudgeSkill {
    pub async fn run(
        model: &dyn ChatModel,
        state: &ConversationState,
        policy: JudgePolicy,
    ) -> Result<JudgeStep, ModelInvocationError> {
        if policy.should_force_accept(state.num_feedback_requests) {
            tracing::warn!(
                num_feedback_requests = state.num_feedback_requests,
                "Feedback cap reached, accepting answer without review"
            );
            return Ok(JudgeStep {
                delta: StateDelta::new().with_is_good_answer(true),
                forced_acceptance: true,
            });
        }

        let verdict: JudgeOutput =
            invoke_structured(model, prompts::JUDGE, &state.messages, "judge_output").await?;

        tracing::info!(
            is_good_answer = verdict.is_good_answer,
            evaluation = state.num_feedback_requests + 1,
            "Answer judged"
        );

        let mut delta = StateDelta::new()
            .with_is_good_answer(verdict.is_good_answer)
            .with_num_feedback_requests(state.num_feedback_requests + 1);
        if let Some(feedback) = verdict.feedback.filter(|f| !f.trim().is_empty()) {
            delta = delta.with_message(Message::ai(feedback));
        }

        Ok(JudgeStep {
            delta,
            forced_acceptance: false,
        })
    }
}
