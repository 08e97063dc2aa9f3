//! # Decision Skill
//!
//! Entry stage: answer directly, or route the query to a full research.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::ModelInvocationError;
use crate::llm::ChatModel;
use crate::skills::llm_helpers::invoke_structured;
use crate::skills::prompts;
use crate::state::{ConversationState, Message, StateDelta};

/// Output object of the decision making stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecisionOutput {
    /// Whether the user query requires research or not.
    pub requires_research: bool,
    /// The answer to the user query. It should be None if the user query
    /// requires research, otherwise it should be a direct answer to the user query.
    #[serde(default)]
    pub answer: Option<String>,
}

pub struct DecisionSkill;

impl DecisionSkill {
    /// Decide whether research is needed.
    ///
    /// A present answer is appended even when research is requested; the two
    /// fields are independent.
    pub async fn run(
        model: &dyn ChatModel,
        state: &ConversationState,
    ) -> Result<StateDelta, ModelInvocationError> {
        let output: DecisionOutput = invoke_structured(
            model,
            prompts::DECISION_MAKING,
            &state.messages,
            "decision_making_output",
        )
        .await?;

        tracing::info!(requires_research = output.requires_research, "Decision made");

        let mut delta = StateDelta::new().with_requires_research(output.requires_research);
        if let Some(answer) = output.answer.filter(|a| !a.is_empty()) {
            delta = delta.with_message(Message::ai(answer));
        }
        Ok(delta)
    }
}
