//! # Planning Skill
//!
//! Writes a step by step plan naming the capability each step needs.

use crate::error::ModelInvocationError;
use crate::llm::{ChatModel, ModelRequest, TokenCallback};
use crate::skills::prompts;
use crate::skills::tools::CapabilityRegistry;
use crate::state::{ConversationState, StateDelta};

pub struct PlanningSkill;

impl PlanningSkill {
    pub async fn run(
        model: &dyn ChatModel,
        registry: &CapabilityRegistry,
        state: &ConversationState,
        on_token: TokenCallback<'_>,
    ) -> Result<StateDelta, ModelInvocationError> {
        let system = prompts::planning_prompt(&registry.format_tools_description());
        let response = model
            .invoke(ModelRequest::text(system, state.messages.clone()), on_token)
            .await?;

        tracing::debug!(chars = response.content.len(), "Plan written");
        Ok(StateDelta::new().with_message(response.into_message()))
    }
}
