//! # Agent Skill
//!
//! Act stage: the model works through the plan with the capabilities bound,
//! either answering or requesting tool calls.

use crate::error::ModelInvocationError;
use crate::llm::{ChatModel, ModelRequest, TokenCallback};
use crate::skills::prompts;
use crate::skills::tools::CapabilityRegistry;
use crate::state::{ConversationState, StateDelta};

pub struct AgentSkill;

impl AgentSkill {
    /// One act step. The response is appended as a single `ai` message that
    /// may carry tool calls.
    pub async fn run(
        model: &dyn ChatModel,
        registry: &CapabilityRegistry,
        state: &ConversationState,
        on_token: TokenCallback<'_>,
    ) -> Result<StateDelta, ModelInvocationError> {
        let request =
            ModelRequest::with_tools(prompts::AGENT, state.messages.clone(), registry.tool_specs());
        let response = model.invoke(request, on_token).await?;

        if !response.tool_calls.is_empty() {
            tracing::info!(
                tool_calls = response.tool_calls.len(),
                names = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "Model requested tool calls"
            );
        }
        Ok(StateDelta::new().with_message(response.into_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ignore_tokens, OutputMode};
    use crate::skills::tools::CapabilityKind;
    use crate::state::{Message, ToolCall};
    use crate::testing::{FakeCapability, ScriptedModel};
    use serde_json::json;

    #[tokio::test]
    async fn test_tool_calls_are_kept_on_the_message() {
        let registry = CapabilityRegistry::new()
            .register(FakeCapability::echo(CapabilityKind::SearchPapers))
            .register(FakeCapability::echo(CapabilityKind::DownloadPaper));
        let call = ToolCall::new("call_1", "search-papers", json!({"query": "rlhf"}));
        let model = ScriptedModel::new().respond_tool_calls(vec![call.clone()]);

        let delta = AgentSkill::run(&model, &registry, &ConversationState::default(), &ignore_tokens)
            .await
            .unwrap();
        assert_eq!(delta.messages.len(), 1);
        assert_eq!(delta.messages[0].tool_calls(), &[call]);

        let OutputMode::Tools(tools) = &model.requests()[0].output else {
            panic!("agent must bind tools");
        };
        assert_eq!(tools.len(), 2);
    }

    #[tokio::test]
    async fn test_streams_tokens_of_final_answer() {
        let model = ScriptedModel::new().respond_text("RLHF aligns models [1]");
        let seen = std::sync::Mutex::new(String::new());
        let on_token = |t: &str| seen.lock().unwrap().push_str(t);

        let delta = AgentSkill::run(
            &model,
            &CapabilityRegistry::new(),
            &ConversationState::new(vec![Message::human("q")]),
            &on_token,
        )
        .await
        .unwrap();

        assert_eq!(delta.messages, vec![Message::ai("RLHF aligns models [1]")]);
        assert_eq!(*seen.lock().unwrap(), "RLHF aligns models [1]");
    }
}
