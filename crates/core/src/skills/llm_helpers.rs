//! # LLM Helpers
//!
//! Shared utilities for schema-constrained model calls. Output types derive
//! `JsonSchema`; the schema is handed to the backend and the answer is
//! decoded back into the same type.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::error::ModelInvocationError;
use crate::llm::{ignore_tokens, ChatModel, ModelRequest, OutputSchema};
use crate::state::Message;

/// JSON schema document for `T`
pub fn schema_value<T: JsonSchema>() -> serde_json::Value {
    schemars::schema_for!(T).to_value()
}

pub fn output_schema<T: JsonSchema>(name: &str) -> OutputSchema {
    OutputSchema {
        name: name.to_string(),
        schema: schema_value::<T>(),
    }
}

/// Run a model call constrained to the schema of `T` and decode the answer.
///
/// Structured calls report no tokens: their fragments are raw JSON.
pub async fn invoke_structured<T>(
    model: &dyn ChatModel,
    system: &str,
    messages: &[Message],
    name: &str,
) -> Result<T, ModelInvocationError>
where
    T: DeserializeOwned + JsonSchema,
{
    let request = ModelRequest::structured(system, messages.to_vec(), output_schema::<T>(name));
    let response = model.invoke(request, &ignore_tokens).await?;
    parse_structured(&response.content)
}

/// Decode a structured answer, tolerating a surrounding markdown fence
pub fn parse_structured<T: DeserializeOwned>(content: &str) -> Result<T, ModelInvocationError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(body).map_err(|e| {
        ModelInvocationError::MalformedOutput(format!("{} in structured output: {}", e, body))
    })
}
