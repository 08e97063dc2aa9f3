//! # Capabilities
//!
//! The closed set of external actions the model may request, behind one
//! [`Capability`] interface, and the read-only registry the tool stage
//! dispatches through.
//!
//! - `search_tools` - `search-papers` over the CORE API
//! - `paper_tools` - `download-paper`, text extraction from PDFs
//! - `feedback_tools` - `ask-human-feedback`, console or HTTP inbox

pub mod feedback_tools;
pub mod paper_tools;
pub mod search_tools;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CoreApiConfig, ResearcherConfig};
use crate::error::CapabilityError;
use crate::llm::ToolSpec;
use crate::swarm::events::EventEmitter;

pub use feedback_tools::{AskHumanFeedback, ConsoleFeedback, FeedbackChannel, FeedbackInbox};
pub use paper_tools::DownloadPaper;
pub use search_tools::SearchPapers;

/// Every capability the registry can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CapabilityKind {
    SearchPapers,
    DownloadPaper,
    AskHumanFeedback,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 3] = [
        CapabilityKind::SearchPapers,
        CapabilityKind::DownloadPaper,
        CapabilityKind::AskHumanFeedback,
    ];

    /// Name the model uses to request the capability
    pub fn name(&self) -> &'static str {
        match self {
            CapabilityKind::SearchPapers => "search-papers",
            CapabilityKind::DownloadPaper => "download-paper",
            CapabilityKind::AskHumanFeedback => "ask-human-feedback",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CapabilityKind {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CapabilityKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CapabilityError::Unknown(s.to_string()))
    }
}

/// Per-invocation context handed to a capability
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    pub run_id: String,
    /// Identifier of the tool call being served
    pub call_id: String,
    /// Sink for custom progress signals
    pub emitter: EventEmitter,
}

impl CapabilityContext {
    pub fn new(run_id: impl Into<String>, call_id: impl Into<String>, emitter: EventEmitter) -> Self {
        Self {
            run_id: run_id.into(),
            call_id: call_id.into(),
            emitter,
        }
    }

    /// Context whose signals go nowhere
    pub fn detached(call_id: impl Into<String>) -> Self {
        Self::new("detached", call_id, EventEmitter::detached())
    }
}

/// An external, named, schema-typed action
#[async_trait]
pub trait Capability: Send + Sync {
    fn kind(&self) -> CapabilityKind;

    /// Description shown to the model
    fn description(&self) -> &str;

    /// JSON schema of the argument payload
    fn args_schema(&self) -> serde_json::Value;

    /// Run the capability. Transient upstream failures are retried here;
    /// whatever error is returned is final.
    async fn invoke(
        &self,
        args: serde_json::Value,
        ctx: CapabilityContext,
    ) -> Result<serde_json::Value, CapabilityError>;
}

/// Decode a tool-call payload into the capability's argument type
pub fn parse_args<T: DeserializeOwned>(
    kind: CapabilityKind,
    args: serde_json::Value,
) -> Result<T, CapabilityError> {
    serde_json::from_value(args).map_err(|e| CapabilityError::InvalidArguments {
        capability: kind.name().to_string(),
        reason: e.to_string(),
    })
}

/// Read-only name to capability map, shared by every run
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<CapabilityKind, Arc<dyn Capability>>,
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The full research toolset, with the given human-feedback channel
    pub fn from_config(
        config: &ResearcherConfig,
        feedback: Arc<dyn FeedbackChannel>,
    ) -> Result<Self, CapabilityError> {
        Ok(Self::new()
            .register(SearchPapers::new(config.core_api.clone())?)
            .register(DownloadPaper::new(RetryPolicy::from(&config.core_api))?)
            .register(AskHumanFeedback::new(feedback)))
    }

    /// Add (or replace) a capability
    pub fn register(mut self, capability: impl Capability + 'static) -> Self {
        self.capabilities
            .insert(capability.kind(), Arc::new(capability));
        self
    }

    /// Look up a capability by the name the model used
    pub fn get(&self, name: &str) -> Result<Arc<dyn Capability>, CapabilityError> {
        let kind: CapabilityKind = name.parse()?;
        self.capabilities
            .get(&kind)
            .cloned()
            .ok_or_else(|| CapabilityError::Unknown(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.capabilities.keys().map(CapabilityKind::name).collect()
    }

    /// Tool bindings for the act stage
    pub fn tool_specs(&self) -> Vec<ToolSpec> {
        self.capabilities
            .values()
            .map(|capability| ToolSpec {
                name: capability.kind().name().to_string(),
                description: capability.description().to_string(),
                parameters: capability.args_schema(),
            })
            .collect()
    }

    /// Human-readable capability list for the planning prompt
    pub fn format_tools_description(&self) -> String {
        self.capabilities
            .values()
            .map(|capability| {
                let schema = capability.args_schema();
                let properties = schema
                    .get("properties")
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({}));
                format!(
                    "- {}: {}\n Input arguments: {}",
                    capability.kind().name(),
                    capability.description(),
                    properties
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Bounded exponential backoff for upstream calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first
    pub max_attempts: u32,
    /// Delay after the first failure; doubles per attempt
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&CoreApiConfig::default())
    }
}

impl From<&CoreApiConfig> for RetryPolicy {
    fn from(config: &CoreApiConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: config.initial_backoff,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.initial_backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Run `operation` until it succeeds, fails permanently, or runs out of
/// attempts. Only transient errors are retried.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    service: &str,
    mut operation: F,
) -> Result<T, CapabilityError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CapabilityError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    service,
                    attempt = attempt + 1,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Transient upstream failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
