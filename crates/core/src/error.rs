//! # Error Taxonomy
//!
//! Typed failures for model calls, capability calls, and whole runs.
//!
//! Stage-level errors ([`RunError`]) abort a run and surface once as a
//! terminal error record. Per-tool-call errors ([`CapabilityError`]) are
//! contained by the tool stage and fed back into the conversation as data.

use thiserror::Error;

use crate::swarm::pipeline::Stage;

/// Failure of the language-model backend.
#[derive(Debug, Error)]
pub enum ModelInvocationError {
    /// No API key was configured for the provider
    #[error("Missing API key: set {0}")]
    MissingApiKey(String),

    /// Network-level failure (connect, TLS, dropped stream)
    #[error("Model transport error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status (quota, auth, bad request)
    #[error("Model backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response could not be decoded into the requested shape
    #[error("Malformed model output: {0}")]
    MalformedOutput(String),
}

/// Failure of a capability invocation.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A tool call referenced a capability the registry does not hold
    #[error("Unknown capability: {0}")]
    Unknown(String),

    /// Arguments did not match the capability's declared schema
    #[error("Invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    /// Upstream service kept answering with a non-2xx status
    #[error("Got non 2xx response from {service}: {status} {body}")]
    Upstream {
        service: String,
        status: u16,
        body: String,
    },

    /// Network-level failure talking to an upstream service
    #[error("Transport error: {0}")]
    Transport(String),

    /// Downloaded content could not be turned into text
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// No human answer could be obtained
    #[error("Human feedback unavailable: {0}")]
    Feedback(String),
}

impl CapabilityError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Transport(_))
    }
}

/// Fatal, stage-level failure of an orchestration run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("{stage} stage failed: {source}")]
    Model {
        stage: Stage,
        #[source]
        source: ModelInvocationError,
    },

    /// The model requested a capability missing from the registry
    #[error("Tool call {call_id} references unknown capability '{name}'")]
    UnknownCapability { call_id: String, name: String },

    /// Caller-supplied history breaks a message invariant
    #[error("Invalid history: {0}")]
    InvalidHistory(String),

    #[error("Run exceeded the step limit of {0} stage executions")]
    StepLimit(usize),

    #[error("Run cancelled by caller")]
    Cancelled,
}

/// Invalid or missing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown LLM provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}
