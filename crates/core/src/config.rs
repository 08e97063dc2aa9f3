//! # Configuration
//!
//! Explicit configuration handed to the model client and the capability
//! registry at construction. Environment variables are read once, in
//! [`ResearcherConfig::from_env`], and nowhere else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{LlmProvider, ModelConfig};

/// Settings for the CORE paper-search API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreApiConfig {
    /// API root
    pub base_url: String,
    /// Bearer token
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    /// Attempts per request, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on every further retry
    pub initial_backoff: Duration,
}

impl Default for CoreApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.core.ac.uk/v3".to_string(),
            api_key: None,
            max_attempts: 5,
            initial_backoff: Duration::from_secs(4),
        }
    }
}

/// Limits applied to each orchestration run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Judge evaluations allowed before the answer is accepted as-is
    pub max_feedback_requests: u32,
    /// Stage executions allowed before the run is aborted
    pub max_steps: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_feedback_requests: 2,
            max_steps: 25,
        }
    }
}

/// Settings for the human-feedback capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// How long to wait for a human answer
    pub timeout: Duration,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearcherConfig {
    pub model: ModelConfig,
    pub core_api: CoreApiConfig,
    pub run: RunConfig,
    pub feedback: FeedbackConfig,
}

impl ResearcherConfig {
    /// Build the configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&std::env::vars().collect())
    }

    /// Build the configuration from an explicit variable map
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let get = |key: &str| vars.get(key).filter(|v| !v.trim().is_empty()).cloned();

        let provider = match get("LLM_PROVIDER") {
            Some(p) => p.parse::<LlmProvider>()?,
            None => LlmProvider::default(),
        };
        let model_name = get("LLM_MODEL").unwrap_or_else(|| provider.default_model().to_string());
        let mut model = ModelConfig::with_provider(provider, model_name);
        model.base_url = get("LLM_BASE_URL");
        model.api_key = get(provider.api_key_env());

        let mut core_api = CoreApiConfig {
            api_key: get("CORE_API_KEY"),
            ..CoreApiConfig::default()
        };
        if let Some(url) = get("CORE_API_BASE_URL") {
            core_api.base_url = url.trim_end_matches('/').to_string();
        }

        let mut run = RunConfig::default();
        if let Some(raw) = get("MAX_FEEDBACK_REQUESTS") {
            run.max_feedback_requests = parse_number("MAX_FEEDBACK_REQUESTS", &raw)?;
        }
        if let Some(raw) = get("MAX_STEPS") {
            run.max_steps = parse_number("MAX_STEPS", &raw)?;
        }

        let mut feedback = FeedbackConfig::default();
        if let Some(raw) = get("FEEDBACK_TIMEOUT_SECS") {
            feedback.timeout = Duration::from_secs(parse_number("FEEDBACK_TIMEOUT_SECS", &raw)?);
        }

        Ok(Self {
            model,
            core_api,
            run,
            feedback,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
