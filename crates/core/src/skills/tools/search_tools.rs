//! # Search Tools
//!
//! `search-papers`: full-text search over the CORE open-access collection.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_args, retry_with_backoff, Capability, CapabilityContext, CapabilityKind, RetryPolicy};
use crate::config::CoreApiConfig;
use crate::error::CapabilityError;
use crate::skills::llm_helpers::schema_value;

const SERVICE: &str = "CORE API";

/// Input object to search papers with the CORE API.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchPapersArgs {
    /// The query to search for on the selected archive.
    pub query: String,
    /// The maximum number of papers to return. It's default to 1, but you can
    /// increase it up to 10 in case you need to perform a more comprehensive search.
    #[serde(default = "default_max_papers")]
    #[schemars(range(min = 1, max = 10))]
    pub max_papers: u32,
}

fn default_max_papers() -> u32 {
    1
}

/// Paper search backed by the CORE v3 API
#[derive(Debug, Clone)]
pub struct SearchPapers {
    http: reqwest::Client,
    config: CoreApiConfig,
}

impl SearchPapers {
    pub fn new(config: CoreApiConfig) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .user_agent("agentic-researcher/0.1")
            .build()
            .map_err(|e| CapabilityError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    async fn fetch(&self, query: &str, limit: u32) -> Result<Value, CapabilityError> {
        let url = format!(
            "{}/search/outputs?q={}&limit={}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            limit
        );

        let mut request = self.http.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Upstream {
                service: SERVICE.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| CapabilityError::Transport(format!("Invalid response body: {}", e)))
    }
}

#[async_trait]
impl Capability for SearchPapers {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::SearchPapers
    }

    fn description(&self) -> &str {
        "Search for scientific papers using the CORE API.\n\n\
         Example:\n\
         {\"query\": \"Attention is all you need\", \"max_papers\": 1}\n\n\
         Returns:\n\
         A list of the relevant papers found with the corresponding relevant information."
    }

    fn args_schema(&self) -> Value {
        schema_value::<SearchPapersArgs>()
    }

    #[tracing::instrument(skip_all, fields(capability = %self.kind()))]
    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, CapabilityError> {
        let args: SearchPapersArgs = parse_args(self.kind(), args)?;
        if !(1..=10).contains(&args.max_papers) {
            return Err(CapabilityError::InvalidArguments {
                capability: self.kind().name().to_string(),
                reason: format!("max_papers must be between 1 and 10, got {}", args.max_papers),
            });
        }

        let policy = RetryPolicy::from(&self.config);
        let response =
            retry_with_backoff(policy, SERVICE, || self.fetch(&args.query, args.max_papers))
                .await?;

        let formatted = format_search_results(&response);
        tracing::debug!(
            call_id = %ctx.call_id,
            query = %args.query,
            chars = formatted.len(),
            "Paper search complete"
        );
        Ok(Value::String(formatted))
    }
}

/// Render a CORE search response as the text block given to the model
pub fn format_search_results(response: &Value) -> String {
    let results = response
        .get("results")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    if results.is_empty() {
        return "No relevant results were found".to_string();
    }

    results
        .iter()
        .map(|paper| {
            let published = first_present(paper, &["publishedDate", "yearPublished"]);
            let authors = paper
                .get("authors")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|a| a.get("name").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join(" and ")
                })
                .unwrap_or_default();
            let urls = first_present(paper, &["sourceFulltextUrls", "downloadUrl"]);

            format!(
                "* ID: {},\n* Title: {},\n* Published Date: {},\n* Authors: {},\n* Abstract: {},\n* Paper URLs: {}",
                field_text(paper.get("id")),
                field_text(paper.get("title")),
                published,
                authors,
                field_text(paper.get("abstract")),
                urls
            )
        })
        .collect::<Vec<_>>()
        .join("\n-----\n")
}

/// Text of the first field that is present and non-empty
fn first_present(paper: &Value, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| field_text(paper.get(*key)))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| field_text(Some(item)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}
