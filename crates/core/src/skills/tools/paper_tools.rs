//! # Paper Tools
//!
//! `download-paper`: fetch a paper and return its text.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::{parse_args, retry_with_backoff, Capability, CapabilityContext, CapabilityKind, RetryPolicy};
use crate::error::CapabilityError;
use crate::skills::llm_helpers::schema_value;

const SERVICE: &str = "paper host";

/// Input object to download a paper.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DownloadPaperArgs {
    /// The paper URL to download.
    pub url: String,
}

/// Downloads a paper over HTTP and extracts its text
#[derive(Debug, Clone)]
pub struct DownloadPaper {
    http: reqwest::Client,
    policy: RetryPolicy,
}

/// Raw download result
struct Fetched {
    content_type: String,
    bytes: Vec<u8>,
}

impl DownloadPaper {
    pub fn new(policy: RetryPolicy) -> Result<Self, CapabilityError> {
        // some hosts refuse requests without a browser user agent
        let http = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) agentic-researcher/0.1")
            .build()
            .map_err(|e| CapabilityError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { http, policy })
    }

    async fn fetch(&self, url: &str) -> Result<Fetched, CapabilityError> {
        let response = self
            .http
            .get(url)
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

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CapabilityError::Transport(e.to_string()))?;

        Ok(Fetched {
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

#[async_trait]
impl Capability for DownloadPaper {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::DownloadPaper
    }

    fn description(&self) -> &str {
        "Download a specific scientific paper from a given URL.\n\n\
         Example:\n\
         {\"url\": \"https://sample.pdf\"}\n\n\
         Returns:\n\
         The paper content."
    }

    fn args_schema(&self) -> Value {
        schema_value::<DownloadPaperArgs>()
    }

    #[tracing::instrument(skip_all, fields(capability = %self.kind()))]
    async fn invoke(&self, args: Value, ctx: CapabilityContext) -> Result<Value, CapabilityError> {
        let args: DownloadPaperArgs = parse_args(self.kind(), args)?;
        if !(args.url.starts_with("http://") || args.url.starts_with("https://")) {
            return Err(CapabilityError::InvalidArguments {
                capability: self.kind().name().to_string(),
                reason: format!("not an http(s) URL: {}", args.url),
            });
        }

        let fetched = retry_with_backoff(self.policy, SERVICE, || self.fetch(&args.url)).await?;
        let text = extract_text(fetched).await?;

        tracing::debug!(
            call_id = %ctx.call_id,
            url = %args.url,
            chars = text.len(),
            "Paper downloaded"
        );
        Ok(Value::String(text))
    }
}

fn is_pdf(content_type: &str, bytes: &[u8]) -> bool {
    content_type.contains("application/pdf") || bytes.starts_with(b"%PDF")
}

async fn extract_text(fetched: Fetched) -> Result<String, CapabilityError> {
    if !is_pdf(&fetched.content_type, &fetched.bytes) {
        return Ok(String::from_utf8_lossy(&fetched.bytes).into_owned());
    }

    // parsing is CPU-bound, and malformed files can panic inside the parser
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&fetched.bytes))
        .await
        .map_err(|e| CapabilityError::Extraction(e.to_string()))?
        .map_err(|e| CapabilityError::Extraction(e.to_string()))?;
    Ok(text.trim().to_string())
}
