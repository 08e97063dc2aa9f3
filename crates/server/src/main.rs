//! # Researcher
//!
//! HTTP server and command line front end for the research graph.

mod api;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use researcher_core::llm::{ChatModel, OpenAiCompatibleClient};
use researcher_core::skills::tools::{
    CapabilityRegistry, ConsoleFeedback, FeedbackChannel, FeedbackInbox,
};
use researcher_core::swarm::{Coordinator, RunInput, StreamFrame};
use researcher_core::ResearcherConfig;

#[derive(Parser, Clone)]
#[command(author, version, about = "Agentic Researcher - answers questions from scientific papers")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server (default)
    Serve {
        /// Interface to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
    /// Ask one question and stream the records to stdout
    Ask {
        /// The question to research
        question: String,
        /// Do not emit token records
        #[arg(long)]
        no_tokens: bool,
    },
}

/// Process-level settings of the HTTP surface
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// `DEV` or `PROD`
    pub env: String,
    pub project_name: String,
    pub version: String,
    pub description: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            env: "DEV".to_string(),
            project_name: "Agentic Researcher API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Research agent that searches, reads and cites scientific papers".to_string(),
        }
    }
}

impl ServerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let get = |key: &str, fallback: String| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(fallback)
        };
        Self {
            env: get("ENV", defaults.env),
            project_name: get("PROJECT_NAME", defaults.project_name),
            version: get("VERSION", defaults.version),
            description: get("DESCRIPTION", defaults.description),
        }
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("PROD")
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
    /// Questions from `ask-human-feedback` awaiting an HTTP answer
    pub inbox: Arc<FeedbackInbox>,
    pub settings: Arc<ServerSettings>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout belongs to `ask` output
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_model(config: &ResearcherConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    let client = OpenAiCompatibleClient::new(&config.model)
        .with_context(|| format!("Failed to create {} client", config.model.provider.display_name()))?;
    Ok(Arc::new(client))
}

fn build_coordinator(
    config: &ResearcherConfig,
    feedback: Arc<dyn FeedbackChannel>,
) -> anyhow::Result<Coordinator> {
    let model = build_model(config)?;
    let registry = CapabilityRegistry::from_config(config, feedback)
        .context("Failed to build capability registry")?;
    Ok(Coordinator::new(model, Arc::new(registry), config.run.clone()))
}

async fn run_server(settings: ServerSettings, host: String, port: u16) -> anyhow::Result<()> {
    let config = ResearcherConfig::from_env().context("Invalid configuration")?;
    let inbox = Arc::new(FeedbackInbox::new(config.feedback.timeout));
    let coordinator = build_coordinator(&config, inbox.clone())?;

    tracing::info!(
        provider = config.model.provider.display_name(),
        model = %config.model.model,
        capabilities = ?coordinator.registry().names(),
        "Research graph ready"
    );

    let state = AppState {
        coordinator,
        inbox,
        settings: Arc::new(settings),
    };
    let app = api::router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Server listening");
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn run_ask(question: String, stream_tokens: bool) -> anyhow::Result<()> {
    let config = ResearcherConfig::from_env().context("Invalid configuration")?;
    let coordinator = build_coordinator(&config, Arc::new(ConsoleFeedback::new()))?;

    let input = RunInput::new(question).with_stream_tokens(stream_tokens);
    let mut frames = Box::pin(coordinator.stream(input));
    let mut stdout = std::io::stdout();

    while let Some(frame) = frames.next().await {
        match frame {
            StreamFrame::Record(record) => {
                let line = serde_json::to_string(&record).context("Failed to encode record")?;
                writeln!(stdout, "{}", line).context("Failed to write to stdout")?;
                stdout.flush().context("Failed to write to stdout")?;
            }
            StreamFrame::Done => break,
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = ServerSettings::from_env();
    let json_logs = settings.is_production()
        || std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    init_tracing(json_logs);

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Ask {
            question,
            no_tokens,
        }) => run_ask(question, !no_tokens).await,
        Some(CliCommand::Serve { host, port }) => run_server(settings, host, port).await,
        None => run_server(settings, "0.0.0.0".to_string(), 8000).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_defaults() {
        let args = Args::parse_from(["researcher", "serve"]);
        match args.command {
            Some(CliCommand::Serve { host, port }) => {
                assert_eq!(host, "0.0.0.0");
                assert_eq!(port, 8000);
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_ask_flags() {
        let args = Args::parse_from(["researcher", "ask", "What is RLHF?", "--no-tokens"]);
        match args.command {
            Some(CliCommand::Ask {
                question,
                no_tokens,
            }) => {
                assert_eq!(question, "What is RLHF?");
                assert!(no_tokens);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ServerSettings::default();
        assert_eq!(settings.project_name, "Agentic Researcher API");
        assert!(!settings.is_production());
    }
}
