//! # Research API
//!
//! Streaming and one-shot research runs, plus delivery of human answers to
//! questions the graph asked through `ask-human-feedback`.

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::post,
    Json, Router,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use utoipa::ToSchema;

use researcher_core::state::{validate_history, Message};
use researcher_core::swarm::RunInput;
use researcher_core::RunError;

use super::{ApiError, ResponseBase};
use crate::AppState;

/// Body of `POST /research/stream`
#[derive(Debug, Deserialize, ToSchema)]
pub struct StreamRequest {
    /// The new user message
    pub message: String,
    /// Prior dialogue, oldest first
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default = "default_stream_tokens")]
    pub stream_tokens: bool,
}

fn default_stream_tokens() -> bool {
    true
}

impl From<StreamRequest> for RunInput {
    fn from(req: StreamRequest) -> Self {
        let input = RunInput::new(req.message)
            .with_history(req.history)
            .with_stream_tokens(req.stream_tokens);
        match req.run_id {
            Some(run_id) => input.with_run_id(run_id),
            None => input,
        }
    }
}

/// Body of `POST /research/query`
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResearchRequest {
    pub query: String,
    /// Background the answer should take into account
    #[serde(default)]
    pub context: Option<String>,
    /// Reviewer remarks on an earlier answer to the same query
    #[serde(default)]
    pub feedback: Option<String>,
}

impl ResearchRequest {
    fn into_input(self) -> RunInput {
        let history = self
            .context
            .filter(|c| !c.trim().is_empty())
            .map(|c| vec![Message::human(format!("Context: {}", c))])
            .unwrap_or_default();
        let message = match self.feedback.filter(|f| !f.trim().is_empty()) {
            Some(feedback) => format!(
                "{}\n\nFeedback on the previous answer: {}",
                self.query, feedback
            ),
            None => self.query,
        };
        RunInput::new(message)
            .with_history(history)
            .with_stream_tokens(false)
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResearchResponse {
    pub answer: String,
    /// URLs cited in the answer
    pub citations: Vec<String>,
    /// The answer was accepted because the review budget ran out
    pub requires_feedback: bool,
}

/// Body of `POST /research/feedback/{request_id}`
#[derive(Debug, Deserialize, ToSchema)]
pub struct FeedbackAnswer {
    pub answer: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FeedbackAccepted {
    pub request_id: String,
}

pub fn research_routes() -> Router<AppState> {
    Router::new()
        .route("/stream", post(research_stream))
        .route("/query", post(research_query))
        .route("/feedback/:request_id", post(submit_feedback))
}

/// Run the research graph and stream its records as server-sent events
#[utoipa::path(
    post,
    path = "/research/stream",
    tag = "Research",
    request_body = StreamRequest,
    responses(
        (status = 200, description = "`data: <record>` events ending with `data: [DONE]`", body = String, content_type = "text/event-stream"),
        (status = 422, description = "History holds a system message or an unanswered tool result")
    )
)]
pub async fn research_stream(
    State(state): State<AppState>,
    Json(req): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    // reject before the event stream starts so the caller gets a status code
    validate_history(&req.history).map_err(|reason| {
        tracing::warn!(reason = %reason, "Rejected stream history");
        ApiError::unprocessable(RunError::InvalidHistory(reason).to_string())
    })?;

    let input = RunInput::from(req);
    tracing::info!(
        run_id = input.run_id.as_deref().unwrap_or("-"),
        history = input.history.len(),
        "Research stream requested"
    );

    // dropping the body on disconnect cancels the run
    let stream = state
        .coordinator
        .stream(input)
        .map(|frame| Ok(Event::default().data(frame.to_sse_data())));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Run the research graph to completion and return the answer
#[utoipa::path(
    post,
    path = "/research/query",
    tag = "Research",
    request_body = ResearchRequest,
    responses(
        (status = 200, description = "Final answer", body = ResponseBase<ResearchResponse>),
        (status = 500, description = "The run failed")
    )
)]
pub async fn research_query(
    State(state): State<AppState>,
    Json(req): Json<ResearchRequest>,
) -> Result<Json<ResponseBase<ResearchResponse>>, ApiError> {
    let outcome = state
        .coordinator
        .run(req.into_input())
        .await
        .map_err(|e| match e {
            RunError::InvalidHistory(_) => ApiError::unprocessable(e.to_string()),
            e => {
                tracing::error!(error = %e, "Error processing research query");
                ApiError::internal(e.to_string())
            }
        })?;

    let response = ResearchResponse {
        answer: outcome.answer().unwrap_or_default().to_string(),
        citations: outcome.citations(),
        requires_feedback: outcome.forced_acceptance,
    };
    Ok(Json(ResponseBase::success(response)))
}

/// Answer a pending human-feedback question
#[utoipa::path(
    post,
    path = "/research/feedback/{request_id}",
    tag = "Research",
    params(
        ("request_id" = String, Path, description = "Id announced in the `feedback_requested` record")
    ),
    request_body = FeedbackAnswer,
    responses(
        (status = 200, description = "Answer delivered", body = ResponseBase<FeedbackAccepted>),
        (status = 404, description = "No question with that id is waiting")
    )
)]
pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(request_id): Path<String>,
    Json(body): Json<FeedbackAnswer>,
) -> Result<Json<ResponseBase<FeedbackAccepted>>, ApiError> {
    if !state.inbox.resolve(&request_id, body.answer) {
        return Err(ApiError::not_found(format!(
            "No pending feedback request with id {}",
            request_id
        )));
    }
    tracing::info!(request_id = %request_id, "Human feedback delivered");
    Ok(Json(
        ResponseBase::success(FeedbackAccepted { request_id }).with_message("Feedback delivered"),
    ))
}
