//! # HTTP API
//!
//! Router, response envelope and request middleware shared by the endpoint
//! modules.

pub mod health;
pub mod research;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::Instrument;
use utoipa::{OpenApi, ToSchema};

use crate::AppState;

const REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const PROCESS_TIME: HeaderName = HeaderName::from_static("x-process-time");

/// Envelope wrapped around every JSON response
#[derive(Debug, Serialize, ToSchema)]
pub struct ResponseBase<T> {
    pub message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub meta: Option<serde_json::Value>,
    pub data: Option<T>,
    /// `success` or `error`
    pub status: String,
    /// UTC, RFC 3339
    pub timestamp: String,
}

impl<T> ResponseBase<T> {
    pub fn success(data: T) -> Self {
        Self {
            message: None,
            meta: None,
            data: Some(data),
            status: "success".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Error reply in the same envelope
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ResponseBase::<()> {
            message: Some(self.message),
            meta: None,
            data: None,
            status: "error".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Agentic Researcher API",
        description = "Research agent that searches, reads and cites scientific papers"
    ),
    paths(
        health::health_check,
        research::research_stream,
        research::research_query,
        research::submit_feedback,
    ),
    components(schemas(
        health::HealthCheck,
        research::StreamRequest,
        research::ResearchRequest,
        research::ResearchResponse,
        research::FeedbackAnswer,
        research::FeedbackAccepted,
    )),
    tags(
        (name = "Health", description = "Liveness"),
        (name = "Research", description = "Research runs and human feedback")
    )
)]
pub struct ApiDoc;

async fn serve_openapi(State(state): State<AppState>) -> Response {
    let mut doc = ApiDoc::openapi();
    doc.info.title = state.settings.project_name.clone();
    doc.info.version = state.settings.version.clone();
    doc.info.description = Some(state.settings.description.clone());

    let json = doc.to_json().unwrap_or_default();
    (
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        Body::from(json),
    )
        .into_response()
}

/// Tags each request with an id and reports how long it took
async fn request_context(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let started = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

    span.in_scope(|| {
        tracing::debug!(status = response.status().as_u16(), elapsed_ms, "Request handled");
    });

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}", elapsed_ms)) {
        headers.insert(PROCESS_TIME, value);
    }
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID, value);
    }
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::health_routes())
        .nest("/research", research::research_routes())
        .route("/openapi.json", get(serve_openapi))
        .layer(middleware::from_fn(request_context))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    use researcher_core::config::RunConfig;
    use researcher_core::llm::ChatModel;
    use researcher_core::skills::tools::{CapabilityRegistry, FeedbackInbox};
    use researcher_core::swarm::Coordinator;
    use researcher_core::testing::ScriptedModel;

    use crate::{AppState, ServerSettings};

    pub fn state(model: &Arc<ScriptedModel>, registry: CapabilityRegistry) -> AppState {
        let model: Arc<dyn ChatModel> = model.clone();
        AppState {
            coordinator: Coordinator::new(model, Arc::new(registry), RunConfig::default()),
            inbox: Arc::new(FeedbackInbox::new(Duration::from_secs(30))),
            settings: Arc::new(ServerSettings::default()),
        }
    }

    pub async fn send(state: AppState, request: Request<Body>) -> Response {
        super::router(state).oneshot(request).await.unwrap()
    }

    pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    pub async fn body_json(response: Response) -> serde_json::Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }
}
