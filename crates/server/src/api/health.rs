//! # Health API

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use super::ResponseBase;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthCheck {
    pub message: String,
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is alive", body = ResponseBase<HealthCheck>)
    )
)]
pub async fn health_check(State(state): State<AppState>) -> Json<ResponseBase<HealthCheck>> {
    let name = &state.settings.project_name;
    tracing::info!(name = %name, "Someone checked the health of the API");
    Json(ResponseBase::success(HealthCheck {
        message: format!("Hello, {}, I am alive!", name),
    }))
}
