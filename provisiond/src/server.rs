//! HTTP surface for request intake

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::IntakeError;
use crate::intake::Intake;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    #[serde(default)]
    repo_url: Option<String>,
}

/// Build the service router.
pub fn routes(intake: Arc<Intake>) -> Router {
    Router::new()
        .route("/create", post(create_environment))
        .route("/health", get(health))
        .route("/queue", get(queue_status))
        .layer(Extension(intake))
        .layer(TraceLayer::new_for_http())
}

async fn create_environment(
    Extension(intake): Extension<Arc<Intake>>,
    payload: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    // A body that is absent, not JSON, or mistyped carries no usable URL.
    let repo_url = match payload {
        Ok(Json(request)) => request.repo_url,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "unreadable provisioning request body");
            None
        }
    };

    match intake.submit(repo_url.as_deref()).await {
        Ok(accepted) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "Environment creation request received and is being processed",
                "recordId": accepted.record_id,
            })),
        )
            .into_response(),
        Err(IntakeError::Validation { message }) => {
            warn!(error = %message, "rejected provisioning request");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "success": false, "message": message })),
            )
                .into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to accept provisioning request");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": "An error occurred while processing your request",
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn queue_status(Extension(intake): Extension<Arc<Intake>>) -> Json<serde_json::Value> {
    let queue = intake.orchestrator().queue();
    Json(json!({
        "capacity": queue.capacity(),
        "running": queue.running(),
        "waiting": queue.waiting(),
    }))
}
