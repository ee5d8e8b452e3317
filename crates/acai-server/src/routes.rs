//! HTTP routes.
//!
//! - `POST /conversations` starts a conversation from `{"message": "..."}`
//!   and responds `201` with the titled conversation and its first reply.
//! - `GET /healthz` responds `200 ok`.
//! - Anything else responds `404`.
//!
//! The whole router sits behind [`MetricsLayer`], so rejections produced by
//! extractors (malformed JSON, wrong content type) are counted too.

use crate::{metrics::HttpMetrics, middleware::MetricsLayer};
use acai_core::{Conversation, ConversationModel, Error, Orchestrator};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct StartConversation {
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Maps orchestration failures onto HTTP responses.
///
/// Client errors keep their message; everything else becomes an opaque
/// `500` so upstream details do not leak to callers.
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

/// Builds the service router, instrumented with `metrics`.
pub fn router<M: ConversationModel>(orchestrator: Orchestrator<M>, metrics: HttpMetrics) -> Router {
    Router::new()
        .route("/conversations", post(start_conversation::<M>))
        .route("/healthz", get(healthz))
        .fallback(not_found)
        .with_state(orchestrator)
        .layer(MetricsLayer::new(metrics))
}

async fn start_conversation<M: ConversationModel>(
    State(orchestrator): State<Orchestrator<M>>,
    Json(body): Json<StartConversation>,
) -> Result<(StatusCode, Json<Conversation>), ApiError> {
    if body.message.trim().is_empty() {
        return Err(Error::InvalidRequest {
            reason: "message must not be empty".to_string(),
        }
        .into());
    }

    let conversation = Conversation::new(Uuid::new_v4().to_string(), body.message);
    let conversation = orchestrator.orchestrate(conversation).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}
