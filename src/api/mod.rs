use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::middleware::session::require_session;
use crate::AppState;

pub mod handlers;
pub mod summarizer;

/// Build the full HTTP application.
///
/// * `/api/v1/*` — key management, behind the session trust boundary
/// * `/api/github-summarizer` — authenticated by `x-api-key`
/// * `/healthz`, `/readyz` — probes, no auth
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api/v1", management_router(state.clone()))
        .route("/api/github-summarizer", post(summarizer::summarize_repository))
        .fallback(fallback_404)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Management API. All routes are relative; the caller mounts this under `/api/v1`.
pub fn management_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/keys", get(handlers::list_keys).post(handlers::create_key))
        .route(
            "/keys/:id",
            get(handlers::get_key)
                .put(handlers::update_key)
                .delete(handlers::delete_key),
        )
        .route("/validate-key", post(handlers::validate_key))
        .layer(middleware::from_fn_with_state(state, require_session))
}

async fn fallback_404() -> AppError {
    AppError::NotFound("route not found".into())
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.store.ping().await.map_err(|e| {
        tracing::error!("readiness check failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

/// Map a malformed JSON body to a VALIDATION_ERROR instead of axum's plain-text rejection.
pub(crate) fn invalid_body(rejection: JsonRejection) -> AppError {
    tracing::debug!("rejected request body: {}", rejection);
    AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
}
