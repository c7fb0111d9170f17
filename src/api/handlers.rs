//! HTTP request handlers

use super::types::{ErrorResponse, ShareQuery, ShareResponse, SharedTurn, ThreadListResponse};
use super::AppState;
use crate::replay::replay_thread;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;

const DEFAULT_SHARE_LIMIT: usize = 50;
const MAX_SHARE_LIMIT: usize = 500;

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/share/:session_id", get(share_thread))
        .route("/api/threads/:session_id", get(list_threads))
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Share
// ============================================================

async fn share_thread(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<ShareQuery>,
) -> Result<Json<ShareResponse>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_SHARE_LIMIT)
        .clamp(1, MAX_SHARE_LIMIT);

    let records = state
        .store
        .load_thread(&session_id, query.conversation_id, limit)
        .await
        .map_err(AppError::Internal)?;
    if records.is_empty() {
        return Err(AppError::NotFound(format!(
            "No records for session {session_id}"
        )));
    }

    let turns = replay_thread(&records).map_err(|e| {
        tracing::error!(session_id = %session_id, error = %e, "Replay failed");
        AppError::Internal(e.to_string())
    })?;
    tracing::info!(session_id = %session_id, turns = turns.len(), "Shared thread");

    Ok(Json(ShareResponse {
        session_id,
        conversation_id: query.conversation_id,
        readonly: true,
        shared_at: Utc::now(),
        turns: turns
            .iter()
            .map(|turn| SharedTurn::from_turn(turn, state.renderer.as_ref()))
            .collect(),
    }))
}

// ============================================================
// Threads
// ============================================================

async fn list_threads(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ThreadListResponse>, AppError> {
    let threads = state
        .store
        .list_threads(&session_id)
        .await
        .map_err(AppError::Internal)?;
    Ok(Json(ThreadListResponse {
        session_id,
        threads,
    }))
}

async fn get_version() -> impl IntoResponse {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
