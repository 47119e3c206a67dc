use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_tws::WebSocketUpgrade;
use serde_json::json;
use tracing::{error, info, warn};

use crate::{snapshot::SnapshotError, socket::handle_socket, state::AppState};

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("New WebSocket connection attempt");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn snapshot_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.snapshots.save().await {
        Ok(path) => (
            StatusCode::OK,
            Json(json!({ "path": path.display().to_string() })),
        ),
        Err(SnapshotError::InProgress) => {
            warn!("Rejected snapshot request, a save is already running");
            (
                StatusCode::CONFLICT,
                Json(json!({ "error": SnapshotError::InProgress.to_string() })),
            )
        }
        Err(e) => {
            error!("Requested snapshot failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "env": state.environment,
        "connections": state.connections(),
        "pendingUpdates": state.scheduler.pending_len(),
        "snapshotInProgress": state.snapshots.is_saving(),
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/admin/snapshot", post(snapshot_handler))
        .with_state(state)
        .fallback_service(axum_static::static_router("static"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;

    #[tokio::test]
    async fn snapshot_request_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = snapshot_handler(State(state.clone())).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.snapshots.path().exists());
    }

    #[tokio::test]
    async fn snapshot_request_during_save_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let running = state.snapshots.try_begin().unwrap();
        let response = snapshot_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(!state.snapshots.path().exists());

        drop(running);
        let response = snapshot_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn failed_snapshot_reports_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        // Occupy the target with a non-empty directory so the rename fails.
        std::fs::create_dir(state.snapshots.path()).unwrap();
        std::fs::write(state.snapshots.path().join("keep"), b"x").unwrap();

        let response = snapshot_handler(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
