//! Combat session API - the shared session store over HTTP
//!
//! One document per campaign. Writers PATCH partial documents; every
//! successful write or delete is pushed to all WebSocket watchers of that
//! campaign, the writer included.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::combat::{CombatSessionState, SessionPatch};
use crate::sync::{SessionChange, SessionStore, SyncError};

/// Build the combat session router
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/campaigns/{id}/combat",
            get(get_session).patch(patch_session).delete(delete_session),
        )
        .route("/campaigns/{id}/combat/ws", get(watch_session))
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Errors returned by the combat endpoints
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no combat session for campaign {0}")]
    NotFound(String),

    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Sync(e) => {
                error!("Session store error: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// GET /campaigns/{id}/combat
async fn get_session(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<Json<CombatSessionState>, ApiError> {
    state
        .store
        .load(&campaign_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(campaign_id))
}

/// PATCH /campaigns/{id}/combat - merge present fields, return the result
async fn patch_session(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
    Json(patch): Json<SessionPatch>,
) -> Result<Json<CombatSessionState>, ApiError> {
    let merged = state.store.save(&campaign_id, &patch).await?;
    Ok(Json(merged))
}

/// DELETE /campaigns/{id}/combat
async fn delete_session(
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.clear(&campaign_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /campaigns/{id}/combat/ws - push every change to the client
async fn watch_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(campaign_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // Subscribe before the upgrade so writes right after connect are seen
    let changes = state.store.subscribe(&campaign_id).await?;
    Ok(ws.on_upgrade(move |socket| forward_changes(socket, campaign_id, changes)))
}

/// Relay a campaign's changes to one WebSocket until either side goes away
async fn forward_changes(
    mut socket: WebSocket,
    campaign_id: String,
    mut changes: broadcast::Receiver<SessionChange>,
) {
    info!("Watcher connected to campaign {}", campaign_id);

    loop {
        tokio::select! {
            change = changes.recv() => {
                match change {
                    Ok(change) => {
                        let json = match serde_json::to_string(&change) {
                            Ok(json) => json,
                            Err(e) => {
                                warn!("Failed to encode change for campaign {}: {}", campaign_id, e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Watcher of campaign {} skipped {} changes", campaign_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
        }
    }

    info!("Watcher disconnected from campaign {}", campaign_id);
}
