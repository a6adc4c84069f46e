//! Request/response transport: `/api/documents/{id}`.
//!
//! | Method    | Body                              | Response                          |
//! |-----------|-----------------------------------|-----------------------------------|
//! | `GET`     |                                   | `200 {"data": <content>}`         |
//! | `PUT`     | `{"data", "delta"?, "sender"?}`   | `200 {"success": true}`           |
//! | `OPTIONS` |                                   | `204`                             |
//! | other     |                                   | `405`, `Allow: GET, PUT, OPTIONS` |
//!
//! Store failures map to `500 {"error": ...}`. A `PUT` carrying a delta also
//! relays it to the document's room, skipping `sender` when given, so
//! clients on this transport do not need a push connection to share edits.
//! Every response carries permissive CORS headers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::document::{ChangeUnit, Content};
use crate::protocol::{SessionId, SyncMessage, LOAD_FAILED, SAVE_FAILED};
use crate::relay::RoomRegistry;
use crate::server::ServerStats;
use crate::store::DocumentStore;

/// Value of the `Allow` header on 405 responses.
pub const ALLOWED_METHODS: &str = "GET, PUT, OPTIONS";

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    store: Arc<dyn DocumentStore>,
    rooms: Arc<RoomRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl ApiState {
    pub fn new(store: Arc<dyn DocumentStore>, rooms: Arc<RoomRegistry>) -> Self {
        Self::with_stats(store, rooms, Arc::new(RwLock::new(ServerStats::default())))
    }

    pub fn with_stats(
        store: Arc<dyn DocumentStore>,
        rooms: Arc<RoomRegistry>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Self {
        Self { store, rooms, stats }
    }
}

/// `GET` response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadResponse {
    pub data: Content,
}

/// `PUT` request body.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveRequest {
    #[serde(alias = "content")]
    pub data: Content,
    #[serde(default, alias = "changeUnit", skip_serializing_if = "Option::is_none")]
    pub delta: Option<ChangeUnit>,
    /// Push-transport session to exclude from the relay
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<SessionId>,
}

/// `PUT` response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct SaveResponse {
    pub success: bool,
}

/// Error body for 4xx/5xx responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Build the document API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/documents/{id}",
            get(load_document)
                .put(save_document)
                .options(options_document)
                .fallback(method_not_allowed),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn load_document(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.store.load_or_create(&id) {
        Ok(doc) => {
            log::debug!("HTTP load of document {id}");
            Json(LoadResponse { data: doc.content }).into_response()
        }
        Err(e) => {
            log::error!("Failed to load document {id}: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, LOAD_FAILED)
        }
    }
}

async fn save_document(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    body: Result<Json<SaveRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            log::warn!("Rejected save body for document {id}: {rejection}");
            return error_response(StatusCode::BAD_REQUEST, SAVE_FAILED);
        }
    };

    if let Err(e) = state.store.save(&id, &request.data) {
        log::error!("Failed to save document {id}: {e}");
        state.stats.write().await.failed_saves += 1;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, SAVE_FAILED);
    }
    state.stats.write().await.saves += 1;

    if let Some(delta) = request.delta {
        let sender = request.sender.unwrap_or_else(Uuid::nil);
        let msg = SyncMessage::receive_changes(sender, &id, 0, delta.to_bytes());
        match state.rooms.broadcast(&id, sender, &msg).await {
            Ok(delivery) => {
                state.stats.write().await.relayed_changes += 1;
                log::debug!(
                    "HTTP save of {id} relayed to {} peer(s) ({} dropped)",
                    delivery.delivered,
                    delivery.dropped
                );
            }
            Err(e) => log::warn!("Failed to relay change for document {id}: {e}"),
        }
    }

    Json(SaveResponse { success: true }).into_response()
}

async fn options_document() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, ALLOWED_METHODS)],
    )
        .into_response()
}
