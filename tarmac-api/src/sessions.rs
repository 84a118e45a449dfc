use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tarmac_core::Session;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
}

/// The caller's session, resolved from the `x-session-id` header.
pub struct ClientSession {
    pub id: Uuid,
    pub handle: Arc<Mutex<Session>>,
}

impl FromRequestParts<AppState> for ClientSession {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok())
            .ok_or(ApiError::UnknownSession)?;

        let handle = state.sessions.get(&id).await.ok_or(ApiError::UnknownSession)?;
        Ok(ClientSession { id, handle })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/sessions", post(open_session).delete(close_session))
}

async fn open_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.sessions.open().await;
    debug!("Opened session {}", session_id);
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn close_session(State(state): State<AppState>, session: ClientSession) -> StatusCode {
    // Wait for any in-flight operation on this session to finish.
    let _guard = session.handle.lock().await;
    state.sessions.close(&session.id).await;
    info!("Closed session {}", session.id);
    StatusCode::NO_CONTENT
}
