use axum::{extract::State, routing::post, Json, Router};
use tarmac_core::SearchQuery;

use crate::error::{respond, ApiError};
use crate::sessions::ClientSession;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/search", post(search_flights))
}

/// Replaces the session's itinerary list with the new results.
async fn search_flights(
    State(state): State<AppState>,
    session: ClientSession,
    Json(query): Json<SearchQuery>,
) -> Result<String, ApiError> {
    let mut session = session.handle.lock().await;
    respond(state.service.search(&mut session, &query).await)
}
