use axum::{extract::State, http::StatusCode, routing::post, Router};
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/admin/clear", post(clear_tables))
}

/// Drops users, reservations, capacities and the reservation counter.
async fn clear_tables(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.service.clear_tables().await.map_err(ApiError::Reset)?;
    info!("Cleared all mutable tables");
    Ok(StatusCode::NO_CONTENT)
}
