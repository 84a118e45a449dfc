use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::{respond, ApiError};
use crate::sessions::ClientSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BookRequest {
    pub itinerary: i32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(book))
        .route("/v1/reservations", get(list_reservations))
        .route("/v1/reservations/{id}/pay", post(pay))
        .route("/v1/reservations/{id}/cancel", post(cancel))
}

async fn book(
    State(state): State<AppState>,
    session: ClientSession,
    Json(req): Json<BookRequest>,
) -> Result<String, ApiError> {
    let session = session.handle.lock().await;
    respond(state.service.book(&session, req.itinerary).await)
}

async fn pay(
    State(state): State<AppState>,
    session: ClientSession,
    Path(reservation_id): Path<i32>,
) -> Result<String, ApiError> {
    let session = session.handle.lock().await;
    respond(state.service.pay(&session, reservation_id).await)
}

async fn list_reservations(State(state): State<AppState>, session: ClientSession) -> Result<String, ApiError> {
    let session = session.handle.lock().await;
    respond(state.service.reservations(&session).await)
}

async fn cancel(
    State(state): State<AppState>,
    session: ClientSession,
    Path(reservation_id): Path<i32>,
) -> Result<String, ApiError> {
    let session = session.handle.lock().await;
    respond(state.service.cancel(&session, reservation_id).await)
}
