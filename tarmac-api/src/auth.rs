use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::{respond, ApiError};
use crate::sessions::ClientSession;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct NewCustomer {
    pub username: String,
    pub password: String,
    pub balance: i32,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/login", post(login))
        .route("/v1/logout", post(logout))
        .route("/v1/customers", post(create_customer))
}

async fn login(
    State(state): State<AppState>,
    session: ClientSession,
    Json(req): Json<Credentials>,
) -> Result<String, ApiError> {
    let mut session = session.handle.lock().await;
    respond(state.service.login(&mut session, &req.username, &req.password).await)
}

async fn logout(State(state): State<AppState>, session: ClientSession) -> Result<String, ApiError> {
    let mut session = session.handle.lock().await;
    respond(state.service.logout(&mut session))
}

/// Does not need a session.
async fn create_customer(
    State(state): State<AppState>,
    Json(req): Json<NewCustomer>,
) -> Result<String, ApiError> {
    respond(
        state
            .service
            .create_customer(&req.username, &req.password, req.balance)
            .await,
    )
}
