use axum::{http::Method, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod bookings;
pub mod error;
pub mod search;
pub mod sessions;
pub mod state;

pub use state::{AppState, SessionRegistry};

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(sessions::SESSION_HEADER),
        ]);

    let mut router = Router::new()
        .merge(sessions::routes())
        .merge(auth::routes())
        .merge(search::routes())
        .merge(bookings::routes());
    if state.enable_admin {
        router = router.merge(admin::routes());
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
