use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tarmac_core::reply::render;
use tarmac_core::{Classify, ErrorKind, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing or unknown session")]
    UnknownSession,
    /// An operation failure; `message` is already newline-terminated.
    #[error("{message}")]
    Operation { kind: ErrorKind, message: String },
    #[error("Failed to clear tables")]
    Reset(#[source] StoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::UnknownSession => StatusCode::UNAUTHORIZED,
            ApiError::Operation { kind, .. } => match kind {
                ErrorKind::Auth => StatusCode::UNAUTHORIZED,
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::BusinessRule => StatusCode::CONFLICT,
                ErrorKind::TransientStore => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::Reset(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Reset(source) = &self {
            tracing::error!("Clearing tables failed: {}", source);
        }
        let body = match self {
            ApiError::Operation { message, .. } => message,
            other => format!("{}\n", other),
        };
        (status, body).into_response()
    }
}

/// Literal reply text on success, classified error otherwise.
pub fn respond<T: Display, E: Display + Classify>(outcome: Result<T, E>) -> Result<String, ApiError> {
    match outcome {
        Ok(_) => Ok(render(&outcome)),
        Err(ref err) => Err(ApiError::Operation {
            kind: err.kind(),
            message: render(&outcome),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarmac_core::{BookError, Booked};

    #[test]
    fn test_business_rule_maps_to_conflict() {
        let outcome: Result<Booked, BookError> = Err(BookError::SameDayConflict);
        let err = respond(outcome).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "You cannot book two flights in the same day\n");
    }

    #[test]
    fn test_success_is_newline_terminated() {
        let outcome: Result<Booked, BookError> = Ok(Booked { reservation_id: 3 });
        assert_eq!(respond(outcome).unwrap(), "Booked flight(s), reservation ID: 3\n");
    }
}
