pub mod models;
pub mod repository;
pub mod session;
pub mod search;
pub mod service;
pub mod booking;
pub mod payment;
pub mod cancellation;
pub mod memory;
pub mod reply;

pub use booking::{BookError, Booked};
pub use cancellation::{CancelError, Canceled};
pub use memory::MemoryFlightStore;
pub use models::{Flight, Itinerary, Reservation, UserAccount};
pub use payment::{Paid, PayError};
pub use repository::{FlightStore, RouteQuery, StoreTransaction};
pub use search::{SearchError, SearchQuery, SearchResults};
pub use service::{
    CreateCustomerError, CustomerCreated, FlightService, LoggedIn, LoginError, ReservationList,
    ReservationsError,
};
pub use session::{LoggedOut, LogoutError, Session};

/// Failures reported by the transactional store backing the service.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store aborted the unit because a concurrent unit touched the same rows.
    #[error("Transaction aborted by a concurrent update")]
    SerializationFailure,
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(err.into())
    }

    /// Whether re-invoking the whole operation may succeed. The core never does so itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::SerializationFailure)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse failure classes shared by every caller-facing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Not logged in, already logged in, or bad credentials.
    Auth,
    /// Index or id out of range, or not owned by the caller.
    Validation,
    /// Same-day conflict, sold-out flight, insufficient funds.
    BusinessRule,
    /// The store aborted or failed the unit; nothing was committed.
    TransientStore,
}

pub trait Classify {
    fn kind(&self) -> ErrorKind;
}
