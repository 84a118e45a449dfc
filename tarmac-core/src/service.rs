use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::models::{Flight, Reservation, UserAccount};
use crate::repository::{FlightStore, StoreTransaction};
use crate::session::{LoggedOut, LogoutError, Session};
use crate::{Classify, ErrorKind, StoreError, StoreResult};

/// Drives login, search, booking, payment, cancellation and listing against a
/// shared transactional store. Holds no shared mutable state of its own.
#[derive(Clone)]
pub struct FlightService {
    pub(crate) store: Arc<dyn FlightStore>,
}

/// Commit on success, roll back on failure.
///
/// A failed commit is reported through `on_store`; a failed rollback is logged and
/// the original error is returned.
pub(crate) async fn finish<T, E>(
    tx: Box<dyn StoreTransaction>,
    outcome: Result<T, E>,
    on_store: impl FnOnce(StoreError) -> E,
) -> Result<T, E> {
    match outcome {
        Ok(value) => match tx.commit().await {
            Ok(()) => Ok(value),
            Err(err) => {
                warn!("Commit failed: {}", err);
                Err(on_store(err))
            }
        },
        Err(err) => {
            if let Err(rb) = tx.rollback().await {
                warn!("Rollback failed: {}", rb);
            }
            Err(err)
        }
    }
}

impl FlightService {
    pub fn new(store: Arc<dyn FlightStore>) -> Self {
        Self { store }
    }

    pub async fn login(
        &self,
        session: &mut Session,
        username: &str,
        password: &str,
    ) -> Result<LoggedIn, LoginError> {
        if session.is_authenticated() {
            return Err(LoginError::AlreadyLoggedIn);
        }

        let mut tx = self.store.begin().await.map_err(LoginError::Store)?;
        let outcome = match tx.find_user(username).await {
            Ok(Some(user)) if user.password == password => Ok(()),
            Ok(_) => Err(LoginError::BadCredentials),
            Err(err) => Err(LoginError::Store(err)),
        };
        finish(tx, outcome, LoginError::Store).await?;

        session.authenticate(username);
        info!("User {} logged in", username);
        Ok(LoggedIn {
            username: username.to_string(),
        })
    }

    pub fn logout(&self, session: &mut Session) -> Result<LoggedOut, LogoutError> {
        let out = session.logout()?;
        info!("User {} logged out", out.username);
        Ok(out)
    }

    pub async fn create_customer(
        &self,
        username: &str,
        password: &str,
        initial_balance: i32,
    ) -> Result<CustomerCreated, CreateCustomerError> {
        if initial_balance < 0 {
            return Err(CreateCustomerError::NegativeBalance);
        }

        let user = UserAccount {
            username: username.to_string(),
            password: password.to_string(),
            balance: initial_balance,
        };

        let mut tx = self.store.begin().await.map_err(CreateCustomerError::Store)?;
        let outcome = match tx.insert_user(&user).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CreateCustomerError::UsernameTaken),
            Err(err) => Err(CreateCustomerError::Store(err)),
        };
        finish(tx, outcome, CreateCustomerError::Store).await?;

        info!("Created user {} with balance {}", username, initial_balance);
        Ok(CustomerCreated {
            username: username.to_string(),
        })
    }

    /// List the caller's reservations with their legs, in one read unit.
    pub async fn reservations(&self, session: &Session) -> Result<ReservationList, ReservationsError> {
        let username = session.username().ok_or(ReservationsError::NotLoggedIn)?;

        let mut tx = self.store.begin().await.map_err(ReservationsError::Store)?;
        let outcome = load_reservations(tx.as_mut(), username).await;
        let entries = finish(tx, outcome, ReservationsError::Store).await?;

        if entries.is_empty() {
            return Err(ReservationsError::NoneFound);
        }
        Ok(ReservationList { entries })
    }

    /// Reset every mutable table so the next reservation id is 1 again.
    pub async fn clear_tables(&self) -> StoreResult<()> {
        let mut tx = self.store.begin().await?;
        let outcome = tx.clear().await;
        finish(tx, outcome, |e| e).await?;
        info!("Cleared users, reservations, capacities and the reservation counter");
        Ok(())
    }
}

async fn load_reservations(
    tx: &mut dyn StoreTransaction,
    username: &str,
) -> Result<Vec<(Reservation, Vec<Flight>)>, ReservationsError> {
    let reservations = tx.reservations_for(username).await.map_err(ReservationsError::Store)?;
    let mut entries = Vec::with_capacity(reservations.len());
    for reservation in reservations {
        let mut legs = Vec::with_capacity(2);
        for fid in reservation.flight_ids() {
            let flight = tx
                .flight(fid)
                .await
                .map_err(ReservationsError::Store)?
                .ok_or(ReservationsError::MissingFlight(fid))?;
            legs.push(flight);
        }
        entries.push((reservation, legs));
    }
    Ok(entries)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedIn {
    pub username: String,
}

impl fmt::Display for LoggedIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Logged in as {}", self.username)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("User already logged in")]
    AlreadyLoggedIn,
    #[error("Login failed")]
    BadCredentials,
    #[error("Login failed")]
    Store(#[source] StoreError),
}

impl Classify for LoginError {
    fn kind(&self) -> ErrorKind {
        match self {
            LoginError::AlreadyLoggedIn | LoginError::BadCredentials => ErrorKind::Auth,
            LoginError::Store(_) => ErrorKind::TransientStore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerCreated {
    pub username: String,
}

impl fmt::Display for CustomerCreated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Created user {}", self.username)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CreateCustomerError {
    #[error("Failed to create user")]
    NegativeBalance,
    #[error("Failed to create user")]
    UsernameTaken,
    #[error("Failed to create user")]
    Store(#[source] StoreError),
}

impl Classify for CreateCustomerError {
    fn kind(&self) -> ErrorKind {
        match self {
            CreateCustomerError::NegativeBalance | CreateCustomerError::UsernameTaken => ErrorKind::Validation,
            CreateCustomerError::Store(_) => ErrorKind::TransientStore,
        }
    }
}

/// The caller's reservations, each with its leg(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationList {
    pub entries: Vec<(Reservation, Vec<Flight>)>,
}

impl fmt::Display for ReservationList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (reservation, legs)) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "Reservation {} paid: {}:", reservation.rid, reservation.paid)?;
            for leg in legs {
                write!(f, "\n{}", leg)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReservationsError {
    #[error("Cannot view reservations, not logged in")]
    NotLoggedIn,
    #[error("No reservations found")]
    NoneFound,
    #[error("Failed to retrieve reservations")]
    MissingFlight(i32),
    #[error("Failed to retrieve reservations")]
    Store(#[source] StoreError),
}

impl Classify for ReservationsError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReservationsError::NotLoggedIn => ErrorKind::Auth,
            ReservationsError::NoneFound => ErrorKind::Validation,
            ReservationsError::MissingFlight(_) | ReservationsError::Store(_) => ErrorKind::TransientStore,
        }
    }
}
