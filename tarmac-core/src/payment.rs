use std::fmt;
use tracing::{info, warn};

use crate::repository::StoreTransaction;
use crate::service::{finish, FlightService};
use crate::session::Session;
use crate::{Classify, ErrorKind, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paid {
    pub reservation_id: i32,
    pub remaining_balance: i32,
}

impl fmt::Display for Paid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Paid reservation: {} remaining balance: {}",
            self.reservation_id, self.remaining_balance
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PayError {
    #[error("Cannot pay, not logged in")]
    NotLoggedIn,
    /// Missing, owned by someone else, or already paid. The three cases are
    /// deliberately reported alike.
    #[error("Cannot find unpaid reservation {reservation_id} under user: {username}")]
    NotFound { reservation_id: i32, username: String },
    #[error("User has only {balance} in account but itinerary costs {cost}")]
    InsufficientFunds { balance: i32, cost: i32 },
    #[error("Failed to pay for reservation {reservation_id}")]
    Store {
        reservation_id: i32,
        #[source]
        source: StoreError,
    },
}

impl Classify for PayError {
    fn kind(&self) -> ErrorKind {
        match self {
            PayError::NotLoggedIn => ErrorKind::Auth,
            PayError::NotFound { .. } => ErrorKind::Validation,
            PayError::InsufficientFunds { .. } => ErrorKind::BusinessRule,
            PayError::Store { .. } => ErrorKind::TransientStore,
        }
    }
}

async fn settle(tx: &mut dyn StoreTransaction, username: &str, rid: i32) -> Result<Paid, PayError> {
    let store_err = |source: StoreError| PayError::Store { reservation_id: rid, source };
    let not_found = || PayError::NotFound {
        reservation_id: rid,
        username: username.to_string(),
    };

    let reservation = tx
        .reservation(rid, username)
        .await
        .map_err(store_err)?
        .filter(|r| !r.paid)
        .ok_or_else(not_found)?;

    let balance = tx
        .balance(username)
        .await
        .map_err(store_err)?
        .ok_or_else(not_found)?;
    if balance < reservation.cost {
        return Err(PayError::InsufficientFunds {
            balance,
            cost: reservation.cost,
        });
    }

    if !tx.mark_paid(rid).await.map_err(store_err)? {
        return Err(not_found());
    }
    tx.adjust_balance(username, -reservation.cost).await.map_err(store_err)?;

    Ok(Paid {
        reservation_id: rid,
        remaining_balance: balance - reservation.cost,
    })
}

impl FlightService {
    /// Debit the reservation's cost and mark it paid, as one unit.
    pub async fn pay(&self, session: &Session, reservation_id: i32) -> Result<Paid, PayError> {
        let username = session.username().ok_or(PayError::NotLoggedIn)?;
        let store_err = |source: StoreError| PayError::Store { reservation_id, source };

        let mut tx = self.store.begin().await.map_err(store_err)?;
        let outcome = settle(tx.as_mut(), username, reservation_id).await;
        let paid = match finish(tx, outcome, store_err).await {
            Ok(paid) => paid,
            Err(err) => {
                if let PayError::Store { ref source, .. } = err {
                    warn!("Payment of {} by {} aborted: {}", reservation_id, username, source);
                }
                return Err(err);
            }
        };

        info!(
            "User {} paid reservation {}, balance now {}",
            username, reservation_id, paid.remaining_balance
        );
        Ok(paid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFlightStore;
    use crate::models::fixtures::flight;
    use crate::search::SearchQuery;
    use std::sync::Arc;

    async fn booked(balance: i32, price: i32) -> (FlightService, Arc<MemoryFlightStore>, Session) {
        let store = Arc::new(MemoryFlightStore::with_flights([flight(10, 3, "A", "B", 60, 5, price)]));
        let service = FlightService::new(store.clone());
        service.create_customer("alice", "pw", balance).await.unwrap();
        let mut session = Session::new();
        service.login(&mut session, "alice", "pw").await.unwrap();
        let q = SearchQuery {
            origin: "A".to_string(),
            destination: "B".to_string(),
            direct_only: true,
            day_of_month: 3,
            limit: 1,
        };
        service.search(&mut session, &q).await.unwrap();
        service.book(&session, 0).await.unwrap();
        (service, store, session)
    }

    #[tokio::test]
    async fn test_pay_debits_once() {
        let (service, store, session) = booked(500, 200).await;

        let paid = service.pay(&session, 1).await.unwrap();
        assert_eq!(paid.to_string(), "Paid reservation: 1 remaining balance: 300");
        assert_eq!(store.balance_of("alice"), Some(300));
        assert!(store.reservation(1).unwrap().paid);

        let again = service.pay(&session, 1).await.unwrap_err();
        assert_eq!(again.to_string(), "Cannot find unpaid reservation 1 under user: alice");
        assert_eq!(store.balance_of("alice"), Some(300));
    }

    #[tokio::test]
    async fn test_insufficient_funds_changes_nothing() {
        let (service, store, session) = booked(100, 200).await;
        let err = service.pay(&session, 1).await.unwrap_err();
        assert_eq!(err.to_string(), "User has only 100 in account but itinerary costs 200");
        assert_eq!(err.kind(), ErrorKind::BusinessRule);
        assert_eq!(store.balance_of("alice"), Some(100));
        assert!(!store.reservation(1).unwrap().paid);
    }

    #[tokio::test]
    async fn test_cannot_pay_someone_elses_reservation() {
        let (service, store, _alice) = booked(500, 200).await;
        service.create_customer("bob", "pw", 1000).await.unwrap();
        let mut bob = Session::new();
        service.login(&mut bob, "bob", "pw").await.unwrap();

        let err = service.pay(&bob, 1).await.unwrap_err();
        assert!(matches!(err, PayError::NotFound { reservation_id: 1, .. }));
        assert_eq!(store.balance_of("bob"), Some(1000));

        let err = service.pay(&Session::new(), 1).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot pay, not logged in");
    }
}
