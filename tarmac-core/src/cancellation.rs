use std::fmt;
use tracing::{info, warn};

use crate::repository::StoreTransaction;
use crate::service::{finish, FlightService};
use crate::session::Session;
use crate::{Classify, ErrorKind, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canceled {
    pub reservation_id: i32,
    /// Amount credited back to the user; zero for an unpaid reservation.
    pub refunded: i32,
}

impl fmt::Display for Canceled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Canceled reservation {}", self.reservation_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("Cannot cancel reservations, not logged in")]
    NotLoggedIn,
    #[error("Failed to cancel reservation {0}")]
    NotFound(i32),
    #[error("Failed to cancel reservation {reservation_id}")]
    Store {
        reservation_id: i32,
        #[source]
        source: StoreError,
    },
}

impl Classify for CancelError {
    fn kind(&self) -> ErrorKind {
        match self {
            CancelError::NotLoggedIn => ErrorKind::Auth,
            CancelError::NotFound(_) => ErrorKind::Validation,
            CancelError::Store { .. } => ErrorKind::TransientStore,
        }
    }
}

async fn release(tx: &mut dyn StoreTransaction, username: &str, rid: i32) -> Result<Canceled, CancelError> {
    let store_err = |source: StoreError| CancelError::Store { reservation_id: rid, source };

    let reservation = tx
        .reservation(rid, username)
        .await
        .map_err(store_err)?
        .ok_or(CancelError::NotFound(rid))?;

    for fid in reservation.flight_ids() {
        if !tx.adjust_capacity(fid, 1).await.map_err(store_err)? {
            return Err(store_err(StoreError::backend(format!(
                "no capacity row for flight {}",
                fid
            ))));
        }
    }

    let refunded = if reservation.paid { reservation.cost } else { 0 };
    if refunded > 0 {
        tx.adjust_balance(username, refunded).await.map_err(store_err)?;
    }

    tx.delete_reservation(rid).await.map_err(store_err)?;
    Ok(Canceled {
        reservation_id: rid,
        refunded,
    })
}

impl FlightService {
    /// Give the seats back, refund a paid reservation and delete it, as one unit.
    /// The id stays retired.
    pub async fn cancel(&self, session: &Session, reservation_id: i32) -> Result<Canceled, CancelError> {
        let username = session.username().ok_or(CancelError::NotLoggedIn)?;
        let store_err = |source: StoreError| CancelError::Store { reservation_id, source };

        let mut tx = self.store.begin().await.map_err(store_err)?;
        let outcome = release(tx.as_mut(), username, reservation_id).await;
        let canceled = match finish(tx, outcome, store_err).await {
            Ok(canceled) => canceled,
            Err(err) => {
                if let CancelError::Store { ref source, .. } = err {
                    warn!("Cancel of {} by {} aborted: {}", reservation_id, username, source);
                }
                return Err(err);
            }
        };

        info!(
            "User {} canceled reservation {} (refund {})",
            username, reservation_id, canceled.refunded
        );
        Ok(canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFlightStore;
    use crate::models::fixtures::flight;
    use crate::search::SearchQuery;
    use std::sync::Arc;

    async fn setup() -> (FlightService, Arc<MemoryFlightStore>, Session) {
        let store = Arc::new(MemoryFlightStore::with_flights([
            flight(1, 7, "A", "C", 60, 4, 120),
            flight(2, 7, "C", "B", 60, 4, 80),
        ]));
        let service = FlightService::new(store.clone());
        service.create_customer("alice", "pw", 1000).await.unwrap();
        let mut session = Session::new();
        service.login(&mut session, "alice", "pw").await.unwrap();
        let q = SearchQuery {
            origin: "A".to_string(),
            destination: "B".to_string(),
            direct_only: false,
            day_of_month: 7,
            limit: 5,
        };
        service.search(&mut session, &q).await.unwrap();
        service.book(&session, 0).await.unwrap();
        (service, store, session)
    }

    #[tokio::test]
    async fn test_cancel_unpaid_restores_both_legs() {
        let (service, store, session) = setup().await;
        assert_eq!(store.capacity_of(1), Some(3));
        assert_eq!(store.capacity_of(2), Some(3));

        let canceled = service.cancel(&session, 1).await.unwrap();
        assert_eq!(canceled.to_string(), "Canceled reservation 1");
        assert_eq!(canceled.refunded, 0);
        assert_eq!(store.capacity_of(1), Some(4));
        assert_eq!(store.capacity_of(2), Some(4));
        assert_eq!(store.balance_of("alice"), Some(1000));
        assert!(store.reservation(1).is_none());
    }

    #[tokio::test]
    async fn test_cancel_paid_refunds_and_second_cancel_fails() {
        let (service, store, session) = setup().await;
        service.pay(&session, 1).await.unwrap();
        assert_eq!(store.balance_of("alice"), Some(800));

        let canceled = service.cancel(&session, 1).await.unwrap();
        assert_eq!(canceled.refunded, 200);
        assert_eq!(store.balance_of("alice"), Some(1000));

        let err = service.cancel(&session, 1).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to cancel reservation 1");
        assert_eq!(store.balance_of("alice"), Some(1000));
        assert_eq!(store.capacity_of(1), Some(4));
    }

    #[tokio::test]
    async fn test_cancel_requires_login() {
        let (service, _, _) = setup().await;
        let err = service.cancel(&Session::new(), 1).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot cancel reservations, not logged in");
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[tokio::test]
    async fn test_cancel_without_capacity_row_rolls_back() {
        use crate::models::{Reservation, UserAccount};
        use crate::repository::FlightStore;

        let store = Arc::new(MemoryFlightStore::with_flights([flight(10, 2, "A", "B", 60, 3, 90)]));
        let mut tx = store.begin().await.unwrap();
        let alice = UserAccount {
            username: "alice".to_string(),
            password: "pw".to_string(),
            balance: 100,
        };
        assert!(tx.insert_user(&alice).await.unwrap());
        let orphan = Reservation {
            rid: 1,
            fid1: 10,
            fid2: None,
            username: "alice".to_string(),
            paid: true,
            cost: 90,
            day_of_month: 2,
        };
        tx.insert_reservation(&orphan).await.unwrap();
        tx.commit().await.unwrap();

        let service = FlightService::new(store.clone());
        let mut session = Session::new();
        service.login(&mut session, "alice", "pw").await.unwrap();
        let err = service.cancel(&session, 1).await.unwrap_err();
        assert!(matches!(err, CancelError::Store { reservation_id: 1, .. }));
        assert_eq!(err.to_string(), "Failed to cancel reservation 1");
        assert_eq!(store.balance_of("alice"), Some(100));
        assert!(store.reservation(1).is_some());
    }
}
