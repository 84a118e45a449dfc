use std::fmt;
use tracing::{debug, info, warn};

use crate::models::{Itinerary, Reservation};
use crate::repository::StoreTransaction;
use crate::service::{finish, FlightService};
use crate::session::Session;
use crate::{Classify, ErrorKind, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booked {
    pub reservation_id: i32,
}

impl fmt::Display for Booked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Booked flight(s), reservation ID: {}", self.reservation_id)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BookError {
    #[error("Cannot book reservations, not logged in")]
    NotLoggedIn,
    #[error("No such itinerary {0}")]
    NoSuchItinerary(i32),
    #[error("You cannot book two flights in the same day")]
    SameDayConflict,
    /// A leg has no seats left, or its flight row is gone.
    #[error("Booking failed")]
    SoldOut { fid: i32 },
    /// The leg prices add up to more than a reservation can record.
    #[error("Booking failed")]
    CostOverflow,
    #[error("Booking failed")]
    Store(#[source] StoreError),
}

impl Classify for BookError {
    fn kind(&self) -> ErrorKind {
        match self {
            BookError::NotLoggedIn => ErrorKind::Auth,
            BookError::NoSuchItinerary(_) => ErrorKind::Validation,
            BookError::SameDayConflict | BookError::SoldOut { .. } | BookError::CostOverflow => {
                ErrorKind::BusinessRule
            }
            BookError::Store(_) => ErrorKind::TransientStore,
        }
    }
}

impl From<StoreError> for BookError {
    fn from(err: StoreError) -> Self {
        BookError::Store(err)
    }
}

/// Remaining seats on `fid`, creating its capacity row from the base capacity on first touch.
pub(crate) async fn seats_left(tx: &mut dyn StoreTransaction, fid: i32) -> Result<i32, StoreError> {
    tx.materialize_capacity(fid).await?;
    Ok(tx.capacity(fid).await?.unwrap_or(0))
}

/// Every step of one booking attempt. Runs inside a single open unit; the caller
/// commits or rolls back.
async fn reserve(
    tx: &mut dyn StoreTransaction,
    username: &str,
    itinerary: &Itinerary,
) -> Result<i32, BookError> {
    let cost = itinerary.cost().ok_or(BookError::CostOverflow)?;
    let day = itinerary.day_of_month();
    let existing = tx.reservations_for(username).await?;
    if existing.iter().any(|r| r.day_of_month == day) {
        return Err(BookError::SameDayConflict);
    }

    for leg in itinerary.legs() {
        let seats = seats_left(tx, leg.fid).await?;
        debug!("Flight {} has {} seats left", leg.fid, seats);
        if seats <= 0 {
            return Err(BookError::SoldOut { fid: leg.fid });
        }
    }

    for leg in itinerary.legs() {
        if !tx.adjust_capacity(leg.fid, -1).await? {
            return Err(BookError::SoldOut { fid: leg.fid });
        }
    }

    let rid = tx.next_reservation_id().await?;
    let reservation = Reservation {
        rid,
        fid1: itinerary.first_leg().fid,
        fid2: itinerary.second_leg().map(|f| f.fid),
        username: username.to_string(),
        paid: false,
        cost,
        day_of_month: day,
    };
    tx.insert_reservation(&reservation).await?;
    Ok(rid)
}

impl FlightService {
    /// Book the itinerary at `itinerary_id` from the session's latest search.
    ///
    /// At most one attempt per call. Any failure after the unit has begun rolls back
    /// every capacity decrement, the counter advance and the reservation insert.
    pub async fn book(&self, session: &Session, itinerary_id: i32) -> Result<Booked, BookError> {
        let username = session.username().ok_or(BookError::NotLoggedIn)?;
        let itinerary = session
            .itinerary(itinerary_id)
            .ok_or(BookError::NoSuchItinerary(itinerary_id))?;

        let mut tx = self.store.begin().await?;
        let outcome = reserve(tx.as_mut(), username, itinerary).await;
        let reservation_id = match finish(tx, outcome, BookError::Store).await {
            Ok(rid) => rid,
            Err(err) => {
                if let BookError::Store(ref cause) = err {
                    warn!("Booking by {} aborted: {}", username, cause);
                }
                return Err(err);
            }
        };

        info!(
            "User {} booked reservation {} ({} leg(s), day {})",
            username,
            reservation_id,
            itinerary.leg_count(),
            itinerary.day_of_month()
        );
        Ok(Booked { reservation_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFlightStore;
    use crate::models::fixtures::flight;
    use crate::search::SearchQuery;
    use std::sync::Arc;

    async fn logged_in(service: &FlightService, user: &str, balance: i32) -> Session {
        service.create_customer(user, "pw", balance).await.unwrap();
        let mut session = Session::new();
        service.login(&mut session, user, "pw").await.unwrap();
        session
    }

    fn query(origin: &str, dest: &str, day: i32, direct_only: bool) -> SearchQuery {
        SearchQuery {
            origin: origin.to_string(),
            destination: dest.to_string(),
            direct_only,
            day_of_month: day,
            limit: 10,
        }
    }

    #[tokio::test]
    async fn test_preconditions_short_circuit() {
        let store = Arc::new(MemoryFlightStore::with_flights([flight(10, 3, "A", "B", 60, 1, 200)]));
        let service = FlightService::new(store.clone());

        let anonymous = Session::new();
        let err = service.book(&anonymous, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot book reservations, not logged in");

        let session = logged_in(&service, "alice", 500).await;
        let err = service.book(&session, 0).await.unwrap_err();
        assert_eq!(err.to_string(), "No such itinerary 0");
        let err = service.book(&session, -3).await.unwrap_err();
        assert_eq!(err.to_string(), "No such itinerary -3");
        assert_eq!(store.capacity_of(10), None);
    }

    #[tokio::test]
    async fn test_book_direct_decrements_capacity() {
        let store = Arc::new(MemoryFlightStore::with_flights([flight(10, 3, "A", "B", 60, 2, 200)]));
        let service = FlightService::new(store.clone());
        let mut session = logged_in(&service, "alice", 500).await;

        service.search(&mut session, &query("A", "B", 3, true)).await.unwrap();
        let booked = service.book(&session, 0).await.unwrap();
        assert_eq!(booked.to_string(), "Booked flight(s), reservation ID: 1");
        assert_eq!(store.capacity_of(10), Some(1));

        let reservation = store.reservation(1).unwrap();
        assert!(!reservation.paid);
        assert_eq!(reservation.cost, 200);
        assert_eq!(reservation.fid2, None);
    }

    #[tokio::test]
    async fn test_same_day_conflict_rolls_back() {
        let store = Arc::new(MemoryFlightStore::with_flights([
            flight(10, 3, "A", "B", 60, 5, 200),
            flight(11, 3, "B", "A", 60, 5, 200),
        ]));
        let service = FlightService::new(store.clone());
        let mut session = logged_in(&service, "alice", 500).await;

        service.search(&mut session, &query("A", "B", 3, true)).await.unwrap();
        service.book(&session, 0).await.unwrap();

        service.search(&mut session, &query("B", "A", 3, true)).await.unwrap();
        let err = service.book(&session, 0).await.unwrap_err();
        assert!(matches!(err, BookError::SameDayConflict));
        assert_eq!(err.to_string(), "You cannot book two flights in the same day");
        assert_eq!(store.capacity_of(11), None);
        assert_eq!(store.counter(), Some(1));
    }

    #[tokio::test]
    async fn test_one_stop_sold_out_leg_consumes_nothing() {
        let store = Arc::new(MemoryFlightStore::with_flights([
            flight(1, 4, "A", "C", 60, 3, 100),
            flight(2, 4, "C", "B", 60, 0, 100),
        ]));
        let service = FlightService::new(store.clone());
        let mut session = logged_in(&service, "alice", 500).await;

        service.search(&mut session, &query("A", "B", 4, false)).await.unwrap();
        let err = service.book(&session, 0).await.unwrap_err();
        assert!(matches!(err, BookError::SoldOut { fid: 2 }));
        assert_eq!(err.to_string(), "Booking failed");
        assert_eq!(store.capacity_of(1), None);
        assert_eq!(store.counter(), None);
    }

    #[tokio::test]
    async fn test_one_stop_books_both_legs() {
        let store = Arc::new(MemoryFlightStore::with_flights([
            flight(1, 4, "A", "C", 60, 3, 100),
            flight(2, 4, "C", "B", 70, 2, 150),
        ]));
        let service = FlightService::new(store.clone());
        let mut session = logged_in(&service, "alice", 500).await;

        service.search(&mut session, &query("A", "B", 4, false)).await.unwrap();
        let booked = service.book(&session, 0).await.unwrap();
        assert_eq!(store.capacity_of(1), Some(2));
        assert_eq!(store.capacity_of(2), Some(1));
        let reservation = store.reservation(booked.reservation_id).unwrap();
        assert_eq!(reservation.fid2, Some(2));
        assert_eq!(reservation.cost, 250);
        assert_eq!(reservation.day_of_month, 4);
    }

    #[tokio::test]
    async fn test_cost_overflow_is_refused_before_any_write() {
        let store = Arc::new(MemoryFlightStore::with_flights([
            flight(1, 4, "A", "C", 60, 3, i32::MAX),
            flight(2, 4, "C", "B", 70, 2, 1),
        ]));
        let service = FlightService::new(store.clone());
        let mut session = logged_in(&service, "alice", 500).await;

        service.search(&mut session, &query("A", "B", 4, false)).await.unwrap();
        let err = service.book(&session, 0).await.unwrap_err();
        assert!(matches!(err, BookError::CostOverflow));
        assert_eq!(err.to_string(), "Booking failed");
        assert_eq!(store.capacity_of(1), None);
        assert_eq!(store.counter(), None);
    }
}
