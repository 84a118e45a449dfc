use async_trait::async_trait;

use crate::models::{Flight, Reservation, UserAccount};
use crate::StoreResult;

/// Route filter handed to the store's flight queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuery {
    pub origin: String,
    pub destination: String,
    pub day_of_month: i32,
    pub limit: i64,
}

/// Entry point to the shared relational store.
#[async_trait]
pub trait FlightStore: Send + Sync {
    /// Open one serializable unit. Everything done through the returned handle
    /// becomes visible to other sessions only on `commit`.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>>;
}

/// One open unit against the store. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTransaction: Send {
    async fn find_user(&mut self, username: &str) -> StoreResult<Option<UserAccount>>;

    /// Insert the user unless the username is taken. Returns whether a row was created.
    async fn insert_user(&mut self, user: &UserAccount) -> StoreResult<bool>;

    async fn balance(&mut self, username: &str) -> StoreResult<Option<i32>>;

    /// Relative update: `balance = balance + delta`. Fails when the user row is gone.
    async fn adjust_balance(&mut self, username: &str, delta: i32) -> StoreResult<()>;

    /// Non-canceled direct flights, ordered by duration then fid, at most `limit` rows.
    async fn direct_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<Flight>>;

    /// Non-canceled same-day connections, ordered by total duration then first-leg fid.
    async fn one_stop_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<(Flight, Flight)>>;

    async fn flight(&mut self, fid: i32) -> StoreResult<Option<Flight>>;

    /// Seed the capacity row from the flight's base capacity if it does not exist yet.
    async fn materialize_capacity(&mut self, fid: i32) -> StoreResult<()>;

    async fn capacity(&mut self, fid: i32) -> StoreResult<Option<i32>>;

    /// Relative update: `capacity = capacity + delta`, refused when the result would be
    /// negative. Returns whether the row changed.
    async fn adjust_capacity(&mut self, fid: i32, delta: i32) -> StoreResult<bool>;

    /// Advance the global reservation counter and return the new value.
    async fn next_reservation_id(&mut self) -> StoreResult<i32>;

    /// Fails when the owning user row does not exist.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()>;

    /// Reservations owned by `username`, ordered by id.
    async fn reservations_for(&mut self, username: &str) -> StoreResult<Vec<Reservation>>;

    /// The reservation `rid` if it is owned by `username`.
    async fn reservation(&mut self, rid: i32, username: &str) -> StoreResult<Option<Reservation>>;

    /// Flip the paid flag if the reservation is currently unpaid. Returns whether it flipped.
    async fn mark_paid(&mut self, rid: i32) -> StoreResult<bool>;

    async fn delete_reservation(&mut self, rid: i32) -> StoreResult<()>;

    /// Remove reservations, users, capacity rows and the counter. Flights stay.
    async fn clear(&mut self) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
