//! Process-local store with snapshot reads and optimistic commit validation.
//!
//! Each unit works on a private copy of the tables taken at `begin`. At commit the
//! unit is aborted with [`StoreError::SerializationFailure`] if any row it read or
//! wrote was changed by a unit that committed after it began; otherwise its dirty
//! rows are published atomically. Read-only units always commit.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::models::{Flight, Reservation, UserAccount};
use crate::repository::{FlightStore, RouteQuery, StoreTransaction};
use crate::{StoreError, StoreResult};

/// Unit of conflict detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    User(String),
    /// The set of reservations owned by one user; guards same-day checks.
    UserReservations(String),
    Reservation(i32),
    Capacity(i32),
    Counter,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    flights: Arc<BTreeMap<i32, Flight>>,
    users: HashMap<String, UserAccount>,
    capacities: HashMap<i32, i32>,
    counter: Option<i32>,
    reservations: BTreeMap<i32, Reservation>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: Tables,
    versions: HashMap<Key, u64>,
    seq: u64,
    cleared_at: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default)]
pub struct MemoryFlightStore {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryFlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flights(flights: impl IntoIterator<Item = Flight>) -> Self {
        let store = Self::new();
        for flight in flights {
            store.insert_flight(flight);
        }
        store
    }

    /// Provision a flight row. Flights are reference data and never conflict.
    pub fn insert_flight(&self, flight: Flight) {
        let mut shared = lock(&self.shared);
        Arc::make_mut(&mut shared.tables.flights).insert(flight.fid, flight);
    }

    /// Committed remaining seats, `None` until a booking first touches the flight.
    pub fn capacity_of(&self, fid: i32) -> Option<i32> {
        lock(&self.shared).tables.capacities.get(&fid).copied()
    }

    pub fn balance_of(&self, username: &str) -> Option<i32> {
        lock(&self.shared).tables.users.get(username).map(|u| u.balance)
    }

    pub fn reservation(&self, rid: i32) -> Option<Reservation> {
        lock(&self.shared).tables.reservations.get(&rid).cloned()
    }

    pub fn reservation_ids(&self) -> Vec<i32> {
        lock(&self.shared).tables.reservations.keys().copied().collect()
    }

    pub fn counter(&self) -> Option<i32> {
        lock(&self.shared).tables.counter
    }
}

#[async_trait]
impl FlightStore for MemoryFlightStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let (local, start_seq) = {
            let shared = lock(&self.shared);
            (shared.tables.clone(), shared.seq)
        };
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            local,
            start_seq,
            read: HashSet::new(),
            written: HashSet::new(),
            cleared: false,
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<Shared>>,
    local: Tables,
    start_seq: u64,
    read: HashSet<Key>,
    written: HashSet<Key>,
    cleared: bool,
}

impl MemoryTransaction {
    fn touch(&mut self, key: Key) {
        self.read.insert(key);
    }

    fn dirty(&mut self, key: Key) {
        self.written.insert(key);
    }
}

fn take_limit<T>(mut rows: Vec<T>, limit: i64) -> Vec<T> {
    rows.truncate(usize::try_from(limit).unwrap_or(0));
    rows
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_user(&mut self, username: &str) -> StoreResult<Option<UserAccount>> {
        self.touch(Key::User(username.to_string()));
        Ok(self.local.users.get(username).cloned())
    }

    async fn insert_user(&mut self, user: &UserAccount) -> StoreResult<bool> {
        self.touch(Key::User(user.username.clone()));
        if self.local.users.contains_key(&user.username) {
            return Ok(false);
        }
        self.local.users.insert(user.username.clone(), user.clone());
        self.dirty(Key::User(user.username.clone()));
        Ok(true)
    }

    async fn balance(&mut self, username: &str) -> StoreResult<Option<i32>> {
        self.touch(Key::User(username.to_string()));
        Ok(self.local.users.get(username).map(|u| u.balance))
    }

    async fn adjust_balance(&mut self, username: &str, delta: i32) -> StoreResult<()> {
        self.touch(Key::User(username.to_string()));
        let Some(user) = self.local.users.get_mut(username) else {
            return Err(StoreError::backend(format!("unknown user {}", username)));
        };
        user.balance += delta;
        self.dirty(Key::User(username.to_string()));
        Ok(())
    }

    async fn direct_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<Flight>> {
        let mut rows: Vec<Flight> = self
            .local
            .flights
            .values()
            .filter(|f| {
                !f.canceled
                    && f.origin_city == route.origin
                    && f.dest_city == route.destination
                    && f.day_of_month == route.day_of_month
            })
            .cloned()
            .collect();
        rows.sort_by_key(|f| (f.actual_time, f.fid));
        Ok(take_limit(rows, route.limit))
    }

    async fn one_stop_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<(Flight, Flight)>> {
        let flights: &BTreeMap<i32, Flight> = &self.local.flights;
        let mut rows: Vec<(Flight, Flight)> = flights
            .values()
            .filter(|a| !a.canceled && a.origin_city == route.origin && a.day_of_month == route.day_of_month)
            .flat_map(move |a| {
                flights
                    .values()
                    .filter(move |b| {
                        !b.canceled
                            && b.origin_city == a.dest_city
                            && b.dest_city == route.destination
                            && b.day_of_month == a.day_of_month
                    })
                    .map(move |b| (a.clone(), b.clone()))
            })
            .collect();
        rows.sort_by_key(|(a, b)| (i64::from(a.actual_time) + i64::from(b.actual_time), a.fid, b.fid));
        Ok(take_limit(rows, route.limit))
    }

    async fn flight(&mut self, fid: i32) -> StoreResult<Option<Flight>> {
        Ok(self.local.flights.get(&fid).cloned())
    }

    async fn materialize_capacity(&mut self, fid: i32) -> StoreResult<()> {
        self.touch(Key::Capacity(fid));
        if self.local.capacities.contains_key(&fid) {
            return Ok(());
        }
        if let Some(base) = self.local.flights.get(&fid).map(|f| f.capacity) {
            self.local.capacities.insert(fid, base);
            self.dirty(Key::Capacity(fid));
        }
        Ok(())
    }

    async fn capacity(&mut self, fid: i32) -> StoreResult<Option<i32>> {
        self.touch(Key::Capacity(fid));
        Ok(self.local.capacities.get(&fid).copied())
    }

    async fn adjust_capacity(&mut self, fid: i32, delta: i32) -> StoreResult<bool> {
        self.touch(Key::Capacity(fid));
        match self.local.capacities.get_mut(&fid) {
            Some(seats) if *seats + delta >= 0 => {
                *seats += delta;
                self.dirty(Key::Capacity(fid));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn next_reservation_id(&mut self) -> StoreResult<i32> {
        self.touch(Key::Counter);
        let next = self.local.counter.unwrap_or(0) + 1;
        self.local.counter = Some(next);
        self.dirty(Key::Counter);
        Ok(next)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        self.touch(Key::Reservation(reservation.rid));
        self.touch(Key::User(reservation.username.clone()));
        if !self.local.users.contains_key(&reservation.username) {
            return Err(StoreError::backend(format!(
                "unknown user {}",
                reservation.username
            )));
        }
        if self.local.reservations.contains_key(&reservation.rid) {
            return Err(StoreError::backend(format!(
                "duplicate reservation id {}",
                reservation.rid
            )));
        }
        self.local.reservations.insert(reservation.rid, reservation.clone());
        self.dirty(Key::Reservation(reservation.rid));
        self.dirty(Key::UserReservations(reservation.username.clone()));
        Ok(())
    }

    async fn reservations_for(&mut self, username: &str) -> StoreResult<Vec<Reservation>> {
        self.touch(Key::UserReservations(username.to_string()));
        Ok(self
            .local
            .reservations
            .values()
            .filter(|r| r.username == username)
            .cloned()
            .collect())
    }

    async fn reservation(&mut self, rid: i32, username: &str) -> StoreResult<Option<Reservation>> {
        self.touch(Key::Reservation(rid));
        Ok(self
            .local
            .reservations
            .get(&rid)
            .filter(|r| r.username == username)
            .cloned())
    }

    async fn mark_paid(&mut self, rid: i32) -> StoreResult<bool> {
        self.touch(Key::Reservation(rid));
        match self.local.reservations.get_mut(&rid) {
            Some(r) if !r.paid => {
                r.paid = true;
                self.dirty(Key::Reservation(rid));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_reservation(&mut self, rid: i32) -> StoreResult<()> {
        self.touch(Key::Reservation(rid));
        if let Some(r) = self.local.reservations.remove(&rid) {
            self.dirty(Key::Reservation(rid));
            self.dirty(Key::UserReservations(r.username));
        }
        Ok(())
    }

    async fn clear(&mut self) -> StoreResult<()> {
        self.local.users.clear();
        self.local.capacities.clear();
        self.local.counter = None;
        self.local.reservations.clear();
        self.cleared = true;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTransaction {
            shared: handle,
            local,
            start_seq,
            read,
            written,
            cleared,
        } = *self;

        if written.is_empty() && !cleared {
            return Ok(());
        }

        let mut shared = lock(&handle);
        let stale = shared.cleared_at > start_seq
            || (cleared && shared.seq > start_seq)
            || read
                .iter()
                .chain(&written)
                .any(|key| shared.versions.get(key).is_some_and(|v| *v > start_seq));
        if stale {
            debug!("Aborting unit started at {}: rows changed since", start_seq);
            return Err(StoreError::SerializationFailure);
        }

        shared.seq += 1;
        let seq = shared.seq;

        if cleared {
            let flights = Arc::clone(&shared.tables.flights);
            shared.tables = Tables { flights, ..local };
            shared.cleared_at = seq;
            shared.versions.clear();
            return Ok(());
        }

        for key in &written {
            match key {
                Key::User(name) => match local.users.get(name) {
                    Some(user) => {
                        shared.tables.users.insert(name.clone(), user.clone());
                    }
                    None => {
                        shared.tables.users.remove(name);
                    }
                },
                Key::Capacity(fid) => match local.capacities.get(fid) {
                    Some(seats) => {
                        shared.tables.capacities.insert(*fid, *seats);
                    }
                    None => {
                        shared.tables.capacities.remove(fid);
                    }
                },
                Key::Reservation(rid) => match local.reservations.get(rid) {
                    Some(r) => {
                        shared.tables.reservations.insert(*rid, r.clone());
                    }
                    None => {
                        shared.tables.reservations.remove(rid);
                    }
                },
                Key::Counter => shared.tables.counter = local.counter,
                Key::UserReservations(_) => {}
            }
            shared.versions.insert(key.clone(), seq);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        debug!("Rolled back unit started at {}", self.start_seq);
        Ok(())
    }
}
