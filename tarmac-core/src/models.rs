use serde::Serialize;
use std::fmt;

/// Immutable flight reference row. Never mutated by the booking core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flight {
    pub fid: i32,
    pub day_of_month: i32,
    pub carrier_id: String,
    pub flight_num: String,
    pub origin_city: String,
    pub dest_city: String,
    /// Duration in minutes.
    pub actual_time: i32,
    /// Base capacity; remaining seats live in the capacity rows.
    pub capacity: i32,
    pub price: i32,
    pub canceled: bool,
}

impl fmt::Display for Flight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: {} Day: {} Carrier: {} Number: {} Origin: {} Dest: {} Duration: {} Capacity: {} Price: {}",
            self.fid,
            self.day_of_month,
            self.carrier_id,
            self.flight_num,
            self.origin_city,
            self.dest_city,
            self.actual_time,
            self.capacity,
            self.price
        )
    }
}

/// A bookable route produced by search: one flight, or two chained on the same day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Itinerary {
    Direct(Flight),
    OneStop(Flight, Flight),
}

impl Itinerary {
    pub fn first_leg(&self) -> &Flight {
        match self {
            Itinerary::Direct(f) | Itinerary::OneStop(f, _) => f,
        }
    }

    pub fn second_leg(&self) -> Option<&Flight> {
        match self {
            Itinerary::Direct(_) => None,
            Itinerary::OneStop(_, f) => Some(f),
        }
    }

    pub fn legs(&self) -> impl Iterator<Item = &Flight> {
        std::iter::once(self.first_leg()).chain(self.second_leg())
    }

    pub fn leg_count(&self) -> usize {
        match self {
            Itinerary::Direct(_) => 1,
            Itinerary::OneStop(..) => 2,
        }
    }

    pub fn total_minutes(&self) -> i64 {
        self.legs().map(|f| i64::from(f.actual_time)).sum()
    }

    /// Sum of leg prices, or `None` if it does not fit a reservation's cost column.
    pub fn cost(&self) -> Option<i32> {
        self.legs().try_fold(0i32, |total, f| total.checked_add(f.price))
    }

    pub fn day_of_month(&self) -> i32 {
        self.first_leg().day_of_month
    }
}

/// A booked itinerary owned by one user. Its id is never reused, even after cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub rid: i32,
    pub fid1: i32,
    pub fid2: Option<i32>,
    pub username: String,
    pub paid: bool,
    pub cost: i32,
    pub day_of_month: i32,
}

impl Reservation {
    pub fn flight_ids(&self) -> impl Iterator<Item = i32> {
        std::iter::once(self.fid1).chain(self.fid2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserAccount {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub balance: i32,
}
