use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::debug;

use tarmac_core::repository::{FlightStore, RouteQuery, StoreTransaction};
use tarmac_core::{Flight, Reservation, StoreError, StoreResult, UserAccount};

use crate::app_config::IsolationLevel;

/// `FlightStore` over a PostgreSQL pool. Each unit is one database transaction
/// opened at the configured isolation level.
#[derive(Clone)]
pub struct PostgresFlightStore {
    pool: PgPool,
    isolation: IsolationLevel,
}

impl PostgresFlightStore {
    pub fn new(pool: PgPool, isolation: IsolationLevel) -> Self {
        Self { pool, isolation }
    }
}

/// SQLSTATE 40001 (serialization_failure) and 40P01 (deadlock_detected) mean the
/// server aborted the unit in favour of a concurrent one.
fn map_sqlx(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if matches!(db.code().as_deref(), Some("40001") | Some("40P01")) {
            return StoreError::SerializationFailure;
        }
    }
    StoreError::backend(err)
}

const FLIGHT_COLUMNS: &str =
    "fid, day_of_month, carrier_id, flight_num, origin_city, dest_city, actual_time, capacity, price, canceled";

fn flight_from_row(row: &PgRow, prefix: &str) -> Result<Flight, sqlx::Error> {
    let col = |name: &str| format!("{}{}", prefix, name);
    Ok(Flight {
        fid: row.try_get(col("fid").as_str())?,
        day_of_month: row.try_get(col("day_of_month").as_str())?,
        carrier_id: row.try_get(col("carrier_id").as_str())?,
        flight_num: row.try_get(col("flight_num").as_str())?,
        origin_city: row.try_get(col("origin_city").as_str())?,
        dest_city: row.try_get(col("dest_city").as_str())?,
        actual_time: row.try_get(col("actual_time").as_str())?,
        capacity: row.try_get(col("capacity").as_str())?,
        price: row.try_get(col("price").as_str())?,
        canceled: row.try_get(col("canceled").as_str())?,
    })
}

#[derive(sqlx::FromRow)]
struct UserRow {
    username: String,
    password: String,
    balance: i32,
}

impl From<UserRow> for UserAccount {
    fn from(row: UserRow) -> Self {
        UserAccount {
            username: row.username,
            password: row.password,
            balance: row.balance,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    rid: i32,
    fid1: i32,
    fid2: Option<i32>,
    username: String,
    paid: bool,
    cost: i32,
    day_of_month: i32,
}

impl From<ReservationRow> for Reservation {
    fn from(row: ReservationRow) -> Self {
        Reservation {
            rid: row.rid,
            fid1: row.fid1,
            fid2: row.fid2,
            username: row.username,
            paid: row.paid,
            cost: row.cost,
            day_of_month: row.day_of_month,
        }
    }
}

#[async_trait]
impl FlightStore for PostgresFlightStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query(self.isolation.set_transaction_sql())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn find_user(&mut self, username: &str) -> StoreResult<Option<UserAccount>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT username, password, balance FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(row.map(UserAccount::from))
    }

    async fn insert_user(&mut self, user: &UserAccount) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO users (username, password, balance) VALUES ($1, $2, $3) ON CONFLICT (username) DO NOTHING",
        )
        .bind(&user.username)
        .bind(&user.password)
        .bind(user.balance)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn balance(&mut self, username: &str) -> StoreResult<Option<i32>> {
        sqlx::query_scalar::<_, i32>("SELECT balance FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)
    }

    async fn adjust_balance(&mut self, username: &str, delta: i32) -> StoreResult<()> {
        debug!("balance {} {:+}", username, delta);
        let done = sqlx::query("UPDATE users SET balance = balance + $2 WHERE username = $1")
            .bind(username)
            .bind(delta)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        if done.rows_affected() == 0 {
            return Err(StoreError::backend(format!("unknown user {}", username)));
        }
        Ok(())
    }

    async fn direct_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<Flight>> {
        let sql = format!(
            "SELECT {} FROM flights \
             WHERE origin_city = $1 AND dest_city = $2 AND day_of_month = $3 AND NOT canceled \
             ORDER BY actual_time ASC, fid ASC LIMIT $4",
            FLIGHT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(&route.origin)
            .bind(&route.destination)
            .bind(route.day_of_month)
            .bind(route.limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| flight_from_row(row, ""))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn one_stop_flights(&mut self, route: &RouteQuery) -> StoreResult<Vec<(Flight, Flight)>> {
        let rows = sqlx::query(
            r#"
            SELECT
                f1.fid AS a_fid, f1.day_of_month AS a_day_of_month, f1.carrier_id AS a_carrier_id,
                f1.flight_num AS a_flight_num, f1.origin_city AS a_origin_city, f1.dest_city AS a_dest_city,
                f1.actual_time AS a_actual_time, f1.capacity AS a_capacity, f1.price AS a_price,
                f1.canceled AS a_canceled,
                f2.fid AS b_fid, f2.day_of_month AS b_day_of_month, f2.carrier_id AS b_carrier_id,
                f2.flight_num AS b_flight_num, f2.origin_city AS b_origin_city, f2.dest_city AS b_dest_city,
                f2.actual_time AS b_actual_time, f2.capacity AS b_capacity, f2.price AS b_price,
                f2.canceled AS b_canceled
            FROM flights f1
            JOIN flights f2 ON f1.dest_city = f2.origin_city AND f1.day_of_month = f2.day_of_month
            WHERE f1.origin_city = $1 AND f2.dest_city = $2 AND f1.day_of_month = $3
              AND NOT f1.canceled AND NOT f2.canceled
            ORDER BY (f1.actual_time::bigint + f2.actual_time) ASC, f1.fid ASC, f2.fid ASC
            LIMIT $4
            "#,
        )
        .bind(&route.origin)
        .bind(&route.destination)
        .bind(route.day_of_month)
        .bind(route.limit)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;

        rows.iter()
            .map(|row| -> Result<(Flight, Flight), sqlx::Error> {
                Ok((flight_from_row(row, "a_")?, flight_from_row(row, "b_")?))
            })
            .collect::<Result<_, _>>()
            .map_err(map_sqlx)
    }

    async fn flight(&mut self, fid: i32) -> StoreResult<Option<Flight>> {
        let sql = format!("SELECT {} FROM flights WHERE fid = $1", FLIGHT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(fid)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        row.map(|row| flight_from_row(&row, ""))
            .transpose()
            .map_err(map_sqlx)
    }

    async fn materialize_capacity(&mut self, fid: i32) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO capacities (fid, capacity) \
             SELECT fid, capacity FROM flights WHERE fid = $1 \
             ON CONFLICT (fid) DO NOTHING",
        )
        .bind(fid)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn capacity(&mut self, fid: i32) -> StoreResult<Option<i32>> {
        sqlx::query_scalar::<_, i32>("SELECT capacity FROM capacities WHERE fid = $1")
            .bind(fid)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_sqlx)
    }

    async fn adjust_capacity(&mut self, fid: i32, delta: i32) -> StoreResult<bool> {
        debug!("capacity {} {:+}", fid, delta);
        let result = sqlx::query(
            "UPDATE capacities SET capacity = capacity + $2 WHERE fid = $1 AND capacity + $2 >= 0",
        )
        .bind(fid)
        .bind(delta)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn next_reservation_id(&mut self) -> StoreResult<i32> {
        sqlx::query("INSERT INTO reservation_counter (id, count) VALUES (TRUE, 0) ON CONFLICT (id) DO NOTHING")
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;

        sqlx::query_scalar::<_, i32>("UPDATE reservation_counter SET count = count + 1 WHERE id RETURNING count")
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_sqlx)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO reservations (rid, fid1, fid2, username, paid, cost, day_of_month) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(reservation.rid)
        .bind(reservation.fid1)
        .bind(reservation.fid2)
        .bind(&reservation.username)
        .bind(reservation.paid)
        .bind(reservation.cost)
        .bind(reservation.day_of_month)
        .execute(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn reservations_for(&mut self, username: &str) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            "SELECT rid, fid1, fid2, username, paid, cost, day_of_month \
             FROM reservations WHERE username = $1 ORDER BY rid ASC",
        )
        .bind(username)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(Reservation::from).collect())
    }

    async fn reservation(&mut self, rid: i32, username: &str) -> StoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(
            "SELECT rid, fid1, fid2, username, paid, cost, day_of_month \
             FROM reservations WHERE rid = $1 AND username = $2",
        )
        .bind(rid)
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(map_sqlx)?;
        Ok(row.map(Reservation::from))
    }

    async fn mark_paid(&mut self, rid: i32) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE reservations SET paid = TRUE WHERE rid = $1 AND NOT paid")
            .bind(rid)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_reservation(&mut self, rid: i32) -> StoreResult<()> {
        sqlx::query("DELETE FROM reservations WHERE rid = $1")
            .bind(rid)
            .execute(&mut *self.tx)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn clear(&mut self) -> StoreResult<()> {
        // Children before parents.
        for table in ["reservations", "users", "capacities", "reservation_counter"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&mut *self.tx)
                .await
                .map_err(map_sqlx)?;
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let PgTransaction { tx } = *self;
        tx.commit().await.map_err(map_sqlx)
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let PgTransaction { tx } = *self;
        tx.rollback().await.map_err(map_sqlx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_database_errors_are_backend_failures() {
        let err = map_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(!err.is_retryable());
    }
}
