//! SQLite BookingStore implementation.

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use shelterhub_client::Booking;
use sqlx::{Row, SqlitePool};

use crate::storage::schema::Bookings;
use crate::storage::{BookingStore, NewBooking, Result};

/// SQLite implementation of BookingStore.
pub struct SqliteBookingStore {
    pool: SqlitePool,
}

impl SqliteBookingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BookingStore for SqliteBookingStore {
    async fn insert(&self, booking: NewBooking) -> Result<i64> {
        let created_at = chrono::Utc::now().to_rfc3339();

        let (sql, values) = Query::insert()
            .into_table(Bookings::Table)
            .columns([
                Bookings::UserId,
                Bookings::ShelterId,
                Bookings::BookingDate,
                Bookings::CreatedAt,
            ])
            .values_panic([
                booking.user_id.into(),
                booking.shelter_id.into(),
                booking.booking_date.into(),
                created_at.into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let result = sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<Booking>> {
        let (sql, values) = Query::select()
            .columns([
                Bookings::Id,
                Bookings::UserId,
                Bookings::ShelterId,
                Bookings::BookingDate,
            ])
            .from(Bookings::Table)
            .and_where(Expr::col(Bookings::UserId).eq(user_id))
            .order_by(Bookings::Id, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in rows {
            bookings.push(Booking {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                shelter_id: row.try_get("shelter_id")?,
                booking_date: row.try_get("booking_date")?,
            });
        }
        Ok(bookings)
    }
}
