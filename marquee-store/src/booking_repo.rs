use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use marquee_core::repository::{BookingStore, BookingUnit};
use marquee_core::BoxError;
use marquee_shared::{NewBooking, TransactionHistory};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

pub struct PgBookingStore {
    pool: PgPool,
}

impl PgBookingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A reservation in flight. Dropping it without `commit` rolls the
/// underlying transaction back.
pub struct PgBookingUnit {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    cinema: String,
    cinema_img: Option<String>,
    show_date: NaiveDate,
    title: String,
    age_rating: Option<String>,
    start_at: NaiveTime,
    seats: Vec<String>,
    total_payment: i32,
    phone_number: String,
    paid_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
    scanned_at: Option<DateTime<Utc>>,
    schedule_id: i32,
}

impl From<HistoryRow> for TransactionHistory {
    fn from(row: HistoryRow) -> Self {
        TransactionHistory {
            id: row.id,
            cinema: row.cinema,
            cinema_img: row.cinema_img,
            show_date: row.show_date,
            title: row.title,
            age_rating: row.age_rating,
            start_at: row.start_at,
            seats: row.seats,
            total_payment: row.total_payment,
            phone_number: row.phone_number,
            paid_at: row.paid_at,
            updated_at: row.updated_at,
            scanned_at: row.scanned_at,
            schedule_id: row.schedule_id,
        }
    }
}

#[async_trait]
impl BookingUnit for PgBookingUnit {
    async fn insert_seat_codes(&mut self, labels: &[String]) -> Result<Vec<i32>, BoxError> {
        let ids: Vec<i32> = sqlx::query_scalar(
            r#"
            INSERT INTO seat_codes (seat_code)
            SELECT UNNEST($1::text[])
            RETURNING id
            "#,
        )
        .bind(labels)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(ids)
    }

    async fn insert_transaction(
        &mut self,
        user_id: Uuid,
        booking: &NewBooking,
    ) -> Result<Uuid, BoxError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO transactions (
                user_id, payment_id, total_payment, full_name, email, phone_number, schedule_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(booking.payment_method_id)
        .bind(booking.total_payment)
        .bind(&booking.full_name)
        .bind(&booking.email)
        .bind(&booking.phone_number)
        .bind(booking.schedule_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }

    async fn link_seats(&mut self, transaction_id: Uuid, seat_ids: &[i32]) -> Result<(), BoxError> {
        sqlx::query(
            r#"
            INSERT INTO transactions_seats (transactions_id, seats_id)
            SELECT $1, UNNEST($2::int[])
            "#,
        )
        .bind(transaction_id)
        .bind(seat_ids)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn begin(&self) -> Result<Box<dyn BookingUnit>, BoxError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgBookingUnit { tx }))
    }

    async fn mark_paid(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE transactions
            SET paid_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND paid_at IS NULL
            RETURNING id
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_scanned(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        let id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE transactions
            SET scanned_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND paid_at IS NOT NULL AND scanned_at IS NULL
            RETURNING id
            "#,
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn sold_seats(&self, schedule_id: i32) -> Result<Vec<String>, BoxError> {
        let seats: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(
                ARRAY_AGG(DISTINCT sc.seat_code ORDER BY sc.seat_code),
                '{}'::text[]
            )
            FROM seat_codes sc
            JOIN transactions_seats ts ON ts.seats_id = sc.id
            JOIN transactions t ON t.id = ts.transactions_id
            WHERE t.schedule_id = $1 AND t.paid_at IS NOT NULL
            "#,
        )
        .bind(schedule_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(seats)
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionHistory>, BoxError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT
                t.id,
                c.name AS cinema,
                c.img AS cinema_img,
                s.show_date,
                m.title,
                ar.age_rating,
                st.start_at,
                ARRAY_AGG(sc.seat_code ORDER BY sc.id) AS seats,
                t.total_payment,
                t.phone_number,
                t.paid_at,
                t.updated_at,
                t.scanned_at,
                t.schedule_id
            FROM transactions t
                JOIN schedules s ON t.schedule_id = s.id
                JOIN movies m ON s.movie_id = m.id
                JOIN cinemas c ON s.cinema_id = c.id
                LEFT JOIN age_ratings ar ON m.age_rating_id = ar.id
                JOIN show_times st ON s.show_time_id = st.id
                JOIN transactions_seats ts ON t.id = ts.transactions_id
                JOIN seat_codes sc ON ts.seats_id = sc.id
            WHERE t.user_id = $1
            GROUP BY t.id, c.name, c.img, s.show_date, m.title, ar.age_rating, st.start_at
            ORDER BY t.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TransactionHistory::from).collect())
    }
}
