use async_trait::async_trait;
use marquee_shared::{
    ArchivedMovie, Movie, MovieDetails, MovieFilter, MovieListing, MovieSummary, NewBooking,
    NewMovie, Schedule, ScheduleFilter, TransactionHistory,
};
use uuid::Uuid;

use crate::BoxError;

/// Relational store access for bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Opens an atomic unit. Dropping the unit without committing rolls it back.
    async fn begin(&self) -> Result<Box<dyn BookingUnit>, BoxError>;

    /// Sets `paid_at` when the transaction exists and is unpaid. Returns the id
    /// of the updated row, or `None` when nothing matched.
    async fn mark_paid(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError>;

    /// Sets `scanned_at` when the transaction is paid and not yet scanned.
    async fn mark_scanned(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError>;

    /// Distinct, sorted seat labels of paid transactions for a schedule.
    async fn sold_seats(&self, schedule_id: i32) -> Result<Vec<String>, BoxError>;

    /// Transactions of a user, most recently updated first.
    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionHistory>, BoxError>;
}

/// The statements of one seat reservation, sharing a single store transaction.
#[async_trait]
pub trait BookingUnit: Send {
    /// Inserts one seat code row per label and returns the generated ids.
    async fn insert_seat_codes(&mut self, labels: &[String]) -> Result<Vec<i32>, BoxError>;

    async fn insert_transaction(
        &mut self,
        user_id: Uuid,
        booking: &NewBooking,
    ) -> Result<Uuid, BoxError>;

    async fn link_seats(&mut self, transaction_id: Uuid, seat_ids: &[i32]) -> Result<(), BoxError>;

    async fn commit(self: Box<Self>) -> Result<(), BoxError>;

    async fn rollback(self: Box<Self>) -> Result<(), BoxError>;
}

/// Relational store access for movies, genres, cast and schedules.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn upcoming_movies(&self) -> Result<Vec<Movie>, BoxError>;

    async fn popular_movies(&self) -> Result<Vec<Movie>, BoxError>;

    async fn filter_movies(&self, filter: &MovieFilter) -> Result<Vec<Movie>, BoxError>;

    async fn movie_details(&self, movie_id: i32) -> Result<Option<MovieDetails>, BoxError>;

    async fn list_all_movies(&self, offset: i64) -> Result<Vec<MovieListing>, BoxError>;

    async fn archive_movie(&self, movie_id: i32) -> Result<Option<ArchivedMovie>, BoxError>;

    /// Creates the title, its genre and cast links, and its schedules atomically.
    async fn create_movie(&self, movie: &NewMovie) -> Result<MovieSummary, BoxError>;

    /// Updates the title and replaces its schedules atomically. `None` when the
    /// title does not exist.
    async fn edit_movie(
        &self,
        movie_id: i32,
        movie: &NewMovie,
    ) -> Result<Option<MovieSummary>, BoxError>;

    async fn filter_schedules(&self, filter: &ScheduleFilter) -> Result<Vec<Schedule>, BoxError>;
}
