pub mod models;

pub use models::booking::{BookingTransaction, NewBooking, TransactionHistory};
pub use models::movie::{
    ArchivedMovie, Movie, MovieDetails, MovieFilter, MovieListing, MovieSummary, NewMovie,
};
pub use models::schedule::{Schedule, ScheduleFilter, SchedulePlan, ScheduleSlot};
