pub mod booking;
pub mod cache;
pub mod catalog;
pub mod identity;
pub mod memory;
pub mod repository;

pub use booking::BookingRepository;
pub use cache::{CacheAside, CacheGateway, CacheKey, InvalidationFailure, InvalidationReport};
pub use catalog::CatalogRepository;
pub use identity::TokenBlacklist;

/// Error type produced by gateway implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Not eligible: {0}")]
    NotEligible(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Identity cache unavailable: {0}")]
    Identity(String),
    #[error("Store failure: {0}")]
    Store(#[source] BoxError),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Result of a committed write, together with the outcome of the cache
/// invalidation that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome<T> {
    pub value: T,
    pub invalidation: InvalidationReport,
}
