use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use marquee_core::memory::{BookingStep, MemoryBookingStore, MemoryCache, MemoryCatalogStore};
use marquee_core::repository::{BookingStore, BookingUnit};
use marquee_core::{BookingRepository, BoxError, CacheAside, CacheKey, CatalogRepository, CoreError};
use marquee_shared::{NewBooking, Schedule, TransactionHistory};
use uuid::Uuid;

struct Harness {
    store: MemoryBookingStore,
    catalog_store: MemoryCatalogStore,
    cache: Arc<MemoryCache>,
    bookings: BookingRepository,
    catalog: CatalogRepository,
}

fn screening(id: i32, title: &str) -> Schedule {
    Schedule {
        id,
        movie_id: 1,
        title: title.to_string(),
        city_id: 1,
        city_name: "Bandung".to_string(),
        show_time_id: 2,
        start_at: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
        cinema_id: 3,
        cinema_name: "CineOne21".to_string(),
        cinema_img: Some("/img/cineone.png".to_string()),
        show_date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
    }
}

fn harness() -> Harness {
    let store = MemoryBookingStore::new();
    store.add_schedule(screening(7, "Spider-Man: Homecoming"));
    store.add_schedule(screening(8, "Tenet"));

    let catalog_store = MemoryCatalogStore::new(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    let cache = Arc::new(MemoryCache::new());
    let aside = CacheAside::new(cache.clone(), "marquee");

    Harness {
        bookings: BookingRepository::new(Arc::new(store.clone()), aside.clone()),
        catalog: CatalogRepository::new(
            Arc::new(catalog_store.clone()),
            aside,
            Duration::from_secs(86_400),
        ),
        store,
        catalog_store,
        cache,
    }
}

fn purchase(schedule_id: i32, seats: &[&str]) -> NewBooking {
    NewBooking {
        schedule_id,
        payment_method_id: 2,
        total_payment: 40_000 * seats.len() as i32,
        full_name: "Jonas El Rodriguez".to_string(),
        email: "jonas@example.com".to_string(),
        phone_number: "+62811000111".to_string(),
        seats: seats.iter().map(|s| s.to_string()).collect(),
    }
}

fn assert_nothing_persisted(store: &MemoryBookingStore) {
    assert_eq!(store.seat_code_count(), 0);
    assert_eq!(store.transaction_count(), 0);
    assert_eq!(store.link_count(), 0);
}

#[tokio::test]
async fn test_booking_round_trip() {
    let h = harness();
    let user = Uuid::new_v4();

    let tx = h.bookings.book_seats(user, purchase(7, &["A1", "A2"])).await.unwrap();
    assert_eq!(tx.seats, vec!["A1".to_string(), "A2".to_string()]);
    assert_eq!(tx.user_id, user);
    assert!(!tx.is_paid());

    assert!(h.bookings.sold_seats(7).await.unwrap().is_empty());

    h.bookings.mark_paid(tx.id).await.unwrap();
    assert_eq!(h.bookings.sold_seats(7).await.unwrap(), vec!["A1", "A2"]);
}

#[tokio::test]
async fn test_failure_after_seat_codes_rolls_back_everything() {
    let h = harness();
    h.store.fail_at(Some(BookingStep::Transaction));

    let result = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["A1", "A2"])).await;

    assert!(matches!(result, Err(CoreError::Store(_))));
    assert_nothing_persisted(&h.store);
}

#[tokio::test]
async fn test_failure_after_transaction_rolls_back_everything() {
    let h = harness();
    h.store.fail_at(Some(BookingStep::Links));

    let result = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["B1"])).await;

    assert!(matches!(result, Err(CoreError::Store(_))));
    assert_nothing_persisted(&h.store);
}

#[tokio::test]
async fn test_unknown_schedule_surfaces_as_store_failure() {
    let h = harness();

    let result = h.bookings.book_seats(Uuid::new_v4(), purchase(999, &["A1"])).await;

    assert!(matches!(result, Err(CoreError::Store(_))));
    assert_nothing_persisted(&h.store);
}

#[tokio::test]
async fn test_store_recovers_after_injected_failure() {
    let h = harness();
    h.store.fail_at(Some(BookingStep::SeatCodes));
    assert!(h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["A1"])).await.is_err());

    h.store.fail_at(None);
    h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["A1"])).await.unwrap();

    assert_eq!(h.store.seat_code_count(), 1);
    assert_eq!(h.store.transaction_count(), 1);
    assert_eq!(h.store.link_count(), 1);
}

/// Booking store whose units never finish linking seats.
struct StallingStore {
    inner: MemoryBookingStore,
}

struct StallingUnit {
    inner: Box<dyn BookingUnit>,
}

#[async_trait]
impl BookingUnit for StallingUnit {
    async fn insert_seat_codes(&mut self, labels: &[String]) -> Result<Vec<i32>, BoxError> {
        self.inner.insert_seat_codes(labels).await
    }

    async fn insert_transaction(
        &mut self,
        user_id: Uuid,
        booking: &NewBooking,
    ) -> Result<Uuid, BoxError> {
        self.inner.insert_transaction(user_id, booking).await
    }

    async fn link_seats(&mut self, _transaction_id: Uuid, _seat_ids: &[i32]) -> Result<(), BoxError> {
        std::future::pending().await
    }

    async fn commit(self: Box<Self>) -> Result<(), BoxError> {
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), BoxError> {
        self.inner.rollback().await
    }
}

#[async_trait]
impl BookingStore for StallingStore {
    async fn begin(&self) -> Result<Box<dyn BookingUnit>, BoxError> {
        let inner = self.inner.begin().await?;
        Ok(Box::new(StallingUnit { inner }))
    }

    async fn mark_paid(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        self.inner.mark_paid(transaction_id).await
    }

    async fn mark_scanned(&self, transaction_id: Uuid) -> Result<Option<Uuid>, BoxError> {
        self.inner.mark_scanned(transaction_id).await
    }

    async fn sold_seats(&self, schedule_id: i32) -> Result<Vec<String>, BoxError> {
        self.inner.sold_seats(schedule_id).await
    }

    async fn list_transactions(&self, user_id: Uuid) -> Result<Vec<TransactionHistory>, BoxError> {
        self.inner.list_transactions(user_id).await
    }
}

#[tokio::test]
async fn test_cancelled_booking_leaves_nothing_behind() {
    let h = harness();
    let stalling = BookingRepository::new(
        Arc::new(StallingStore {
            inner: h.store.clone(),
        }),
        CacheAside::new(h.cache.clone(), "marquee"),
    );

    let attempt = stalling.book_seats(Uuid::new_v4(), purchase(7, &["G1", "G2"]));
    let timed_out = tokio::time::timeout(Duration::from_millis(50), attempt).await;
    assert!(timed_out.is_err());
    assert_nothing_persisted(&h.store);

    // The abandoned unit does not block later bookings.
    h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["G1", "G2"])).await.unwrap();
    assert_eq!(h.store.seat_code_count(), 2);
    assert_eq!(h.store.transaction_count(), 1);
    assert_eq!(h.store.link_count(), 2);
}

#[tokio::test]
async fn test_mark_paid_twice_is_not_eligible() {
    let h = harness();
    let tx = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["C1"])).await.unwrap();

    let first = h.bookings.mark_paid(tx.id).await.unwrap();
    assert_eq!(first.value, tx.id);

    let second = h.bookings.mark_paid(tx.id).await;
    assert!(matches!(second, Err(CoreError::NotEligible(_))));
}

#[tokio::test]
async fn test_mark_paid_on_missing_transaction_is_not_eligible() {
    let h = harness();
    let result = h.bookings.mark_paid(Uuid::new_v4()).await;
    assert!(matches!(result, Err(CoreError::NotEligible(_))));
}

#[tokio::test]
async fn test_sold_seats_only_counts_paid_bookings() {
    let h = harness();
    let paid = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["A2", "A1"])).await.unwrap();
    h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["A3"])).await.unwrap();
    let other = h.bookings.book_seats(Uuid::new_v4(), purchase(8, &["A4"])).await.unwrap();

    h.bookings.mark_paid(paid.id).await.unwrap();
    h.bookings.mark_paid(other.id).await.unwrap();

    assert_eq!(h.bookings.sold_seats(7).await.unwrap(), vec!["A1", "A2"]);
}

// No uniqueness on (schedule, seat): both purchasers get B1. This pins the
// current behaviour; closing the gap needs a store-level constraint.
#[tokio::test]
async fn test_concurrent_bookings_of_one_seat_both_succeed() {
    let h = harness();

    let (first, second) = tokio::join!(
        h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["B1"])),
        h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["B1"])),
    );
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_ne!(first.id, second.id);
    assert_eq!(first.seats, vec!["B1"]);
    assert_eq!(second.seats, vec!["B1"]);
    assert_eq!(h.store.transaction_count(), 2);

    h.bookings.mark_paid(first.id).await.unwrap();
    h.bookings.mark_paid(second.id).await.unwrap();
    assert_eq!(h.bookings.sold_seats(7).await.unwrap(), vec!["B1"]);
}

#[tokio::test]
async fn test_history_is_most_recently_updated_first() {
    let h = harness();
    let user = Uuid::new_v4();
    let older = h.bookings.book_seats(user, purchase(7, &["D1"])).await.unwrap();
    let newer = h.bookings.book_seats(user, purchase(8, &["D2", "D3"])).await.unwrap();
    h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["D4"])).await.unwrap();

    let history = h.bookings.history(user).await.unwrap();
    assert_eq!(history.iter().map(|t| t.id).collect::<Vec<_>>(), vec![newer.id, older.id]);
    assert_eq!(history[0].title, "Tenet");
    assert_eq!(history[0].seats.len(), 2);

    h.bookings.mark_paid(older.id).await.unwrap();
    let history = h.bookings.history(user).await.unwrap();
    assert_eq!(history[0].id, older.id);
    assert!(history[0].paid_at.is_some());
}

#[tokio::test]
async fn test_payment_forces_popular_refetch() {
    let h = harness();
    let tx = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["E1"])).await.unwrap();

    h.catalog.list_popular().await.unwrap();
    h.catalog.list_popular().await.unwrap();
    assert_eq!(h.catalog_store.fetches.popular(), 1);

    let outcome = h.bookings.mark_paid(tx.id).await.unwrap();
    assert!(outcome.invalidation.is_clean());
    assert_eq!(outcome.invalidation.cleared, vec!["marquee:catalog:popular"]);

    h.catalog.list_popular().await.unwrap();
    assert_eq!(h.catalog_store.fetches.popular(), 2);
}

#[tokio::test]
async fn test_payment_succeeds_when_invalidation_fails() {
    let h = harness();
    let tx = h.bookings.book_seats(Uuid::new_v4(), purchase(7, &["F1"])).await.unwrap();
    h.cache.fail_deletes_for(&CacheAside::new(h.cache.clone(), "marquee").key(CacheKey::Popular));

    let outcome = h.bookings.mark_paid(tx.id).await.unwrap();

    assert_eq!(outcome.value, tx.id);
    assert!(!outcome.invalidation.is_clean());
    assert_eq!(outcome.invalidation.failed[0].key, "marquee:catalog:popular");
    assert_eq!(h.bookings.sold_seats(7).await.unwrap(), vec!["F1"]);
}
