use std::sync::Arc;

use marquee_shared::{BookingTransaction, NewBooking, TransactionHistory};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheAside, CacheKey};
use crate::repository::{BookingStore, BookingUnit};
use crate::{BoxError, CoreError, CoreResult, WriteOutcome};

/// Seat reservation, payment marking and booking read views.
///
/// Writes go straight to the relational store; the cache is only touched to
/// invalidate popularity rankings after a payment commits.
///
/// Seats are not checked against earlier bookings of the same schedule, and
/// unpaid bookings never release their seats. Two purchasers can therefore
/// hold the same label on one screening.
#[derive(Clone)]
pub struct BookingRepository {
    store: Arc<dyn BookingStore>,
    cache: CacheAside,
}

impl BookingRepository {
    pub fn new(store: Arc<dyn BookingStore>, cache: CacheAside) -> Self {
        Self { store, cache }
    }

    /// Creates the seat codes, the transaction and the seat links in one
    /// atomic unit. Either all of them persist or none do.
    pub async fn book_seats(
        &self,
        user_id: Uuid,
        booking: NewBooking,
    ) -> CoreResult<BookingTransaction> {
        if booking.seats.is_empty() {
            return Err(CoreError::Validation(
                "at least one seat is required".to_string(),
            ));
        }
        if booking.seats.iter().any(|s| s.trim().is_empty()) {
            return Err(CoreError::Validation("seat labels must not be blank".to_string()));
        }

        let mut unit = self.store.begin().await.map_err(CoreError::Store)?;

        let transaction_id = match reserve(unit.as_mut(), user_id, &booking).await {
            Ok(id) => id,
            Err(e) => {
                if let Err(rollback_err) = unit.rollback().await {
                    warn!(error = %rollback_err, "failed to roll back booking");
                }
                error!(schedule_id = booking.schedule_id, error = %e, "booking failed");
                return Err(CoreError::Store(e));
            }
        };

        unit.commit().await.map_err(|e| {
            error!(schedule_id = booking.schedule_id, error = %e, "booking commit failed");
            CoreError::Store(e)
        })?;

        info!(
            transaction_id = %transaction_id,
            schedule_id = booking.schedule_id,
            seats = booking.seats.len(),
            "booking created"
        );

        Ok(BookingTransaction {
            id: transaction_id,
            user_id,
            schedule_id: booking.schedule_id,
            payment_method_id: booking.payment_method_id,
            total_payment: booking.total_payment,
            full_name: booking.full_name,
            email: booking.email,
            phone_number: booking.phone_number,
            seats: booking.seats,
            paid_at: None,
            scanned_at: None,
        })
    }

    /// Marks an unpaid transaction as paid, then clears the popularity caches.
    pub async fn mark_paid(&self, transaction_id: Uuid) -> CoreResult<WriteOutcome<Uuid>> {
        let id = self
            .store
            .mark_paid(transaction_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| {
                CoreError::NotEligible(format!(
                    "transaction {transaction_id} does not exist or is already paid"
                ))
            })?;

        info!(transaction_id = %id, "transaction paid");
        let invalidation = self.cache.invalidate(&CacheKey::RANKING).await;

        Ok(WriteOutcome {
            value: id,
            invalidation,
        })
    }

    /// Records a ticket scan. Only paid, unscanned transactions qualify.
    pub async fn mark_scanned(&self, transaction_id: Uuid) -> CoreResult<Uuid> {
        self.store
            .mark_scanned(transaction_id)
            .await
            .map_err(CoreError::Store)?
            .ok_or_else(|| {
                CoreError::NotEligible(format!(
                    "transaction {transaction_id} is unpaid, missing or already scanned"
                ))
            })
    }

    /// Seat labels of paid bookings for a schedule, distinct and sorted.
    pub async fn sold_seats(&self, schedule_id: i32) -> CoreResult<Vec<String>> {
        self.store
            .sold_seats(schedule_id)
            .await
            .map_err(CoreError::Store)
    }

    pub async fn history(&self, user_id: Uuid) -> CoreResult<Vec<TransactionHistory>> {
        self.store
            .list_transactions(user_id)
            .await
            .map_err(CoreError::Store)
    }
}

async fn reserve(
    unit: &mut dyn BookingUnit,
    user_id: Uuid,
    booking: &NewBooking,
) -> Result<Uuid, BoxError> {
    let seat_ids = unit.insert_seat_codes(&booking.seats).await?;
    if seat_ids.len() != booking.seats.len() {
        return Err(format!(
            "inserted {} seat codes for {} labels",
            seat_ids.len(),
            booking.seats.len()
        )
        .into());
    }

    let transaction_id = unit.insert_transaction(user_id, booking).await?;
    unit.link_seats(transaction_id, &seat_ids).await?;
    Ok(transaction_id)
}
