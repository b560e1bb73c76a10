use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Purchase request for one screening, already validated by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBooking {
    pub schedule_id: i32,
    pub payment_method_id: i32,
    pub total_payment: i32,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub seats: Vec<String>,
}

/// A persisted purchase and the seats it claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub schedule_id: i32,
    pub payment_method_id: i32,
    pub total_payment: i32,
    pub full_name: String,
    pub email: String,
    pub phone_number: String,
    pub seats: Vec<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub scanned_at: Option<DateTime<Utc>>,
}

impl BookingTransaction {
    pub fn is_paid(&self) -> bool {
        self.paid_at.is_some()
    }
}

/// A purchase joined with the screening it is for, as listed in a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub id: Uuid,
    pub cinema: String,
    pub cinema_img: Option<String>,
    pub show_date: NaiveDate,
    pub title: String,
    pub age_rating: Option<String>,
    pub start_at: NaiveTime,
    pub seats: Vec<String>,
    pub total_payment: i32,
    pub phone_number: String,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub scanned_at: Option<DateTime<Utc>>,
    pub schedule_id: i32,
}
