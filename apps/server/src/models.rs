use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Status enums (stored as lowercase TEXT) ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    /// Statuses that keep a date range occupied.
    pub fn blocks_dates(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Cash,
    Transfer,
}

// ── Database models ──

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Apartment {
    pub id: i64,
    pub title: String,
    pub address: String,
    pub city: String,
    pub price_per_night: f64,
    pub max_guests: i64,
    /// JSON array of amenity names, stored verbatim.
    pub amenities: String,
    pub owner_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Booking {
    pub id: i64,
    pub apartment_id: i64,
    pub created_by: String,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guests: i64,
    pub total_price: f64,
    pub status: BookingStatus,
    pub special_requests: Option<String>,
    pub reminder_sent: bool,
    pub created_at: String,
    pub cancelled_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: i64,
    pub booking_id: i64,
    pub amount: f64,
    pub payment_method: PaymentMethod,
    pub status: PaymentStatus,
    #[serde(rename = "transaction_id")]
    pub provider_txn_id: Option<String>,
    pub paid_by: String,
    pub created_at: String,
}

// ── API request/response types ──

#[derive(Debug, Deserialize)]
pub struct CreateApartmentRequest {
    pub title: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    pub price_per_night: f64,
    pub max_guests: Option<i64>,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub owner_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateApartmentRequest {
    pub actor: String,
    pub title: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub price_per_night: Option<f64>,
    pub max_guests: Option<i64>,
    pub amenities: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ApartmentsQuery {
    pub city: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBookingRequest {
    pub apartment_id: Option<i64>,
    pub check_in: Option<String>,
    pub check_out: Option<String>,
    pub guests: Option<i64>,
    pub special_requests: Option<String>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    pub status: BookingStatus,
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct BookingsQuery {
    pub apartment_id: Option<i64>,
    pub created_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    pub apartment_id: i64,
    pub check_in: String,
    pub check_out: String,
}

#[derive(Debug, Serialize)]
pub struct AvailabilityResponse {
    pub available: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateIntentRequest {
    pub booking_id: Option<i64>,
    /// Client-displayed amount in major units; the server recomputes its own.
    pub amount: Option<f64>,
    pub paid_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateIntentResponse {
    pub intent_id: String,
    pub client_secret: String,
    pub amount: f64,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub booking_id: Option<i64>,
    pub amount: Option<f64>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<PaymentStatus>,
    pub transaction_id: Option<String>,
    pub paid_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentsQuery {
    pub booking_id: Option<i64>,
    pub status: Option<PaymentStatus>,
    pub paid_by: Option<String>,
}

// ── Provider webhook payload ──

#[derive(Debug, Deserialize)]
pub struct ProviderEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: ProviderEventData,
}

#[derive(Debug, Deserialize)]
pub struct ProviderEventData {
    pub object: ProviderObject,
}

#[derive(Debug, Deserialize)]
pub struct ProviderObject {
    /// Provider transaction (payment intent) identifier.
    pub id: String,
    /// Amount in minor currency units.
    #[serde(default)]
    pub amount: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProviderObject {
    pub fn booking_id(&self) -> Option<i64> {
        self.metadata.get("booking_id").and_then(|s| s.parse().ok())
    }

    pub fn paid_by(&self) -> Option<&str> {
        self.metadata.get("paid_by").map(|s| s.as_str())
    }
}

// ── Response envelope ──

#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
