//! Request and response types for the booking HTTP API.
//!
//! Body-shape validation lives here as `validator` derives; domain rules
//! (money ranges, schedule overlap, transition legality) are enforced by the
//! services.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::geo::DistanceSource;
use crate::order::OrderStatus;
use crate::schedule::ScheduleEntryKind;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineItemRequest {
	#[validate(length(min = 1))]
	pub description: String,
	/// Whole currency units. Must not be negative.
	pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocationRequest {
	#[validate(length(min = 1))]
	pub address: String,
	#[validate(length(min = 1))]
	pub city: String,
	#[validate(length(min = 1))]
	pub district: String,
	pub map_link: Option<String>,
	pub latitude: Option<f64>,
	pub longitude: Option<f64>,
}

/// Body of `POST /api/orders`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateOrderRequest {
	#[validate(length(min = 1))]
	pub customer_id: String,
	/// Chosen provider, or absent when an admin will assign one later.
	pub provider_id: Option<String>,
	#[validate(length(min = 1))]
	pub package_ref: String,
	/// Priced lines from the package catalog. At least one.
	#[validate(length(min = 1), nested)]
	pub line_items: Vec<LineItemRequest>,
	pub booking_date: NaiveDate,
	pub start_time: NaiveTime,
	#[validate(range(min = 1))]
	pub duration_minutes: u32,
	/// Consecutive days reserved; defaults to 1.
	pub duration_days: Option<u32>,
	pub discount: Option<Decimal>,
	#[validate(nested)]
	pub location: LocationRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignProviderRequest {
	#[validate(length(min = 1))]
	pub provider_id: String,
	pub note: Option<String>,
}

/// Transfer evidence for a deposit or final payment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PaymentProofRequest {
	#[validate(url)]
	pub proof_url: String,
	pub transferred_at: Option<DateTime<Utc>>,
	pub note: Option<String>,
}

/// Admin verification of a submitted transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyPaymentRequest {
	/// Amount actually received; defaults to the amount owed.
	pub amount: Option<Decimal>,
	pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DeliverRequest {
	#[validate(url)]
	pub product_url: String,
	pub note: Option<String>,
}

/// Generic transition body for actions that only carry a note.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionRequest {
	pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DisputeRequest {
	#[validate(length(min = 1))]
	pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
	Resolved,
	Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveDisputeRequest {
	pub outcome: DisputeOutcome,
	/// Where the order goes: `completed`, `delivered`, or `processing`.
	pub next_status: OrderStatus,
	pub response: Option<String>,
}

/// Body of `POST /api/quotes/travel-fee`. Side-effect free.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TravelFeeQuoteRequest {
	#[validate(length(min = 1))]
	pub provider_id: String,
	pub latitude: f64,
	pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelFeeQuoteResponse {
	pub distance_km: f64,
	pub source: DistanceSource,
	pub billable_km: f64,
	pub fee: Decimal,
	pub capped: bool,
	pub breakdown: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateScheduleEntryRequest {
	#[validate(length(min = 1))]
	pub title: String,
	pub date: NaiveDate,
	/// `personal` or `busy`. Order-linked entries cannot be created directly.
	pub kind: ScheduleEntryKind,
	pub start_time: Option<NaiveTime>,
	pub duration_minutes: Option<u32>,
}

/// Query string for `GET /api/orders`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderListQuery {
	pub customer_id: Option<String>,
	pub provider_id: Option<String>,
}

/// Query string for `GET /api/providers/{id}/schedule`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleRangeQuery {
	pub from: Option<NaiveDate>,
	pub to: Option<NaiveDate>,
}

/// API error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Error kind, e.g. "validation" or "conflict".
	pub error: String,
	/// Human-readable description.
	pub message: String,
	/// Additional context, e.g. the offending field.
	pub details: Option<serde_json::Value>,
}
