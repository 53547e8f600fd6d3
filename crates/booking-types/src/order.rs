//! Order types for the booking system.
//!
//! This module defines the order aggregate, its lifecycle status enum with the
//! transition table, and the payment/delivery/dispute/settlement records that
//! live inside an order.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::Role;
use crate::geo::DistanceSource;

/// Lifecycle status of an order.
///
/// The set of statuses is closed and every permitted transition is listed in
/// [`OrderStatus::allowed_targets`]. Anything not in that table is rejected by
/// the order service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Reservation created, waiting for the customer to submit deposit proof.
	PendingPayment,
	/// Deposit proof submitted, waiting for admin verification.
	Pending,
	/// Deposit verified, slot locked in the provider's schedule.
	Confirmed,
	/// The engagement is underway.
	InProgress,
	/// Work finished, waiting for the customer to pay the remaining balance.
	WaitingFinalPayment,
	/// Final payment proof submitted, waiting for admin verification.
	FinalPaymentPending,
	/// Final payment verified, provider is producing the deliverables.
	Processing,
	/// Deliverables handed over, waiting for acceptance or the grace window.
	Delivered,
	/// Customer disputed the delivery inside the grace window.
	Complaint,
	/// Order fulfilled and settled. Terminal.
	Completed,
	/// Cancellation requested after money moved, refund owed to the customer.
	RefundPending,
	/// Order cancelled. Terminal.
	Cancelled,
}

impl OrderStatus {
	/// Statuses this status may transition to.
	pub fn allowed_targets(&self) -> &'static [OrderStatus] {
		use OrderStatus::*;
		match self {
			PendingPayment => &[Pending, RefundPending, Cancelled],
			Pending => &[Confirmed, RefundPending],
			Confirmed => &[InProgress, RefundPending],
			InProgress => &[WaitingFinalPayment, RefundPending],
			WaitingFinalPayment => &[FinalPaymentPending, RefundPending],
			FinalPaymentPending => &[Processing, RefundPending],
			Processing => &[Delivered, RefundPending],
			Delivered => &[Completed, Complaint],
			Complaint => &[Completed, Delivered, Processing],
			RefundPending => &[Cancelled],
			Completed => &[],
			Cancelled => &[],
		}
	}

	pub fn can_transition_to(&self, target: OrderStatus) -> bool {
		self.allowed_targets().contains(&target)
	}

	/// Whether an order in this status reserves the provider's time slot.
	///
	/// The conflict guard considers exactly these statuses when checking for
	/// overlapping bookings. Past-fulfillment statuses and unwinding statuses
	/// no longer hold the slot.
	pub fn reserves_slot(&self) -> bool {
		use OrderStatus::*;
		matches!(
			self,
			PendingPayment
				| Pending | Confirmed
				| InProgress | WaitingFinalPayment
				| FinalPaymentPending
				| Processing
		)
	}

	pub fn is_terminal(&self) -> bool {
		self.allowed_targets().is_empty()
	}

	pub fn as_str(&self) -> &'static str {
		use OrderStatus::*;
		match self {
			PendingPayment => "pending_payment",
			Pending => "pending",
			Confirmed => "confirmed",
			InProgress => "in_progress",
			WaitingFinalPayment => "waiting_final_payment",
			FinalPaymentPending => "final_payment_pending",
			Processing => "processing",
			Delivered => "delivered",
			Complaint => "complaint",
			Completed => "completed",
			RefundPending => "refund_pending",
			Cancelled => "cancelled",
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single priced line on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
	/// What is being charged for.
	pub description: String,
	/// Amount in whole currency units.
	pub amount: Decimal,
}

/// Where the engagement takes place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
	pub address: String,
	pub city: String,
	pub district: String,
	/// Optional link to an external map pin.
	pub map_link: Option<String>,
	/// Coordinates when the customer supplied them.
	pub coordinates: Option<crate::geo::Coordinates>,
}

/// Monetary breakdown of an order.
///
/// `total = service_subtotal + travel_fee` and `final_amount = total -
/// discount` hold at creation. `deposit_required` is computed once from the
/// final amount and is never recomputed, even when an administrative
/// correction changes the other figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Financials {
	/// Sum of line item amounts.
	pub service_subtotal: Decimal,
	/// Distance-based surcharge, zero when no provider or no coordinates.
	pub travel_fee: Decimal,
	/// Subtotal plus travel fee.
	pub total: Decimal,
	/// Discount applied to the total.
	pub discount: Decimal,
	/// Amount the customer ultimately owes.
	pub final_amount: Decimal,
	/// Up-front deposit, rounded to whole currency units.
	pub deposit_required: Decimal,
}

/// Evidence trail for one payment (deposit or remaining balance).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentStage {
	/// Customer-supplied transfer proof.
	pub proof_url: Option<String>,
	/// When the customer says the transfer happened.
	pub transferred_at: Option<DateTime<Utc>>,
	/// True once an admin verified the transfer.
	pub verified: bool,
	pub verified_by: Option<String>,
	pub verified_at: Option<DateTime<Utc>>,
	/// Amount actually recorded by the verifying admin.
	pub amount: Option<Decimal>,
}

/// State of the post-fulfillment balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainingBalanceStatus {
	/// Deposit not yet confirmed, so the balance is unknown.
	NotCalculated,
	/// Balance is known and owed.
	Outstanding,
	/// Customer submitted transfer proof.
	ProofSubmitted,
	/// Admin verified the transfer.
	Paid,
}

/// The remaining balance owed after the deposit, with its own evidence trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemainingBalance {
	/// `final_amount - deposit amount`, known once the deposit is verified.
	pub amount: Option<Decimal>,
	pub status: RemainingBalanceStatus,
	pub stage: PaymentStage,
}

impl Default for RemainingBalance {
	fn default() -> Self {
		Self {
			amount: None,
			status: RemainingBalanceStatus::NotCalculated,
			stage: PaymentStage::default(),
		}
	}
}

/// Punctuality of the delivery against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
	Pending,
	OnTime,
	Late,
}

/// Delivery deadline and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
	/// Set when the final payment is verified.
	pub deadline: Option<DateTime<Utc>>,
	pub delivered_at: Option<DateTime<Utc>>,
	/// Link to the delivered product.
	pub product_url: Option<String>,
	pub status: DeliveryStatus,
}

impl Default for DeliveryRecord {
	fn default() -> Self {
		Self {
			deadline: None,
			delivered_at: None,
			product_url: None,
			status: DeliveryStatus::Pending,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
	Open,
	Resolved,
	Rejected,
}

/// A customer dispute raised against a delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeRecord {
	pub reason: String,
	pub status: DisputeStatus,
	pub opened_at: DateTime<Utc>,
	/// Admin response recorded at resolution.
	pub response: Option<String>,
	pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
	Unpaid,
	Paid,
}

/// Provider payout state. Independent of the customer-facing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementRecord {
	pub status: SettlementStatus,
	/// Final amount minus the platform fee.
	pub amount: Option<Decimal>,
	pub settled_at: Option<DateTime<Utc>>,
}

impl Default for SettlementRecord {
	fn default() -> Self {
		Self {
			status: SettlementStatus::Unpaid,
			amount: None,
			settled_at: None,
		}
	}
}

/// Distance figure the travel fee was computed from, kept for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelSummary {
	pub distance_km: f64,
	pub source: DistanceSource,
	pub breakdown: String,
}

/// One entry in an order's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
	/// Status the order entered.
	pub status: OrderStatus,
	pub at: DateTime<Utc>,
	pub actor_id: String,
	pub actor_role: Role,
	pub note: Option<String>,
}

/// The order aggregate.
///
/// Serialized as a single JSON document into storage; every mutation goes
/// through the order service, which serializes writers per order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
	/// Storage identifier (UUID).
	pub id: String,
	/// Human-readable code, e.g. "LB-000042".
	pub code: String,
	pub customer_id: String,
	/// Assigned provider. None until an admin assigns one, when the customer
	/// did not pick one at creation.
	pub provider_id: Option<String>,
	/// Reference into the external package catalog.
	pub package_ref: String,
	pub line_items: Vec<LineItem>,
	/// First (or only) day of the engagement.
	pub booking_date: NaiveDate,
	pub start_time: NaiveTime,
	/// Length of the engagement on its final day.
	pub duration_minutes: u32,
	/// Number of consecutive days reserved, at least 1.
	pub duration_days: u32,
	/// Start of the reserved span, UTC.
	pub booking_start: DateTime<Utc>,
	/// End of the reserved span, exclusive.
	pub booking_end: DateTime<Utc>,
	pub completed_date: Option<DateTime<Utc>>,
	pub location: Location,
	pub financials: Financials,
	pub travel: Option<TravelSummary>,
	pub deposit: PaymentStage,
	pub remaining: RemainingBalance,
	pub delivery: DeliveryRecord,
	pub dispute: Option<DisputeRecord>,
	pub settlement: SettlementRecord,
	pub status: OrderStatus,
	pub history: Vec<HistoryEntry>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Order {
	/// Whether any customer money has been submitted or confirmed.
	///
	/// Decides whether cancellation can go straight to `cancelled` or must
	/// pass through `refund_pending`.
	pub fn has_payment_evidence(&self) -> bool {
		self.deposit.proof_url.is_some()
			|| self.deposit.verified
			|| self.remaining.stage.proof_url.is_some()
			|| self.remaining.stage.verified
	}

	/// When the acceptance grace window started counting.
	///
	/// Normally the delivery instant. A dispute resolution that routes the
	/// order back to `delivered` restarts the window from the resolution, so
	/// the customer gets a fresh chance to react. None until delivered.
	pub fn completion_clock_start(&self) -> Option<DateTime<Utc>> {
		let delivered = self.delivery.delivered_at?;
		match self.dispute.as_ref().and_then(|d| d.resolved_at) {
			Some(resolved) if resolved > delivered => Some(resolved),
			_ => Some(delivered),
		}
	}
}
