//! Schedule entry types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEntryKind {
	/// Projected from a confirmed order. Removed only by order cancellation.
	Order,
	/// Provider-owned note, freely created and deleted.
	Personal,
	/// Provider-owned blocked time.
	Busy,
}

/// One entry in a provider's schedule.
///
/// Order-linked entries use the order id as their entry id, which makes the
/// projection idempotent under event replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
	pub id: String,
	pub provider_id: String,
	pub title: String,
	pub date: NaiveDate,
	pub start: DateTime<Utc>,
	pub end: DateTime<Utc>,
	pub kind: ScheduleEntryKind,
	/// Back-reference for order-linked entries.
	pub order_id: Option<String>,
}
