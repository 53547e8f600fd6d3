//! Booking conflict guard.
//!
//! Each order that holds (or may come to hold) a provider's time keeps a
//! slot record under `slot:{provider_id}:{order_id}`. The guard scans a
//! provider's slots for overlap before any write that would reserve the
//! window. Callers serialize themselves on the provider lease around the
//! check-then-insert sequence; the guard itself only reads and writes.

use std::sync::Arc;

use booking_storage::{StorageError, StorageService};
use booking_types::{Order, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const SLOT_NS: &str = "slot";

/// The reservation record the guard checks against.
///
/// Mirrors the owning order's status so the busy-set filter never has to
/// load full orders. The order service rewrites the slot on every committed
/// transition and drops it when the order reaches a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSlot {
	pub order_id: String,
	pub booking_start: DateTime<Utc>,
	pub booking_end: DateTime<Utc>,
	pub status: OrderStatus,
}

pub struct ConflictGuard {
	storage: Arc<StorageService>,
}

impl ConflictGuard {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Half-open interval overlap: `[s1, e1)` and `[s2, e2)` overlap iff
	/// `s1 < e2 && s2 < e1`. Back-to-back bookings touch without colliding.
	pub fn overlaps(
		s1: DateTime<Utc>,
		e1: DateTime<Utc>,
		s2: DateTime<Utc>,
		e2: DateTime<Utc>,
	) -> bool {
		s1 < e2 && s2 < e1
	}

	/// Finds a busy slot of the provider overlapping `[start, end)`.
	///
	/// Only slots whose status still reserves provider time count; delivered,
	/// disputed, unwinding, and terminal orders do not block new bookings.
	/// `exclude` skips the caller's own order when re-checking.
	pub async fn find_conflict(
		&self,
		provider_id: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		exclude: Option<&str>,
	) -> Result<Option<ProviderSlot>, StorageError> {
		let slots: Vec<ProviderSlot> = self
			.storage
			.list_values(SLOT_NS, &format!("{provider_id}:"))
			.await?;
		Ok(slots.into_iter().find(|slot| {
			slot.status.reserves_slot()
				&& exclude != Some(slot.order_id.as_str())
				&& Self::overlaps(slot.booking_start, slot.booking_end, start, end)
		}))
	}

	/// Brings the order's slot record in line with the order.
	///
	/// No provider means no slot; a terminal status removes it; anything else
	/// rewrites it with the current window and status.
	pub async fn sync_slot(&self, order: &Order) -> Result<(), StorageError> {
		let Some(provider_id) = &order.provider_id else {
			return Ok(());
		};
		let key = format!("{provider_id}:{}", order.id);
		if order.status.is_terminal() {
			self.storage.remove(SLOT_NS, &key).await
		} else {
			let slot = ProviderSlot {
				order_id: order.id.clone(),
				booking_start: order.booking_start,
				booking_end: order.booking_end,
				status: order.status,
			};
			self.storage.store(SLOT_NS, &key, &slot).await
		}
	}

	/// Drops a slot explicitly, used when an order moves to another provider.
	pub async fn remove_slot(&self, provider_id: &str, order_id: &str) -> Result<(), StorageError> {
		self.storage
			.remove(SLOT_NS, &format!("{provider_id}:{order_id}"))
			.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use booking_storage::implementations::memory::MemoryStorage;
	use chrono::NaiveDate;

	fn guard() -> ConflictGuard {
		ConflictGuard::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	fn at(hour: u32, minute: u32) -> DateTime<Utc> {
		NaiveDate::from_ymd_opt(2026, 9, 10)
			.unwrap()
			.and_hms_opt(hour, minute, 0)
			.unwrap()
			.and_utc()
	}

	async fn seed(
		guard: &ConflictGuard,
		order_id: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		status: OrderStatus,
	) {
		let slot = ProviderSlot {
			order_id: order_id.to_string(),
			booking_start: start,
			booking_end: end,
			status,
		};
		guard
			.storage
			.store(SLOT_NS, &format!("p1:{order_id}"), &slot)
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn overlapping_window_is_found() {
		let guard = guard();
		seed(&guard, "o1", at(14, 0), at(16, 0), OrderStatus::Confirmed).await;

		let conflict = guard
			.find_conflict("p1", at(15, 0), at(17, 0), None)
			.await
			.unwrap();
		assert_eq!(conflict.unwrap().order_id, "o1");
	}

	#[tokio::test]
	async fn back_to_back_windows_do_not_collide() {
		let guard = guard();
		seed(&guard, "o1", at(14, 0), at(16, 0), OrderStatus::Confirmed).await;

		let conflict = guard
			.find_conflict("p1", at(16, 0), at(18, 0), None)
			.await
			.unwrap();
		assert!(conflict.is_none());
	}

	#[tokio::test]
	async fn non_busy_statuses_do_not_block() {
		let guard = guard();
		seed(&guard, "o1", at(14, 0), at(16, 0), OrderStatus::Delivered).await;
		seed(&guard, "o2", at(14, 0), at(16, 0), OrderStatus::RefundPending).await;

		let conflict = guard
			.find_conflict("p1", at(14, 0), at(16, 0), None)
			.await
			.unwrap();
		assert!(conflict.is_none());
	}

	#[tokio::test]
	async fn exclusion_skips_own_slot() {
		let guard = guard();
		seed(&guard, "o1", at(14, 0), at(16, 0), OrderStatus::Pending).await;

		let conflict = guard
			.find_conflict("p1", at(14, 0), at(16, 0), Some("o1"))
			.await
			.unwrap();
		assert!(conflict.is_none());

		let conflict = guard
			.find_conflict("p1", at(14, 0), at(16, 0), Some("other"))
			.await
			.unwrap();
		assert!(conflict.is_some());
	}

	#[tokio::test]
	async fn other_providers_are_not_consulted() {
		let guard = guard();
		seed(&guard, "o1", at(14, 0), at(16, 0), OrderStatus::Confirmed).await;

		let conflict = guard
			.find_conflict("p2", at(14, 0), at(16, 0), None)
			.await
			.unwrap();
		assert!(conflict.is_none());
	}
}
