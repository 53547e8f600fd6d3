//! Provider schedule management.
//!
//! Two kinds of entries share one namespace: projections of confirmed
//! orders, written by the engine when it observes a confirmation, and
//! provider-owned personal or busy entries managed over the API. Order
//! projections are keyed by the order id so a replayed confirmation
//! overwrites instead of duplicating, and they leave the schedule only
//! through the order lifecycle, never by hand.

use std::sync::Arc;

use booking_storage::{StorageError, StorageService};
use booking_types::api::CreateScheduleEntryRequest;
use booking_types::{
	Actor, BookingEvent, EventBus, Order, Role, ScheduleEntry, ScheduleEntryKind, ScheduleEvent,
};
use chrono::{Duration, NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::{debug, info};

const SCHEDULE_NS: &str = "schedule";
const DEFAULT_DURATION_MINUTES: u32 = 60;

#[derive(Debug, Error)]
pub enum ScheduleError {
	#[error("schedule entry not found: {0}")]
	NotFound(String),
	#[error("invalid {field}: {message}")]
	Validation { field: String, message: String },
	#[error("entry belongs to an order; cancel the order instead")]
	OrderLinked,
	#[error("unauthorized: {0}")]
	Unauthorized(String),
	#[error("storage error: {0}")]
	Storage(String),
}

impl From<StorageError> for ScheduleError {
	fn from(e: StorageError) -> Self {
		ScheduleError::Storage(e.to_string())
	}
}

pub struct ScheduleService {
	storage: Arc<StorageService>,
	event_bus: EventBus,
}

impl ScheduleService {
	pub fn new(storage: Arc<StorageService>, event_bus: EventBus) -> Self {
		Self { storage, event_bus }
	}

	/// Projects a confirmed order into its provider's schedule.
	pub async fn upsert_order_entry(&self, order: &Order) -> Result<(), ScheduleError> {
		let Some(provider_id) = order.provider_id.clone() else {
			return Ok(());
		};
		let entry = ScheduleEntry {
			id: order.id.clone(),
			provider_id: provider_id.clone(),
			title: format!("Booking {}", order.code),
			date: order.booking_date,
			start: order.booking_start,
			end: order.booking_end,
			kind: ScheduleEntryKind::Order,
			order_id: Some(order.id.clone()),
		};
		self.storage
			.store(SCHEDULE_NS, &format!("{provider_id}:{}", entry.id), &entry)
			.await?;
		debug!(provider_id = %provider_id, order_id = %order.id, "order projected onto schedule");
		self.publish(ScheduleEvent::EntryAdded {
			provider_id,
			entry_id: order.id.clone(),
		});
		Ok(())
	}

	/// Removes an order's projection. Missing entries are fine, a
	/// cancellation can arrive before the order was ever confirmed.
	pub async fn remove_order_entry(
		&self,
		provider_id: &str,
		order_id: &str,
	) -> Result<(), ScheduleError> {
		let key = format!("{provider_id}:{order_id}");
		match self
			.storage
			.retrieve::<ScheduleEntry>(SCHEDULE_NS, &key)
			.await
		{
			Ok(entry) if entry.kind == ScheduleEntryKind::Order => {
				self.storage.remove(SCHEDULE_NS, &key).await?;
				debug!(provider_id, order_id, "order projection removed from schedule");
				self.publish(ScheduleEvent::EntryRemoved {
					provider_id: provider_id.to_string(),
					entry_id: order_id.to_string(),
				});
				Ok(())
			}
			Ok(_) => Ok(()),
			Err(StorageError::NotFound) => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	/// Creates a personal or busy entry on a provider's calendar. Entries
	/// without a start time block the whole day.
	pub async fn create_entry(
		&self,
		actor: &Actor,
		provider_id: &str,
		request: CreateScheduleEntryRequest,
	) -> Result<ScheduleEntry, ScheduleError> {
		Self::require_owner(actor, provider_id)?;
		if request.kind == ScheduleEntryKind::Order {
			return Err(ScheduleError::Validation {
				field: "kind".to_string(),
				message: "order entries are projected from bookings".to_string(),
			});
		}
		let (start, end) = match request.start_time {
			Some(start_time) => {
				let minutes = request.duration_minutes.unwrap_or(DEFAULT_DURATION_MINUTES);
				if minutes == 0 {
					return Err(ScheduleError::Validation {
						field: "duration_minutes".to_string(),
						message: "must be at least 1".to_string(),
					});
				}
				let start = request.date.and_time(start_time).and_utc();
				(start, start + Duration::minutes(i64::from(minutes)))
			}
			None => {
				let start = request.date.and_time(NaiveTime::MIN).and_utc();
				(start, start + Duration::days(1))
			}
		};
		let entry = ScheduleEntry {
			id: uuid::Uuid::new_v4().to_string(),
			provider_id: provider_id.to_string(),
			title: request.title,
			date: request.date,
			start,
			end,
			kind: request.kind,
			order_id: None,
		};
		self.storage
			.store(SCHEDULE_NS, &format!("{provider_id}:{}", entry.id), &entry)
			.await?;
		info!(provider_id, entry_id = %entry.id, "schedule entry created");
		self.publish(ScheduleEvent::EntryAdded {
			provider_id: provider_id.to_string(),
			entry_id: entry.id.clone(),
		});
		Ok(entry)
	}

	/// Deletes a provider-owned entry. Order projections are refused.
	pub async fn delete_entry(
		&self,
		actor: &Actor,
		provider_id: &str,
		entry_id: &str,
	) -> Result<(), ScheduleError> {
		Self::require_owner(actor, provider_id)?;
		let key = format!("{provider_id}:{entry_id}");
		let entry = match self
			.storage
			.retrieve::<ScheduleEntry>(SCHEDULE_NS, &key)
			.await
		{
			Ok(entry) => entry,
			Err(StorageError::NotFound) => {
				return Err(ScheduleError::NotFound(entry_id.to_string()))
			}
			Err(e) => return Err(e.into()),
		};
		if entry.kind == ScheduleEntryKind::Order {
			return Err(ScheduleError::OrderLinked);
		}
		self.storage.remove(SCHEDULE_NS, &key).await?;
		info!(provider_id, entry_id, "schedule entry deleted");
		self.publish(ScheduleEvent::EntryRemoved {
			provider_id: provider_id.to_string(),
			entry_id: entry_id.to_string(),
		});
		Ok(())
	}

	/// Lists a provider's entries, optionally bounded by date, ordered by
	/// start time.
	pub async fn list_entries(
		&self,
		provider_id: &str,
		from: Option<NaiveDate>,
		to: Option<NaiveDate>,
	) -> Result<Vec<ScheduleEntry>, ScheduleError> {
		let mut entries: Vec<ScheduleEntry> = self
			.storage
			.list_values(SCHEDULE_NS, &format!("{provider_id}:"))
			.await?;
		entries.retain(|entry| {
			from.map_or(true, |from| entry.date >= from) && to.map_or(true, |to| entry.date <= to)
		});
		entries.sort_by_key(|entry| entry.start);
		Ok(entries)
	}

	fn require_owner(actor: &Actor, provider_id: &str) -> Result<(), ScheduleError> {
		match actor.role {
			Role::Admin | Role::System => Ok(()),
			Role::Provider if actor.id == provider_id => Ok(()),
			_ => Err(ScheduleError::Unauthorized(
				"only the schedule owner may manage entries".to_string(),
			)),
		}
	}

	fn publish(&self, event: ScheduleEvent) {
		// A send error only means nobody is subscribed right now.
		if self
			.event_bus
			.publish(BookingEvent::Schedule(event))
			.is_err()
		{
			debug!("event dropped, no subscribers");
		}
	}
}
