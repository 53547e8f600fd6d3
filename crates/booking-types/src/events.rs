use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{Actor, Order, OrderStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BookingEvent {
	Order(OrderEvent),
	Schedule(ScheduleEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	Created {
		order: Order,
	},
	StatusChanged {
		order: Order,
		from: OrderStatus,
		to: OrderStatus,
		actor: Actor,
		note: Option<String>,
	},
	ProviderAssigned {
		order_id: String,
		provider_id: String,
		previous_provider_id: Option<String>,
	},
	SettlementRecorded {
		order_id: String,
		provider_id: String,
		amount: Decimal,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScheduleEvent {
	EntryAdded {
		provider_id: String,
		entry_id: String,
	},
	EntryRemoved {
		provider_id: String,
		entry_id: String,
	},
}

pub struct EventBus {
	sender: broadcast::Sender<BookingEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
		self.sender.subscribe()
	}

	pub fn publish(
		&self,
		event: BookingEvent,
	) -> Result<(), broadcast::error::SendError<BookingEvent>> {
		self.sender.send(event)?;
		Ok(())
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
