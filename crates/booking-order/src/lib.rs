//! Order lifecycle module for the booking system.
//!
//! Owns the canonical order record: creation behind the booking conflict
//! guard, every status transition with its actor gates and evidence capture,
//! settlement idempotence, and the time-driven sweep. Cross-request
//! coordination goes through storage leases rather than in-process locks, so
//! correctness does not depend on running a single instance.

use booking_types::OrderStatus;
use thiserror::Error;

pub mod conflict;
pub mod service;

pub use conflict::{ConflictGuard, ProviderSlot};
pub use service::{OrderService, OrderSettings, SweepOutcome};

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
	/// Malformed or inconsistent input. Nothing was written.
	#[error("Validation failed for {field}: {message}")]
	Validation { field: String, message: String },
	/// Booking overlap, duplicate identifier, or a lost atomic race.
	#[error("Conflict: {0}")]
	Conflict(String),
	/// The order's current status does not permit the requested transition.
	#[error("Invalid transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	/// The acting party lacks the role or ownership the action requires.
	#[error("Not authorized: {0}")]
	Unauthorized(String),
	#[error("Order not found: {0}")]
	NotFound(String),
	#[error("Pricing error: {0}")]
	Pricing(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl From<booking_storage::StorageError> for OrderError {
	fn from(e: booking_storage::StorageError) -> Self {
		match e {
			booking_storage::StorageError::LeaseUnavailable(resource) => {
				OrderError::Conflict(format!("{resource} is locked by another request"))
			}
			other => OrderError::Storage(other.to_string()),
		}
	}
}

impl From<booking_pricing::PricingError> for OrderError {
	fn from(e: booking_pricing::PricingError) -> Self {
		match e {
			booking_pricing::PricingError::Validation { field, message } => {
				OrderError::Validation { field, message }
			}
			other => OrderError::Pricing(other.to_string()),
		}
	}
}
