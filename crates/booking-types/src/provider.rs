//! Provider profile and travel-fee policy types.
//!
//! Profiles are owned by an external directory; the booking core only reads
//! the fields it needs for distance and fee computation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::geo::Coordinates;

/// One pricing bracket over billable distance.
///
/// Brackets are half-open `[from_km, to_km)` over the distance that remains
/// after the free radius. An absent `to_km` makes the bracket open-ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeTier {
	pub from_km: f64,
	pub to_km: Option<f64>,
	pub fee_per_km: Decimal,
}

/// A provider's travel surcharge policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelFeePolicy {
	pub enabled: bool,
	/// Distance the provider covers for free.
	pub free_distance_km: f64,
	/// Flat rate for billable distance not covered by a tier.
	pub fee_per_km: Decimal,
	#[serde(default)]
	pub tiers: Vec<FeeTier>,
	/// Upper bound on the fee, when set.
	pub max_fee: Option<Decimal>,
}

impl TravelFeePolicy {
	/// A policy that never charges.
	pub fn disabled() -> Self {
		Self {
			enabled: false,
			free_distance_km: 0.0,
			fee_per_km: Decimal::ZERO,
			tiers: Vec::new(),
			max_fee: None,
		}
	}
}

/// The slice of a provider profile the booking core consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
	pub id: String,
	pub display_name: String,
	/// Where travel distance is measured from.
	pub base_coordinates: Option<Coordinates>,
	pub travel_fee: TravelFeePolicy,
}
