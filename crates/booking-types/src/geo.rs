//! Geographic primitives shared across the system.

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
	pub latitude: f64,
	pub longitude: f64,
}

impl Coordinates {
	pub fn new(latitude: f64, longitude: f64) -> Self {
		Self { latitude, longitude }
	}
}

/// How a distance figure was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceSource {
	/// A routing backend answered in time.
	Routed,
	/// Great-circle fallback.
	Haversine,
}

/// A resolved distance between two points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DistanceResolution {
	pub km: f64,
	pub source: DistanceSource,
}
