//! Geo-distance resolution for the booking system.
//!
//! Every distance starts from a deterministic great-circle figure. When a
//! routing backend is configured, a single routed query may replace that
//! figure; any failure or timeout keeps the baseline. Resolution therefore
//! never fails and never retries, it only improves precision when the
//! network cooperates.

use async_trait::async_trait;
use booking_types::{Coordinates, DistanceResolution, DistanceSource};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Re-export implementations
pub mod implementations {
	pub mod osrm;
}

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Errors that can occur while querying a routing backend.
#[derive(Debug, Error)]
pub enum GeoError {
	/// Error that occurs when talking to the routing backend.
	#[error("Routing backend error: {0}")]
	Routing(String),
	/// Error that occurs when the backend answers without a usable route.
	#[error("Routing backend returned no route")]
	NoRoute,
}

/// Great-circle distance between two coordinates in kilometres.
pub fn haversine_km(origin: Coordinates, destination: Coordinates) -> f64 {
	let lat1 = origin.latitude.to_radians();
	let lat2 = destination.latitude.to_radians();
	let dlat = (destination.latitude - origin.latitude).to_radians();
	let dlon = (destination.longitude - origin.longitude).to_radians();

	let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
	let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
	EARTH_RADIUS_KM * c
}

fn round_km(km: f64) -> f64 {
	(km * 100.0).round() / 100.0
}

/// Trait defining the interface to a road-distance backend.
#[async_trait]
pub trait RoutingInterface: Send + Sync {
	/// Returns the driving distance between the points in kilometres.
	async fn route_distance_km(
		&self,
		origin: Coordinates,
		destination: Coordinates,
	) -> Result<f64, GeoError>;
}

/// Distance resolver combining the haversine baseline with an optional
/// routing backend.
pub struct GeoService {
	router: Option<Box<dyn RoutingInterface>>,
	request_timeout: Duration,
}

impl GeoService {
	pub fn new(router: Option<Box<dyn RoutingInterface>>, request_timeout: Duration) -> Self {
		Self {
			router,
			request_timeout,
		}
	}

	/// Resolves the distance between two points, in kilometres rounded to
	/// two decimals.
	///
	/// Makes at most one routed query, bounded by the configured timeout.
	/// The haversine figure stands in whenever the query cannot improve it.
	pub async fn resolve_distance(
		&self,
		origin: Coordinates,
		destination: Coordinates,
	) -> DistanceResolution {
		let baseline = haversine_km(origin, destination);

		if let Some(router) = &self.router {
			match tokio::time::timeout(
				self.request_timeout,
				router.route_distance_km(origin, destination),
			)
			.await
			{
				Ok(Ok(km)) => {
					return DistanceResolution {
						km: round_km(km),
						source: DistanceSource::Routed,
					};
				}
				Ok(Err(e)) => {
					debug!("routed distance query failed, keeping haversine: {}", e);
				}
				Err(_) => {
					debug!(
						timeout_ms = self.request_timeout.as_millis() as u64,
						"routed distance query timed out, keeping haversine"
					);
				}
			}
		}

		DistanceResolution {
			km: round_km(baseline),
			source: DistanceSource::Haversine,
		}
	}
}
