//! OSRM routing backend.
//!
//! Queries the `route` service of an OSRM-compatible server and reads the
//! distance of the first returned route. One request per resolution, no
//! retries; the resolver above decides what a failure means.

use crate::{GeoError, RoutingInterface};
use async_trait::async_trait;
use booking_types::Coordinates;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct OsrmResponse {
	code: String,
	#[serde(default)]
	routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
	/// Route length in metres.
	distance: f64,
}

/// Routing backend speaking the OSRM HTTP API.
pub struct OsrmRouter {
	endpoint: String,
	timeout: Duration,
}

impl OsrmRouter {
	pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
		Self {
			endpoint: endpoint.into(),
			timeout,
		}
	}

	fn route_url(&self, origin: Coordinates, destination: Coordinates) -> String {
		// OSRM wants lon,lat ordering.
		format!(
			"{}/route/v1/driving/{},{};{},{}?overview=false",
			self.endpoint.trim_end_matches('/'),
			origin.longitude,
			origin.latitude,
			destination.longitude,
			destination.latitude
		)
	}
}

#[async_trait]
impl RoutingInterface for OsrmRouter {
	async fn route_distance_km(
		&self,
		origin: Coordinates,
		destination: Coordinates,
	) -> Result<f64, GeoError> {
		let client = reqwest::Client::builder()
			.timeout(self.timeout)
			.build()
			.map_err(|e| GeoError::Routing(format!("Failed to create HTTP client: {}", e)))?;

		let response = client
			.get(self.route_url(origin, destination))
			.send()
			.await
			.map_err(|e| GeoError::Routing(format!("HTTP request failed: {}", e)))?;

		if !response.status().is_success() {
			return Err(GeoError::Routing(format!(
				"HTTP request failed with status: {}",
				response.status()
			)));
		}

		let body: OsrmResponse = response
			.json()
			.await
			.map_err(|e| GeoError::Routing(format!("Failed to parse response: {}", e)))?;

		if body.code != "Ok" {
			return Err(GeoError::Routing(format!(
				"Routing backend answered with code: {}",
				body.code
			)));
		}

		match body.routes.first() {
			Some(route) => Ok(route.distance / 1000.0),
			None => Err(GeoError::NoRoute),
		}
	}
}

/// Factory function to create a routing backend from configuration.
///
/// Configuration parameters:
/// - `endpoint`: Base URL of the OSRM server (default: "http://localhost:5000")
/// - `timeout_ms`: Transport-level timeout in milliseconds (default: 10000)
pub fn create_router(config: &toml::Value) -> Box<dyn RoutingInterface> {
	let endpoint = config
		.get("endpoint")
		.and_then(|v| v.as_str())
		.unwrap_or("http://localhost:5000")
		.to_string();

	let timeout_ms = config
		.get("timeout_ms")
		.and_then(|v| v.as_integer())
		.unwrap_or(10_000) as u64;

	Box::new(OsrmRouter::new(endpoint, Duration::from_millis(timeout_ms)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builds_lon_lat_ordered_urls() {
		let router = OsrmRouter::new("http://localhost:5000/", Duration::from_secs(1));
		let url = router.route_url(
			Coordinates::new(10.5, 106.75),
			Coordinates::new(10.25, 106.5),
		);
		assert_eq!(
			url,
			"http://localhost:5000/route/v1/driving/106.75,10.5;106.5,10.25?overview=false"
		);
	}

	#[test]
	fn parses_route_distances_in_metres() {
		let body = r#"{"code":"Ok","routes":[{"distance":15250.7,"duration":1290.1}]}"#;
		let parsed: OsrmResponse = serde_json::from_str(body).unwrap();
		assert_eq!(parsed.code, "Ok");
		assert_eq!(parsed.routes[0].distance, 15250.7);
	}

	#[test]
	fn tolerates_missing_routes_array() {
		let body = r#"{"code":"NoRoute"}"#;
		let parsed: OsrmResponse = serde_json::from_str(body).unwrap();
		assert!(parsed.routes.is_empty());
	}
}
