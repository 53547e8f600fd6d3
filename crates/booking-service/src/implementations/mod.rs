//! Concrete implementations of the booking interfaces.
//!
//! The engine builder receives factories for every pluggable backend; this
//! module decides which implementations exist in this binary and registers
//! them under the names the configuration refers to.

/// Provider directory implementations.
pub mod directory;
/// Platform fee policy implementations.
pub mod fees;

use booking_config::Config;
use booking_core::EngineBuilder;

/// An engine builder with every backend this binary ships.
pub fn engine_builder(config: Config) -> EngineBuilder {
	EngineBuilder::new(config)
		.with_storage_factory(
			"memory",
			booking_storage::implementations::memory::create_storage,
		)
		.with_storage_factory(
			"file",
			booking_storage::implementations::file::create_storage,
		)
		.with_routing_factory("osrm", booking_geo::implementations::osrm::create_router)
		.with_directory_factory(directory::create_directory)
		.with_fee_policy_factory(fees::create_fee_policy)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn registered_backends_cover_the_default_config() {
		let config: Config = toml::from_str(
			r#"
[service]
name = "lensbook-test"

[api]
port = 8080

[storage]
backend = "memory"

[geo]
provider = "osrm"

[fees]
platform_fee_percent = 10
"#,
		)
		.unwrap();
		engine_builder(config).build().unwrap();
	}
}
