//! Configuration schema for the booking service.
//!
//! Sections that configure pluggable backends (storage, geo routing) carry an
//! opaque `toml::Value` consumed by the factory registered for that backend.

use booking_types::ProviderProfile;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn default_section() -> toml::Value {
	toml::Value::Table(toml::map::Map::new())
}

fn default_host() -> String {
	"0.0.0.0".to_string()
}

fn default_geo_timeout_secs() -> u64 {
	3
}

fn default_deposit_fraction() -> Decimal {
	// 30% up front
	Decimal::new(30, 2)
}

fn default_delivery_grace_days() -> i64 {
	7
}

fn default_completion_grace_days() -> i64 {
	3
}

fn default_sweep_interval_secs() -> u64 {
	60
}

fn default_order_code_prefix() -> String {
	"LB".to_string()
}

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	pub service: ServiceSettings,
	pub api: ApiSettings,
	pub storage: StorageConfig,
	#[serde(default)]
	pub geo: GeoConfig,
	#[serde(default)]
	pub directory: DirectoryConfig,
	pub fees: FeeConfig,
	#[serde(default)]
	pub pricing: PricingConfig,
	#[serde(default)]
	pub lifecycle: LifecycleConfig,
}

/// Identification of this service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
	pub name: String,
}

/// HTTP API bind settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
	#[serde(default = "default_host")]
	pub host: String,
	pub port: u16,
}

/// Storage backend selection plus backend-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
	/// Name of a registered storage factory, e.g. "memory" or "file".
	pub backend: String,
	#[serde(default = "default_section")]
	pub config: toml::Value,
}

/// Distance resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
	/// Name of a registered routing factory. None disables routed queries
	/// and every distance falls back to the great-circle figure.
	pub provider: Option<String>,
	/// Budget for the single routed query.
	#[serde(default = "default_geo_timeout_secs")]
	pub request_timeout_secs: u64,
	#[serde(default = "default_section")]
	pub config: toml::Value,
}

impl Default for GeoConfig {
	fn default() -> Self {
		Self {
			provider: None,
			request_timeout_secs: default_geo_timeout_secs(),
			config: default_section(),
		}
	}
}

/// Config-backed provider directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
	#[serde(default)]
	pub providers: Vec<ProviderProfile>,
}

/// Platform fee settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
	/// Percentage of the final amount withheld from the provider payout.
	pub platform_fee_percent: Decimal,
}

/// Order pricing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
	/// Fraction of the final amount required as deposit.
	#[serde(default = "default_deposit_fraction")]
	pub deposit_fraction: Decimal,
}

impl Default for PricingConfig {
	fn default() -> Self {
		Self {
			deposit_fraction: default_deposit_fraction(),
		}
	}
}

/// Time-driven lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
	/// Days between final payment verification and the delivery deadline.
	#[serde(default = "default_delivery_grace_days")]
	pub delivery_grace_days: i64,
	/// Days after delivery during which the customer may accept or dispute.
	#[serde(default = "default_completion_grace_days")]
	pub completion_grace_days: i64,
	/// How often the sweeper looks for time-gated transitions.
	#[serde(default = "default_sweep_interval_secs")]
	pub sweep_interval_secs: u64,
	/// Prefix of human-readable order codes.
	#[serde(default = "default_order_code_prefix")]
	pub order_code_prefix: String,
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			delivery_grace_days: default_delivery_grace_days(),
			completion_grace_days: default_completion_grace_days(),
			sweep_interval_secs: default_sweep_interval_secs(),
			order_code_prefix: default_order_code_prefix(),
		}
	}
}
