//! Configuration loading for the booking service.
//!
//! Loads a TOML file, substitutes `${VAR}` references from the environment,
//! applies `LENSBOOK_`-prefixed overrides, and validates the result before
//! handing it to the engine builder.

use rust_decimal::Decimal;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

mod types;
pub use types::*;

use booking_types::TravelFeePolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "LENSBOOK_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		// Load base configuration from file
		let mut config = if let Some(file_path) = &self.file_path {
			self.load_from_file(file_path).await?
		} else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		// Apply environment variable overrides
		self.apply_env_overrides(&mut config)?;

		// Validate configuration
		self.validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<Config, ConfigError> {
		info!("Loading configuration from {:?}", file_path);
		let content = tokio::fs::read_to_string(file_path).await?;

		// Substitute environment variables
		let substituted_content = self.substitute_env_vars(&content)?;

		// Parse TOML
		let config: Config = toml::from_str(&substituted_content)
			.map_err(|e| ConfigError::ParseError(e.to_string()))?;

		Ok(config)
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		// Find and replace ${VAR_NAME} patterns
		let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		// Apply environment variable overrides for common settings
		if let Ok(host) = env::var(format!("{}HTTP_HOST", self.env_prefix)) {
			debug!("Overriding HTTP host from environment");
			config.api.host = host;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			debug!("Overriding HTTP port from environment");
			config.api.port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		Ok(())
	}

	fn validate_config(&self, config: &Config) -> Result<(), ConfigError> {
		if config.service.name.is_empty() {
			return Err(ConfigError::ValidationError(
				"Service name must not be empty".to_string(),
			));
		}

		if config.api.port == 0 {
			return Err(ConfigError::ValidationError(
				"API port must not be zero".to_string(),
			));
		}

		if config.storage.backend.is_empty() {
			return Err(ConfigError::ValidationError(
				"A storage backend must be configured".to_string(),
			));
		}

		if config.geo.request_timeout_secs == 0 {
			return Err(ConfigError::ValidationError(
				"Geo request timeout must be at least one second".to_string(),
			));
		}

		let fraction = config.pricing.deposit_fraction;
		if fraction <= Decimal::ZERO || fraction > Decimal::ONE {
			return Err(ConfigError::ValidationError(format!(
				"Deposit fraction must be within (0, 1], got {}",
				fraction
			)));
		}

		let percent = config.fees.platform_fee_percent;
		if percent < Decimal::ZERO || percent >= Decimal::ONE_HUNDRED {
			return Err(ConfigError::ValidationError(format!(
				"Platform fee percent must be within [0, 100), got {}",
				percent
			)));
		}

		if config.lifecycle.delivery_grace_days < 0
			|| config.lifecycle.completion_grace_days < 0
		{
			return Err(ConfigError::ValidationError(
				"Lifecycle grace periods must not be negative".to_string(),
			));
		}

		if config.lifecycle.sweep_interval_secs == 0 {
			return Err(ConfigError::ValidationError(
				"Sweep interval must be at least one second".to_string(),
			));
		}

		let mut seen = std::collections::HashSet::new();
		for provider in &config.directory.providers {
			if !seen.insert(provider.id.as_str()) {
				return Err(ConfigError::ValidationError(format!(
					"Duplicate provider id in directory: {}",
					provider.id
				)));
			}
			Self::validate_travel_fee_policy(&provider.id, &provider.travel_fee)?;
		}

		Ok(())
	}

	fn validate_travel_fee_policy(
		provider_id: &str,
		policy: &TravelFeePolicy,
	) -> Result<(), ConfigError> {
		let err = |message: String| Err(ConfigError::ValidationError(message));

		if policy.free_distance_km < 0.0 {
			return err(format!(
				"Provider {}: free distance must not be negative",
				provider_id
			));
		}
		if policy.fee_per_km < Decimal::ZERO {
			return err(format!(
				"Provider {}: fee per km must not be negative",
				provider_id
			));
		}
		if let Some(max_fee) = policy.max_fee {
			if max_fee < Decimal::ZERO {
				return err(format!(
					"Provider {}: max fee must not be negative",
					provider_id
				));
			}
		}

		// Tiers must be sorted and non-overlapping; an open-ended tier can
		// only come last.
		let mut covered_to = 0.0f64;
		for (index, tier) in policy.tiers.iter().enumerate() {
			if tier.fee_per_km < Decimal::ZERO {
				return err(format!(
					"Provider {}: tier {} has a negative rate",
					provider_id, index
				));
			}
			if tier.from_km < covered_to {
				return err(format!(
					"Provider {}: tier {} overlaps the previous tier",
					provider_id, index
				));
			}
			match tier.to_km {
				Some(to_km) => {
					if to_km <= tier.from_km {
						return err(format!(
							"Provider {}: tier {} is empty or inverted",
							provider_id, index
						));
					}
					covered_to = to_km;
				}
				None => {
					if index + 1 != policy.tiers.len() {
						return err(format!(
							"Provider {}: open-ended tier {} must be the last tier",
							provider_id, index
						));
					}
				}
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE_CONFIG: &str = r#"
[service]
name = "lensbook-test"

[api]
port = 8080

[storage]
backend = "memory"

[fees]
platform_fee_percent = 10
"#;

	#[test]
	fn parses_minimal_config_with_defaults() {
		let config: Config = toml::from_str(BASE_CONFIG).unwrap();
		assert_eq!(config.service.name, "lensbook-test");
		assert_eq!(config.api.host, "0.0.0.0");
		assert_eq!(config.api.port, 8080);
		assert_eq!(config.storage.backend, "memory");
		assert!(config.geo.provider.is_none());
		assert_eq!(config.geo.request_timeout_secs, 3);
		assert_eq!(config.pricing.deposit_fraction, Decimal::new(30, 2));
		assert_eq!(config.lifecycle.delivery_grace_days, 7);
		assert_eq!(config.lifecycle.completion_grace_days, 3);
		assert_eq!(config.lifecycle.order_code_prefix, "LB");
		assert!(config.directory.providers.is_empty());
	}

	#[test]
	fn parses_directory_and_geo_sections() {
		let toml = r#"
[service]
name = "lensbook-test"

[api]
host = "127.0.0.1"
port = 9000

[storage]
backend = "file"

[storage.config]
storage_path = "./data/test"

[geo]
provider = "osrm"
request_timeout_secs = 5

[geo.config]
endpoint = "http://localhost:5000"

[fees]
platform_fee_percent = 12.5

[pricing]
deposit_fraction = 0.25

[[directory.providers]]
id = "p1"
display_name = "Studio North"

[directory.providers.base_coordinates]
latitude = 10.5
longitude = 106.7

[directory.providers.travel_fee]
enabled = true
free_distance_km = 10.0
fee_per_km = 5000

[[directory.providers.travel_fee.tiers]]
from_km = 0.0
to_km = 20.0
fee_per_km = 4000

[[directory.providers.travel_fee.tiers]]
from_km = 20.0
fee_per_km = 3000
"#;
		let config: Config = toml::from_str(toml).unwrap();
		assert_eq!(config.geo.provider.as_deref(), Some("osrm"));
		assert_eq!(config.geo.request_timeout_secs, 5);
		assert_eq!(
			config.storage.config.get("storage_path").and_then(|v| v.as_str()),
			Some("./data/test")
		);
		assert_eq!(config.pricing.deposit_fraction, Decimal::new(25, 2));

		let provider = &config.directory.providers[0];
		assert_eq!(provider.id, "p1");
		assert_eq!(provider.base_coordinates.unwrap().latitude, 10.5);
		assert_eq!(provider.travel_fee.tiers.len(), 2);
		assert!(provider.travel_fee.tiers[1].to_km.is_none());

		ConfigLoader::new().validate_config(&config).unwrap();
	}

	#[test]
	fn substitutes_env_vars() {
		std::env::set_var("LENSBOOK_TEST_SUBST_BACKEND", "memory");
		let loader = ConfigLoader::new();
		let substituted = loader
			.substitute_env_vars("backend = \"${LENSBOOK_TEST_SUBST_BACKEND}\"")
			.unwrap();
		assert_eq!(substituted, "backend = \"memory\"");
	}

	#[test]
	fn missing_env_var_is_an_error() {
		let loader = ConfigLoader::new();
		let result = loader.substitute_env_vars("backend = \"${LENSBOOK_TEST_UNSET_VAR}\"");
		assert!(matches!(result, Err(ConfigError::EnvVarNotFound(_))));
	}

	#[test]
	fn env_override_replaces_port() {
		std::env::set_var("LENSBOOK_TEST_OVERRIDE_HTTP_PORT", "9999");
		let loader = ConfigLoader::new().with_env_prefix("LENSBOOK_TEST_OVERRIDE_");
		let mut config: Config = toml::from_str(BASE_CONFIG).unwrap();
		loader.apply_env_overrides(&mut config).unwrap();
		assert_eq!(config.api.port, 9999);
	}

	#[test]
	fn rejects_deposit_fraction_above_one() {
		let toml = format!("{}\n[pricing]\ndeposit_fraction = 1.5\n", BASE_CONFIG);
		let config: Config = toml::from_str(&toml).unwrap();
		let result = ConfigLoader::new().validate_config(&config);
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}

	#[test]
	fn rejects_overlapping_tiers() {
		let toml = format!(
			r#"{}
[[directory.providers]]
id = "p1"
display_name = "Studio North"

[directory.providers.travel_fee]
enabled = true
free_distance_km = 0.0
fee_per_km = 1000

[[directory.providers.travel_fee.tiers]]
from_km = 0.0
to_km = 10.0
fee_per_km = 900

[[directory.providers.travel_fee.tiers]]
from_km = 5.0
to_km = 15.0
fee_per_km = 800
"#,
			BASE_CONFIG
		);
		let config: Config = toml::from_str(&toml).unwrap();
		let result = ConfigLoader::new().validate_config(&config);
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}

	#[test]
	fn rejects_duplicate_provider_ids() {
		let toml = format!(
			r#"{}
[[directory.providers]]
id = "p1"
display_name = "Studio North"

[directory.providers.travel_fee]
enabled = false
free_distance_km = 0.0
fee_per_km = 0

[[directory.providers]]
id = "p1"
display_name = "Studio South"

[directory.providers.travel_fee]
enabled = false
free_distance_km = 0.0
fee_per_km = 0
"#,
			BASE_CONFIG
		);
		let config: Config = toml::from_str(&toml).unwrap();
		let result = ConfigLoader::new().validate_config(&config);
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}
}
