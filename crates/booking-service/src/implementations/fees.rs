//! Config-backed platform fee policy.

use async_trait::async_trait;
use booking_config::FeeConfig;
use booking_pricing::{FeePolicyInterface, PricingError};
use rust_decimal::Decimal;

/// Fee policy that reads a fixed percentage from configuration.
pub struct ConfigFeePolicy {
	platform_fee_percent: Decimal,
}

impl ConfigFeePolicy {
	pub fn new(platform_fee_percent: Decimal) -> Self {
		Self {
			platform_fee_percent,
		}
	}
}

#[async_trait]
impl FeePolicyInterface for ConfigFeePolicy {
	async fn platform_fee_percent(&self) -> Result<Decimal, PricingError> {
		Ok(self.platform_fee_percent)
	}
}

/// Factory function to create the fee policy from configuration.
pub fn create_fee_policy(config: &FeeConfig) -> Box<dyn FeePolicyInterface> {
	Box::new(ConfigFeePolicy::new(config.platform_fee_percent))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn returns_the_configured_percentage() {
		let policy = ConfigFeePolicy::new(Decimal::new(125, 1));
		assert_eq!(
			policy.platform_fee_percent().await.unwrap(),
			Decimal::new(125, 1)
		);
	}
}
