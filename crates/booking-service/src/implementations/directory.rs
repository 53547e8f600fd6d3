//! Config-backed provider directory.
//!
//! Profiles live in the `[directory]` section of the service configuration.
//! Swapping this for a database or an upstream service only means writing
//! another factory; the pricing and order services see the same interface.

use async_trait::async_trait;
use booking_config::DirectoryConfig;
use booking_pricing::{PricingError, ProviderDirectoryInterface};
use booking_types::ProviderProfile;
use std::collections::HashMap;

pub struct ConfigDirectory {
	providers: HashMap<String, ProviderProfile>,
}

impl ConfigDirectory {
	pub fn new(providers: impl IntoIterator<Item = ProviderProfile>) -> Self {
		Self {
			providers: providers
				.into_iter()
				.map(|profile| (profile.id.clone(), profile))
				.collect(),
		}
	}
}

#[async_trait]
impl ProviderDirectoryInterface for ConfigDirectory {
	async fn profile(&self, provider_id: &str) -> Result<Option<ProviderProfile>, PricingError> {
		Ok(self.providers.get(provider_id).cloned())
	}
}

/// Factory function to create the directory from configuration.
pub fn create_directory(config: &DirectoryConfig) -> Box<dyn ProviderDirectoryInterface> {
	Box::new(ConfigDirectory::new(config.providers.iter().cloned()))
}
