//! Pricing module for the booking system.
//!
//! Two concerns live here: the travel fee calculator, which turns a resolved
//! distance and a provider policy into a surcharge, and the financial
//! computation helpers that derive the money fields an order carries
//! (subtotal, total, final amount, deposit, remaining balance, payout).
//! Everything is deterministic; the order service decides when results are
//! written.

use async_trait::async_trait;
use booking_types::{Financials, LineItem, ProviderProfile, TravelFeePolicy};
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

pub mod financials;
pub mod travel;

pub use travel::TravelFeeQuote;

/// Errors that can occur during pricing operations.
#[derive(Debug, Error)]
pub enum PricingError {
	/// Input that cannot be priced, e.g. a discount larger than the total.
	#[error("Validation failed for {field}: {message}")]
	Validation { field: String, message: String },
	/// The fee policy source returned something unusable.
	#[error("Fee policy error: {0}")]
	Policy(String),
	/// The provider directory could not be read.
	#[error("Directory error: {0}")]
	Directory(String),
}

/// Rounds a money amount to whole currency units, halves away from zero.
pub(crate) fn round_money(amount: Decimal) -> Decimal {
	amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}

/// Trait defining the source of the platform fee applied at settlement.
#[async_trait]
pub trait FeePolicyInterface: Send + Sync {
	/// Percentage of the final amount withheld from the provider payout.
	async fn platform_fee_percent(&self) -> Result<Decimal, PricingError>;
}

/// Trait defining read access to the external provider directory.
#[async_trait]
pub trait ProviderDirectoryInterface: Send + Sync {
	/// Returns the provider's profile, or None when the id is unknown.
	async fn profile(&self, provider_id: &str) -> Result<Option<ProviderProfile>, PricingError>;
}

/// High-level pricing service.
///
/// Bundles the pure money math with the configured deposit fraction and the
/// platform fee policy seam. The service is stateless beyond its
/// configuration and safe to share.
pub struct PricingService {
	fee_policy: Box<dyn FeePolicyInterface>,
	deposit_fraction: Decimal,
}

impl PricingService {
	pub fn new(fee_policy: Box<dyn FeePolicyInterface>, deposit_fraction: Decimal) -> Self {
		Self {
			fee_policy,
			deposit_fraction,
		}
	}

	/// Travel surcharge for a resolved distance under the provider's policy.
	pub fn quote_travel_fee(&self, policy: &TravelFeePolicy, distance_km: f64) -> TravelFeeQuote {
		travel::travel_fee(policy, distance_km)
	}

	/// Full money breakdown for a new order.
	pub fn build_financials(
		&self,
		line_items: &[LineItem],
		travel_fee: Decimal,
		discount: Decimal,
	) -> Result<Financials, PricingError> {
		financials::build(line_items, travel_fee, discount, self.deposit_fraction)
	}

	/// Provider payout for a completed order, net of the platform fee.
	pub async fn settlement_amount(&self, final_amount: Decimal) -> Result<Decimal, PricingError> {
		let percent = self.fee_policy.platform_fee_percent().await?;
		if percent < Decimal::ZERO || percent >= Decimal::ONE_HUNDRED {
			return Err(PricingError::Policy(format!(
				"platform fee percent out of range: {percent}"
			)));
		}
		Ok(financials::settlement_amount(final_amount, percent))
	}
}
