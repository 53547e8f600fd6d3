//! Travel fee calculator.
//!
//! Turns a resolved distance and a provider's surcharge policy into a fee.
//! Distance inside the free radius costs nothing; the remainder is billed
//! per kilometre, either at the flat rate or through the policy's tier
//! brackets. The cap, when present, is applied last.

use booking_types::TravelFeePolicy;
use rust_decimal::Decimal;

use crate::round_money;

/// Outcome of a travel fee computation, with a display breakdown.
#[derive(Debug, Clone)]
pub struct TravelFeeQuote {
	/// Resolved distance the fee was computed from.
	pub distance_km: f64,
	/// Distance beyond the free radius.
	pub billable_km: f64,
	/// Fee in whole currency units. Never negative.
	pub fee: Decimal,
	/// True when the policy cap clamped the fee.
	pub capped: bool,
	/// Human-readable derivation, persisted for customer display.
	pub breakdown: String,
}

impl TravelFeeQuote {
	fn free(distance_km: f64, breakdown: String) -> Self {
		Self {
			distance_km,
			billable_km: 0.0,
			fee: Decimal::ZERO,
			capped: false,
			breakdown,
		}
	}
}

fn km_decimal(km: f64) -> Decimal {
	Decimal::from_f64_retain(km).unwrap_or(Decimal::ZERO)
}

/// Computes the travel surcharge for a distance under a provider policy.
///
/// Tier brackets are half-open `[from_km, to_km)` over the billable
/// distance. Billable kilometres not covered by any bracket, including gaps
/// between brackets, bill at the policy's flat rate. A non-positive or
/// non-finite distance yields a zero fee rather than an error.
pub fn travel_fee(policy: &TravelFeePolicy, distance_km: f64) -> TravelFeeQuote {
	let distance = if distance_km.is_finite() && distance_km > 0.0 {
		distance_km
	} else {
		0.0
	};

	if !policy.enabled {
		return TravelFeeQuote::free(distance, "travel fee disabled".to_string());
	}
	if distance <= policy.free_distance_km {
		return TravelFeeQuote::free(
			distance,
			format!(
				"{distance:.2} km within the free {:.2} km radius",
				policy.free_distance_km
			),
		);
	}

	let billable = distance - policy.free_distance_km;
	let mut parts = vec![format!(
		"{distance:.2} km total, {:.2} km free, {billable:.2} km billable",
		policy.free_distance_km
	)];
	let mut fee = Decimal::ZERO;
	let mut cursor = 0.0_f64;

	for tier in &policy.tiers {
		if cursor >= billable {
			break;
		}
		// Billable distance before the bracket starts bills at the flat rate.
		if tier.from_km > cursor {
			let span = tier.from_km.min(billable) - cursor;
			let amount = km_decimal(span) * policy.fee_per_km;
			parts.push(format!(
				"{span:.2} km @ {} = {}",
				policy.fee_per_km,
				round_money(amount)
			));
			fee += amount;
			cursor += span;
			if cursor >= billable {
				break;
			}
		}
		let upper = tier.to_km.unwrap_or(f64::INFINITY).min(billable);
		if upper <= cursor {
			continue;
		}
		let span = upper - cursor;
		let amount = km_decimal(span) * tier.fee_per_km;
		parts.push(format!(
			"{span:.2} km @ {} = {}",
			tier.fee_per_km,
			round_money(amount)
		));
		fee += amount;
		cursor = upper;
	}

	if cursor < billable {
		let span = billable - cursor;
		let amount = km_decimal(span) * policy.fee_per_km;
		parts.push(format!(
			"{span:.2} km @ {} = {}",
			policy.fee_per_km,
			round_money(amount)
		));
		fee += amount;
	}

	let mut fee = round_money(fee).max(Decimal::ZERO);
	let mut capped = false;
	if let Some(max_fee) = policy.max_fee {
		if fee > max_fee {
			fee = max_fee;
			capped = true;
			parts.push(format!("capped at {max_fee}"));
		}
	}
	parts.push(format!("fee {fee}"));

	TravelFeeQuote {
		distance_km: distance,
		billable_km: billable,
		fee,
		capped,
		breakdown: parts.join("; "),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use booking_types::FeeTier;

	fn flat_policy(free_km: f64, per_km: i64) -> TravelFeePolicy {
		TravelFeePolicy {
			enabled: true,
			free_distance_km: free_km,
			fee_per_km: Decimal::from(per_km),
			tiers: Vec::new(),
			max_fee: None,
		}
	}

	#[test]
	fn bills_distance_beyond_free_radius() {
		let quote = travel_fee(&flat_policy(10.0, 5000), 15.0);
		assert_eq!(quote.fee, Decimal::from(25_000));
		assert_eq!(quote.billable_km, 5.0);
		assert!(!quote.capped);
	}

	#[test]
	fn distance_inside_free_radius_is_free() {
		let quote = travel_fee(&flat_policy(10.0, 5000), 8.0);
		assert_eq!(quote.fee, Decimal::ZERO);
		assert_eq!(quote.billable_km, 0.0);
		assert!(quote.breakdown.contains("free"));
	}

	#[test]
	fn disabled_policy_never_charges() {
		let quote = travel_fee(&TravelFeePolicy::disabled(), 500.0);
		assert_eq!(quote.fee, Decimal::ZERO);
		assert_eq!(quote.breakdown, "travel fee disabled");
	}

	#[test]
	fn non_positive_distance_is_free() {
		assert_eq!(travel_fee(&flat_policy(0.0, 5000), -3.0).fee, Decimal::ZERO);
		assert_eq!(travel_fee(&flat_policy(0.0, 5000), 0.0).fee, Decimal::ZERO);
		assert_eq!(
			travel_fee(&flat_policy(0.0, 5000), f64::NAN).fee,
			Decimal::ZERO
		);
	}

	#[test]
	fn tiers_bracket_the_billable_distance() {
		let policy = TravelFeePolicy {
			enabled: true,
			free_distance_km: 10.0,
			fee_per_km: Decimal::from(5000),
			tiers: vec![
				FeeTier {
					from_km: 0.0,
					to_km: Some(20.0),
					fee_per_km: Decimal::from(4000),
				},
				FeeTier {
					from_km: 20.0,
					to_km: None,
					fee_per_km: Decimal::from(3000),
				},
			],
			max_fee: None,
		};
		// 45 km -> 35 billable: 20 @ 4000 + 15 @ 3000.
		let quote = travel_fee(&policy, 45.0);
		assert_eq!(quote.fee, Decimal::from(125_000));
	}

	#[test]
	fn distance_past_the_last_tier_bills_flat() {
		let policy = TravelFeePolicy {
			enabled: true,
			free_distance_km: 0.0,
			fee_per_km: Decimal::from(2000),
			tiers: vec![FeeTier {
				from_km: 0.0,
				to_km: Some(5.0),
				fee_per_km: Decimal::from(6000),
			}],
			max_fee: None,
		};
		// 12 billable: 5 @ 6000 + 7 @ 2000.
		let quote = travel_fee(&policy, 12.0);
		assert_eq!(quote.fee, Decimal::from(44_000));
	}

	#[test]
	fn gap_between_tiers_bills_flat() {
		let policy = TravelFeePolicy {
			enabled: true,
			free_distance_km: 0.0,
			fee_per_km: Decimal::from(1000),
			tiers: vec![
				FeeTier {
					from_km: 0.0,
					to_km: Some(3.0),
					fee_per_km: Decimal::from(5000),
				},
				FeeTier {
					from_km: 6.0,
					to_km: Some(10.0),
					fee_per_km: Decimal::from(4000),
				},
			],
			max_fee: None,
		};
		// 10 billable: 3 @ 5000 + 3 @ 1000 (gap) + 4 @ 4000.
		let quote = travel_fee(&policy, 10.0);
		assert_eq!(quote.fee, Decimal::from(34_000));
	}

	#[test]
	fn cap_clamps_the_fee_last() {
		let mut policy = flat_policy(0.0, 5000);
		policy.max_fee = Some(Decimal::from(60_000));
		let quote = travel_fee(&policy, 100.0);
		assert_eq!(quote.fee, Decimal::from(60_000));
		assert!(quote.capped);
		assert!(quote.breakdown.contains("capped at 60000"));
	}

	#[test]
	fn breakdown_explains_the_derivation() {
		let quote = travel_fee(&flat_policy(10.0, 5000), 15.0);
		assert!(quote.breakdown.contains("5.00 km @ 5000"));
		assert!(quote.breakdown.contains("fee 25000"));
	}

	#[test]
	fn fractional_distances_round_to_whole_units() {
		// 2.5 km @ 333 = 832.5, rounded half away from zero to 833.
		let quote = travel_fee(&flat_policy(0.0, 333), 2.5);
		assert_eq!(quote.fee, Decimal::from(833));
	}
}
