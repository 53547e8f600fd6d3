//! Financial computation engine.
//!
//! Derives the money fields of an order from its priced line items, travel
//! fee, and discount. All functions are pure.

use booking_types::{Financials, LineItem};
use rust_decimal::Decimal;

use crate::{round_money, PricingError};

/// Sum of the line item amounts.
pub fn subtotal(line_items: &[LineItem]) -> Decimal {
	line_items.iter().map(|item| item.amount).sum()
}

/// Builds the money breakdown for a new order.
///
/// `total = subtotal + travel_fee` and `final = total - discount`. The
/// deposit is the given fraction of the final amount, rounded to whole
/// currency units. It is computed exactly once here; later corrections to
/// the other fields never touch it.
pub fn build(
	line_items: &[LineItem],
	travel_fee: Decimal,
	discount: Decimal,
	deposit_fraction: Decimal,
) -> Result<Financials, PricingError> {
	if line_items.is_empty() {
		return Err(PricingError::Validation {
			field: "line_items".to_string(),
			message: "at least one line item is required".to_string(),
		});
	}
	if let Some(bad) = line_items.iter().find(|item| item.amount < Decimal::ZERO) {
		return Err(PricingError::Validation {
			field: "line_items".to_string(),
			message: format!("line item '{}' has a negative amount", bad.description),
		});
	}
	if discount < Decimal::ZERO {
		return Err(PricingError::Validation {
			field: "discount".to_string(),
			message: "discount must not be negative".to_string(),
		});
	}

	let service_subtotal = subtotal(line_items);
	let total = service_subtotal + travel_fee;
	if discount > total {
		return Err(PricingError::Validation {
			field: "discount".to_string(),
			message: format!("discount {discount} exceeds the order total {total}"),
		});
	}
	let final_amount = total - discount;
	let deposit_required = round_money(final_amount * deposit_fraction);

	Ok(Financials {
		service_subtotal,
		travel_fee,
		total,
		discount,
		final_amount,
		deposit_required,
	})
}

/// Balance owed after the deposit is confirmed.
pub fn remaining_amount(final_amount: Decimal, deposit_amount: Decimal) -> Decimal {
	final_amount - deposit_amount
}

/// Provider payout: the final amount minus the platform's rounded cut.
pub fn settlement_amount(final_amount: Decimal, platform_fee_percent: Decimal) -> Decimal {
	let fee = round_money(final_amount * platform_fee_percent / Decimal::ONE_HUNDRED);
	final_amount - fee
}
