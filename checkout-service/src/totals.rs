use common_money::{apply_bps, Rounding};
use serde::{Deserialize, Serialize};

use crate::discount::{DiscountDescriptor, DiscountRule};

/// Default service charge, 15%.
pub const SERVICE_CHARGE_BPS: u32 = 1_500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: i64,
    pub service_charge: i64,
    pub discount_amount: i64,
    pub total: i64,
}

pub fn compute_totals(subtotal: i64, discount: Option<&DiscountDescriptor>) -> OrderTotals {
    compute_totals_with_rate(subtotal, discount, SERVICE_CHARGE_BPS)
}

/// Negative subtotals are treated as zero.
pub fn compute_totals_with_rate(subtotal: i64, discount: Option<&DiscountDescriptor>, service_charge_bps: u32) -> OrderTotals {
    let subtotal = subtotal.max(0);
    let service_charge = service_charge(subtotal, service_charge_bps);
    let discount_amount = discount.map(|d| discount_amount(subtotal, d)).unwrap_or(0);
    let total = subtotal
        .saturating_add(service_charge)
        .saturating_sub(discount_amount)
        .max(0);
    OrderTotals { subtotal, service_charge, discount_amount, total }
}

/// Half-up to the nearest minor unit, matching the backend.
pub fn service_charge(subtotal: i64, bps: u32) -> i64 {
    apply_bps(subtotal.max(0), bps, Rounding::HalfUp)
}

/// Discount applied to `subtotal` only; never more than the subtotal.
pub fn discount_amount(subtotal: i64, discount: &DiscountDescriptor) -> i64 {
    let subtotal = subtotal.max(0);
    let raw = match discount.rule() {
        DiscountRule::Percentage { bps } => {
            let amount = apply_bps(subtotal, bps, Rounding::Floor);
            match discount.maximum_discount() {
                Some(cap) => amount.min(cap),
                None => amount,
            }
        }
        DiscountRule::FixedAmount { amount } => amount.min(subtotal),
    };
    raw.clamp(0, subtotal)
}
