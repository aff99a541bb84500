//! Gas bidding

use crate::network::GasBid;

/// `value + value * pct / 100`, saturating
pub fn amplify(value: u128, pct: u64) -> u128 {
    value.saturating_add(value.saturating_mul(pct as u128) / 100)
}

impl GasBid {
    /// Bid above the observed network price so the swap lands promptly
    pub fn from_observed(observed: u128, markup_pct: u64, priority_fee_divisor: u64) -> Self {
        let divisor = priority_fee_divisor.max(1) as u128;
        Self {
            max_fee_per_gas: amplify(observed, markup_pct),
            max_priority_fee_per_gas: observed / divisor,
        }
    }
}
