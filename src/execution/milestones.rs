//! Target progress milestones

use rust_decimal::Decimal;

use crate::ledger::models::progress_pct;

/// Every threshold `t` with `before% < t <= after%`, ascending. Progress is
/// `invested / target * 100`; no target means no milestones.
pub fn crossed_milestones(before: Decimal, after: Decimal, target: Decimal, thresholds: &[u32]) -> Vec<u32> {
    let (Some(before_pct), Some(after_pct)) = (progress_pct(before, target), progress_pct(after, target)) else {
        return Vec::new();
    };

    let mut crossed: Vec<u32> = thresholds
        .iter()
        .copied()
        .filter(|t| {
            let t = Decimal::from(*t);
            before_pct < t && t <= after_pct
        })
        .collect();
    crossed.sort_unstable();
    crossed
}
