//! Decides whether a delta is worth sending instead of the whole file

use super::DeltaPlan;

/// Default minimum savings, in percent, for a delta to be used
pub const DEFAULT_SAVINGS_THRESHOLD: f64 = 20.0;

/// True iff the plan reuses at least `threshold_percent` of its blocks.
///
/// Below the threshold the signature fetch and instruction overhead can
/// outweigh the bytes saved.
pub fn is_worthwhile(plan: &DeltaPlan, threshold_percent: f64) -> bool {
    plan.stats.savings_percent >= threshold_percent
}
