//! # Result Aggregator
//!
//! Adjusts each candidate's predicted cost toward the diagnosis-wide reference
//! median, ranks the candidates, keeps the best few and strips the fields that were
//! only needed for ranking.

use crate::types::ProcedurePrediction;
use std::cmp::Ordering;

/// Number of ranked procedures returned for a diagnosis.
pub const DEFAULT_MAX_RESULTS: usize = 3;

/// An adjusted cost below this share of the raw prediction is implausible and is
/// replaced by the reference median.
pub const COST_FLOOR_FRACTION: f64 = 0.1;

/// Rounds half-way cases to the even neighbour.
#[inline]
pub fn round_half_even(value: f64) -> f64 {
    value.round_ties_even()
}

/// Rounds to the nearest multiple of 100 (ties to even hundreds).
#[inline]
pub fn round_to_hundreds(value: f64) -> f64 {
    round_half_even(value / 100.0) * 100.0
}

/// Pulls a procedure's raw cost prediction toward the reference median, weighted by
/// how often the procedure is used for the diagnosis:
///
/// ```text
/// adjusted = round100(predicted - usage * (median - predicted))
/// final    = adjusted if adjusted >= 0.1 * predicted else median
/// ```
///
/// Without a reference median (direct procedure requests) the prediction is returned
/// unchanged.
pub fn adjust_cost(predicted: f64, usage_fraction: f64, reference_median: Option<f64>) -> f64 {
    let Some(median) = reference_median else {
        return predicted;
    };
    let adjusted = round_to_hundreds(predicted - usage_fraction * (median - predicted));
    if adjusted >= COST_FLOOR_FRACTION * predicted {
        adjusted
    } else {
        median
    }
}

/// Usage fraction as a percentage with two decimals.
pub fn usage_percentage(usage_fraction: f64) -> f64 {
    round_half_even(usage_fraction * 100.0 * 100.0) / 100.0
}

/// Ordinal severity of a mortality tier; unknown labels rank lowest.
pub fn mortality_severity(label: &str) -> u8 {
    match label {
        "Minor" => 1,
        "Moderate" => 2,
        "Major" => 3,
        "Extreme" => 4,
        _ => 0,
    }
}

/// A scored candidate during ranking. Unlike [`ProcedurePrediction`] it still
/// carries the mortality tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub procedure_code: String,
    pub total_costs: f64,
    pub length_of_stay: i64,
    pub mortality: String,
    pub usage_percentage: f64,
}

impl ScoredCandidate {
    /// Drops the mortality tier.
    pub fn into_output(self) -> ProcedurePrediction {
        ProcedurePrediction {
            procedure_code: self.procedure_code,
            total_costs: self.total_costs,
            length_of_stay: self.length_of_stay,
            usage_percentage: self.usage_percentage,
        }
    }
}

fn by_cost_ascending(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    a.total_costs.total_cmp(&b.total_costs)
}

/// Applies the five stable sort passes in order. Each pass re-sorts the full list,
/// so the last pass (cost ascending) dominates and the earlier passes only decide
/// the order among equal costs.
pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(by_cost_ascending);
    candidates.sort_by(|a, b| b.length_of_stay.cmp(&a.length_of_stay));
    candidates.sort_by(|a, b| b.usage_percentage.total_cmp(&a.usage_percentage));
    candidates.sort_by(|a, b| mortality_severity(&b.mortality).cmp(&mortality_severity(&a.mortality)));
    candidates.sort_by(by_cost_ascending);
}

/// Rank, truncate to `max_results`, strip mortality.
pub fn finalize(mut candidates: Vec<ScoredCandidate>, max_results: usize) -> Vec<ProcedurePrediction> {
    rank(&mut candidates);
    candidates.truncate(max_results);
    candidates
        .into_iter()
        .map(ScoredCandidate::into_output)
        .collect()
}
