// ==============================================================================
// evaluator.rs - Score Evaluation
// ==============================================================================
// Description: Converts a raw score into a z-score and percentile behind
//              coverage and extremity gates
// Author: Matt Barham
// Created: 2026-10-15
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Gates (first failing gate wins):
//   no usable sd             → z = None, percentile = None, "no_sigma"
//   coverage < minimum       → z = None, percentile = None, "low_coverage"
//   |z| > max for percentile → z kept,   percentile = None, "extreme_z"
//   otherwise                → percentile = Φ(z)·100 clamped to [0.1, 99.9]
// ==============================================================================

use crate::config::EvaluatorConfig;
use crate::models::{CoverageStats, Match, ReferenceStats, SuppressionReason, WeightScale};
use serde::Serialize;
use statrs::function::erf::erf;
use tracing::{debug, warn};

const PERCENTILE_FLOOR: f64 = 0.1;
const PERCENTILE_CEIL: f64 = 99.9;

/// |z| above which a reference misspecification is likely
const WARN_ABS_Z: f64 = 6.0;

/// Standard normal cumulative distribution function
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Φ(z)·100 clamped to [0.1, 99.9]
pub fn percentile_from_z(z: f64) -> f64 {
    (normal_cdf(z) * 100.0).clamp(PERCENTILE_FLOOR, PERCENTILE_CEIL)
}

/// Σ beta × dosage
pub fn raw_score(matches: &[Match]) -> f64 {
    matches.iter().map(|m| m.score).sum()
}

/// Standardized view of one raw score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub raw_score: f64,
    pub coverage: f64,
    pub z: Option<f64>,
    pub percentile: Option<f64>,
    pub reason: Option<SuppressionReason>,
    pub relative_risk: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ScoreEvaluator {
    config: EvaluatorConfig,
}

impl ScoreEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Evaluate a raw score
    ///
    /// # Arguments
    /// * `raw_score` - Σ beta × dosage over matches
    /// * `coverage` - Coverage statistics of the matching pass
    /// * `reference` - Distribution to standardize against
    /// * `scale` - Weight scale; log scales also get a relative risk
    pub fn evaluate(
        &self,
        raw_score: f64,
        coverage: &CoverageStats,
        reference: &ReferenceStats,
        scale: WeightScale,
    ) -> Evaluation {
        let coverage = coverage.effective_coverage();
        let relative_risk = scale
            .is_log_scale()
            .then(|| (raw_score - reference.mean().unwrap_or(0.0)).exp());

        let mut evaluation = Evaluation {
            raw_score,
            coverage,
            z: None,
            percentile: None,
            reason: None,
            relative_risk,
        };

        let z = match reference.standardize(raw_score) {
            Ok(z) => z,
            Err(e) => {
                debug!("Percentile withheld: {}", e);
                evaluation.reason = Some(SuppressionReason::NoSigma);
                return evaluation;
            }
        };

        if coverage < self.config.min_weighted_coverage {
            debug!(
                "Percentile withheld: coverage {:.3} below {:.3}",
                coverage, self.config.min_weighted_coverage
            );
            evaluation.reason = Some(SuppressionReason::LowCoverage);
            return evaluation;
        }

        evaluation.z = Some(z);
        if z.abs() > WARN_ABS_Z {
            warn!(
                "Very extreme z-score {:.3}; check reference moments, allele flips and strand harmonization",
                z
            );
        }

        if z.abs() > self.config.max_abs_z_for_percentile {
            evaluation.reason = Some(SuppressionReason::ExtremeZ);
        } else {
            evaluation.percentile = Some(percentile_from_z(z));
        }
        evaluation
    }
}
