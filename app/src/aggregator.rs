// ==============================================================================
// aggregator.rs - Result Aggregation
// ==============================================================================
// Description: Per-trait summaries over model results and the cross-trait
//              hazard composite
// Author: Matt Barham
// Created: 2026-10-16
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Composite:
//   per trait, among models with an effect size per SD, passing the ancestry
//   filter and carrying a z-score, pick max |z|; flip sign for
//   higher-is-better traits; winsorize to ±limit
//   log_hazard_total = Σ beta_per_sd × z_w
//   relative_risk    = exp(log_hazard_total)
//   index            = 1 / (1 + exp(log_hazard_total))
// ==============================================================================

use crate::config::CompositeConfig;
use crate::models::{
    CompositeExclusion, Direction, ExcludedTrait, GeneticComposite, ScoreResult, TraitContribution,
    TraitSummary,
};
use crate::parsers::{AncestryIndex, EffectSizeTable};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

/// Raised when no trait can enter the composite
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompositeError {
    #[error("Composite not aggregated: no trait has a usable effect size per SD ({} traits excluded)", .excluded.len())]
    NotAggregated { excluded: Vec<ExcludedTrait> },
}

fn group_by_trait(results: &[ScoreResult]) -> BTreeMap<&str, Vec<&ScoreResult>> {
    let mut groups: BTreeMap<&str, Vec<&ScoreResult>> = BTreeMap::new();
    for result in results {
        groups.entry(result.trait_id.as_str()).or_default().push(result);
    }
    groups
}

/// Summarize model results per trait, ordered by trait id
///
/// Percentile statistics use only results that carry a percentile.
pub fn summarize_traits(results: &[ScoreResult]) -> Vec<TraitSummary> {
    group_by_trait(results)
        .into_iter()
        .map(|(trait_id, group)| {
            let scores: Vec<f64> = group.iter().map(|r| r.raw_score).collect();
            let percentiles: Vec<f64> = group.iter().filter_map(|r| r.percentile).collect();

            TraitSummary {
                trait_id: trait_id.to_string(),
                trait_label: group.iter().find_map(|r| r.trait_label.clone()),
                model_count: group.len(),
                avg_score: mean(&scores).unwrap_or(0.0),
                max_score: scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                min_score: scores.iter().copied().fold(f64::INFINITY, f64::min),
                avg_percentile: mean(&percentiles),
                max_percentile: percentiles.iter().copied().reduce(f64::max),
                min_percentile: percentiles.iter().copied().reduce(f64::min),
                total_variants: group.iter().map(|r| r.total_variants).sum(),
            }
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Build the cross-trait hazard composite
///
/// # Arguments
/// * `results` - Every scored model
/// * `ancestry` - Evaluation ancestry per model
/// * `effect_sizes` - Effect size per SD per model
/// * `config` - Ancestry filter and winsorization limit
///
/// # Returns
/// * `Ok(GeneticComposite)` - At least one trait contributed
/// * `Err(CompositeError::NotAggregated)` - No trait contributed
pub fn hazard_composite(
    results: &[ScoreResult],
    ancestry: &AncestryIndex,
    effect_sizes: &EffectSizeTable,
    config: &CompositeConfig,
) -> Result<GeneticComposite, CompositeError> {
    let filter = config.ancestry_filter.as_deref();
    let mut contributions = Vec::new();
    let mut excluded = Vec::new();

    for (trait_id, group) in group_by_trait(results) {
        let with_effect: Vec<_> = group
            .into_iter()
            .filter_map(|r| effect_sizes.get(&r.model_id).map(|size| (r, size)))
            .collect();
        let in_ancestry: Vec<_> = with_effect
            .iter()
            .filter(|(r, _)| ancestry.passes(&r.model_id, filter))
            .collect();
        let best = in_ancestry
            .iter()
            .filter_map(|(r, size)| r.z.map(|z| (*r, *size, z)))
            .reduce(|best, cand| if cand.2.abs() > best.2.abs() { cand } else { best });

        let reason = if with_effect.is_empty() {
            Some(CompositeExclusion::NoEffectSize)
        } else if in_ancestry.is_empty() {
            Some(CompositeExclusion::AncestryMismatch)
        } else if best.is_none() {
            Some(CompositeExclusion::NoZScore)
        } else {
            None
        };

        match (best, reason) {
            (Some((result, size, z)), None) => {
                let signed = match size.direction {
                    Direction::HigherWorse => z,
                    Direction::HigherBetter => -z,
                };
                let z_w = signed.clamp(-config.winsor_limit, config.winsor_limit);
                let log_hr = size.beta_per_sd * z_w;
                debug!(
                    "Composite: {} via {} (z={:.3}, winsorized {:.3}, beta/SD={:.4})",
                    trait_id, result.model_id, z, z_w, size.beta_per_sd
                );
                contributions.push(TraitContribution {
                    trait_id: trait_id.to_string(),
                    model_id: result.model_id.clone(),
                    z: z_w,
                    beta_per_sd: size.beta_per_sd,
                    log_hr,
                    rr: log_hr.exp(),
                });
            }
            (_, reason) => {
                let reason = reason.unwrap_or(CompositeExclusion::NoZScore);
                debug!("Composite: {} excluded ({:?})", trait_id, reason);
                excluded.push(ExcludedTrait {
                    trait_id: trait_id.to_string(),
                    reason,
                });
            }
        }
    }

    if contributions.is_empty() {
        return Err(CompositeError::NotAggregated { excluded });
    }

    let log_hazard_total: f64 = contributions.iter().map(|c| c.log_hr).sum();
    info!(
        "Genetic composite over {} traits: log hazard {:.4}, relative risk {:.4}",
        contributions.len(),
        log_hazard_total,
        log_hazard_total.exp()
    );

    Ok(GeneticComposite {
        log_hazard_total,
        relative_risk: log_hazard_total.exp(),
        index: 1.0 / (1.0 + log_hazard_total.exp()),
        per_trait_contributions: contributions,
        excluded,
    })
}
