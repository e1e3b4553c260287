// ==============================================================================
// models.rs - Scoring Data Models
// ==============================================================================
// Description: Data structures shared by parsing, matching, evaluation and
//              aggregation of polygenic risk scores
// Author: Matt Barham
// Created: 2026-10-12
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker from a consumer raw-genotype export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    /// SNP identifier (e.g., "rs548049170"), absent for internal ids
    pub rsid: Option<String>,
    /// Chromosome ("1"-"22", "X", "Y", "MT")
    pub chrom: String,
    /// Base pair position, kept verbatim for locus lookups
    pub pos: String,
    /// Upper-cased two-letter genotype, "--" for no-call
    pub genotype: String,
}

impl Variant {
    /// Genotype used for calls that could not be read
    pub const NO_CALL: &'static str = "--";

    /// `chromosome:position` key
    pub fn locus(&self) -> String {
        format!("{}:{}", self.chrom, self.pos)
    }

    pub fn is_no_call(&self) -> bool {
        self.genotype == Self::NO_CALL
    }
}

/// One row of an external scoring model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRecord {
    pub rsid: Option<String>,
    pub chrom: Option<String>,
    pub pos: Option<String>,
    /// Upper-cased effect allele; empty when the row carries none
    pub effect_allele: String,
    /// Other-allele field as written in the file (may be "A/G" style)
    pub other_allele: Option<String>,
    /// Effect weight; NaN when the row's weight could not be parsed
    pub weight: f64,
    pub effect_allele_frequency: Option<f64>,
}

impl ScoringRecord {
    /// A record contributes to coverage denominators only with an effect
    /// allele and a finite weight
    pub fn is_scoreable(&self) -> bool {
        !self.effect_allele.is_empty() && self.weight.is_finite()
    }

    pub fn locus(&self) -> Option<String> {
        match (self.chrom.as_deref(), self.pos.as_deref()) {
            (Some(chrom), Some(pos)) => Some(format!("{}:{}", chrom, pos)),
            _ => None,
        }
    }

    /// rsID if present, otherwise the locus
    pub fn key(&self) -> String {
        self.rsid
            .clone()
            .or_else(|| self.locus())
            .unwrap_or_default()
    }
}

/// Scale on which a model reports its effect weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScale {
    /// Linear effect size
    Beta,
    /// Natural log of an odds ratio
    LogOr,
    /// Natural log of a hazard ratio
    LogHr,
    /// Weight equals the odds ratio itself
    OrRatio,
    /// Weight equals the hazard ratio itself
    HrRatio,
    Unknown,
}

impl WeightScale {
    pub fn as_str(&self) -> &'static str {
        match self {
            WeightScale::Beta => "beta",
            WeightScale::LogOr => "log_or",
            WeightScale::LogHr => "log_hr",
            WeightScale::OrRatio => "or_ratio",
            WeightScale::HrRatio => "hr_ratio",
            WeightScale::Unknown => "unknown",
        }
    }

    /// Whether exponentiating a summed score yields a relative risk
    pub fn is_log_scale(&self) -> bool {
        matches!(self, WeightScale::LogOr | WeightScale::LogHr)
    }
}

impl fmt::Display for WeightScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring record paired with a genotyped variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub rsid: Option<String>,
    /// `chromosome:position` as given by the scoring file
    pub locus: String,
    pub genotype: String,
    pub effect_allele: String,
    pub other_allele: Option<String>,
    pub beta: f64,
    /// Copies of the effect allele (0, 1 or 2)
    pub dosage: u8,
    /// beta × dosage
    pub score: f64,
    /// Effect-allele frequency used for this record, if any
    pub af: Option<f64>,
}

/// Completeness summary of one model's matching pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    /// Data rows in the scoring file
    pub n_total: usize,
    /// Rows with an effect allele and a finite weight
    pub n_total_with_beta: usize,
    /// Rows matched to a called genotype
    pub n_matched: usize,
    /// Σ|beta| over rows with a usable weight
    pub w_total: f64,
    pub w_matched: f64,
    /// Σbeta² over rows with a usable weight
    pub q_total: f64,
    pub q_matched: f64,
    pub dropped_ambig_no_af: usize,
    pub dropped_pal_high_maf: usize,
    pub flip_suspects: usize,
    /// Hardy-Weinberg mean over matched rows with a known frequency
    pub mu_af: Option<f64>,
    pub sd_af: Option<f64>,
    pub n_af_used: usize,
}

impl CoverageStats {
    pub fn count_coverage(&self) -> Option<f64> {
        ratio(self.n_matched as f64, self.n_total_with_beta as f64)
    }

    pub fn weighted_coverage(&self) -> Option<f64> {
        ratio(self.w_matched, self.w_total)
    }

    pub fn quality_coverage(&self) -> Option<f64> {
        ratio(self.q_matched, self.q_total)
    }

    /// Weighted coverage, falling back to count coverage, else 0
    pub fn effective_coverage(&self) -> f64 {
        self.weighted_coverage()
            .or_else(|| self.count_coverage())
            .unwrap_or(0.0)
    }
}

fn ratio(num: f64, den: f64) -> Option<f64> {
    if num.is_finite() && den.is_finite() && den > 0.0 {
        Some(num / den)
    } else {
        None
    }
}

/// Where a model's reference distribution came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefSource {
    /// Precomputed reference store
    Provided,
    /// Allele frequencies embedded in the scoring file
    FileAf,
    /// External allele-frequency table
    AfMap,
    None,
}

impl RefSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefSource::Provided => "provided",
            RefSource::FileAf => "file_af",
            RefSource::AfMap => "af_map",
            RefSource::None => "none",
        }
    }
}

/// Distribution under which a raw score is standardized
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferenceStats {
    pub mu: f64,
    pub sd: f64,
    /// Variants that contributed to the estimate
    pub used: usize,
    pub source: RefSource,
}

impl ReferenceStats {
    pub fn none() -> Self {
        Self {
            mu: 0.0,
            sd: 0.0,
            used: 0,
            source: RefSource::None,
        }
    }

    /// A usable reference needs a strictly positive, finite sd
    pub fn has_variance(&self) -> bool {
        self.source != RefSource::None && self.sd.is_finite() && self.sd > 0.0
    }

    /// Mean, when a reference was resolved at all
    pub fn mean(&self) -> Option<f64> {
        (self.source != RefSource::None && self.mu.is_finite()).then_some(self.mu)
    }
}

/// Machine-readable reason a percentile was withheld
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    NoSigma,
    LowCoverage,
    ExtremeZ,
}

impl SuppressionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::NoSigma => "no_sigma",
            SuppressionReason::LowCoverage => "low_coverage",
            SuppressionReason::ExtremeZ => "extreme_z",
        }
    }
}

impl fmt::Display for SuppressionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final output for one scoring model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub model_id: String,
    pub trait_id: String,
    pub trait_label: Option<String>,
    /// Σ beta × dosage over matches
    pub raw_score: f64,
    pub weight_scale: WeightScale,
    pub z: Option<f64>,
    /// Percentile in [0.1, 99.9]
    pub percentile: Option<f64>,
    pub reason: Option<SuppressionReason>,
    /// exp(raw - mu) (or exp(raw)) for log-scale models
    pub relative_risk: Option<f64>,
    /// Coverage the evaluation gates used
    pub coverage: f64,
    pub reference: ReferenceStats,
    pub coverage_stats: CoverageStats,
    /// Number of matched records
    pub matches: usize,
    /// Data rows in the scoring file
    pub total_variants: usize,
    /// Matches with the largest |score|
    pub top_variants: Vec<Match>,
}

/// Aggregate over every model scored for one trait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitSummary {
    pub trait_id: String,
    pub trait_label: Option<String>,
    pub model_count: usize,
    pub avg_score: f64,
    pub max_score: f64,
    pub min_score: f64,
    pub avg_percentile: Option<f64>,
    pub max_percentile: Option<f64>,
    pub min_percentile: Option<f64>,
    pub total_variants: usize,
}

/// Which tail of the score distribution means higher risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    HigherWorse,
    HigherBetter,
}

/// One trait's share of the cross-trait hazard composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitContribution {
    pub trait_id: String,
    /// Representative model chosen for the trait
    pub model_id: String,
    /// Winsorized, direction-adjusted z
    pub z: f64,
    pub beta_per_sd: f64,
    pub log_hr: f64,
    pub rr: f64,
}

/// Why a trait is absent from the composite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeExclusion {
    /// No model with a resolvable effect size per SD
    NoEffectSize,
    /// No model evaluated in the configured ancestry
    AncestryMismatch,
    /// No model produced a z-score
    NoZScore,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedTrait {
    pub trait_id: String,
    pub reason: CompositeExclusion,
}

/// Cross-trait hazard aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneticComposite {
    pub log_hazard_total: f64,
    /// exp(log_hazard_total)
    pub relative_risk: f64,
    /// 1 / (1 + exp(log_hazard_total)), display only
    pub index: f64,
    pub per_trait_contributions: Vec<TraitContribution>,
    pub excluded: Vec<ExcludedTrait>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weight_scale_codes() {
        assert_eq!(WeightScale::LogOr.as_str(), "log_or");
        assert_eq!(serde_json::to_string(&WeightScale::HrRatio).unwrap(), "\"hr_ratio\"");
        assert!(WeightScale::LogHr.is_log_scale());
        assert!(!WeightScale::OrRatio.is_log_scale());
    }

    #[test]
    fn test_suppression_reason_serde() {
        let json = serde_json::to_string(&SuppressionReason::LowCoverage).unwrap();
        assert_eq!(json, "\"low_coverage\"");
        assert_eq!(SuppressionReason::NoSigma.to_string(), "no_sigma");
    }

    #[test]
    fn test_coverage_fallbacks() {
        let mut stats = CoverageStats {
            n_total: 4,
            n_total_with_beta: 4,
            n_matched: 2,
            ..Default::default()
        };
        // No weights accumulated: fall back to counts
        assert_eq!(stats.effective_coverage(), 0.5);

        stats.w_total = 4.0;
        stats.w_matched = 3.0;
        assert_eq!(stats.effective_coverage(), 0.75);

        assert_eq!(CoverageStats::default().effective_coverage(), 0.0);
    }

    #[test]
    fn test_reference_variance() {
        assert!(!ReferenceStats::none().has_variance());
        let stats = ReferenceStats {
            mu: 0.1,
            sd: 0.0,
            used: 3,
            source: RefSource::FileAf,
        };
        assert!(!stats.has_variance());
        assert_eq!(stats.mean(), Some(0.1));
    }

    #[test]
    fn test_record_key() {
        let record = ScoringRecord {
            rsid: None,
            chrom: Some("1".to_string()),
            pos: Some("100".to_string()),
            effect_allele: "A".to_string(),
            other_allele: None,
            weight: f64::NAN,
            effect_allele_frequency: None,
        };
        assert_eq!(record.key(), "1:100");
        assert!(!record.is_scoreable());
    }
}
