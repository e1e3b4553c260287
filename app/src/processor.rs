// ==============================================================================
// processor.rs - Single Model Scoring Pipeline
// ==============================================================================
// Description: Loads one scoring file and runs weight-scale detection,
//              matching, reference estimation and evaluation against a
//              shared genotype index
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-18
// Version: 3.1.0
// ==============================================================================

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::evaluator::ScoreEvaluator;
use crate::loader::{LoadError, ScoringFileLoader};
use crate::matcher::{GenomeIndex, VariantMatcher};
use crate::models::ScoreResult;
use crate::parsers::{AlleleFreqMap, AncestryIndex, EffectSizeTable, ScoringFile, ScoringFileError, TraitLabels};
use crate::reference_stats::{ReferenceStatsEstimator, ReferenceStore};
use crate::weight_scale::WeightScaleDetector;

/// How a per-model failure is treated by the batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Scoring file missing or unreachable
    ResourceUnavailable,
    /// Scoring file over a size or variant ceiling
    ResourceTooLarge,
    /// Scoring file unreadable as a scoring model
    ParseSkip,
    /// Evaluation task aborted before producing a result
    Internal,
}

/// Errors that skip one model without affecting the rest of the batch
#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Invalid scoring file: {0}")]
    Parse(#[from] ScoringFileError),

    #[error("Scoring file has {count} variants (limit {limit})")]
    TooManyVariants { count: usize, limit: usize },

    #[error("Scoring file has no record with an effect allele and weight")]
    NoUsableRecords,

    #[error("Scoring task failed: {0}")]
    TaskFailed(String),
}

impl ModelError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ModelError::Load(LoadError::FileTooLarge { .. }) | ModelError::TooManyVariants { .. } => {
                ErrorCategory::ResourceTooLarge
            }
            ModelError::Load(LoadError::DecompressionFailed(_) | LoadError::InvalidUtf8)
            | ModelError::Parse(_)
            | ModelError::NoUsableRecords => ErrorCategory::ParseSkip,
            ModelError::Load(_) => ErrorCategory::ResourceUnavailable,
            ModelError::TaskFailed(_) => ErrorCategory::Internal,
        }
    }
}

/// Read-only inputs shared by every model evaluation in a run
#[derive(Debug, Default)]
pub struct ScoringContext {
    pub genome: GenomeIndex,
    pub af_map: Option<AlleleFreqMap>,
    pub reference_store: Option<ReferenceStore>,
    pub trait_labels: TraitLabels,
    pub ancestry: AncestryIndex,
    pub effect_sizes: EffectSizeTable,
}

/// Scores single models against the shared context
#[derive(Debug, Clone)]
pub struct ScoreProcessor {
    config: Arc<EngineConfig>,
    loader: ScoringFileLoader,
    context: Arc<ScoringContext>,
}

impl ScoreProcessor {
    pub fn new(config: Arc<EngineConfig>, loader: ScoringFileLoader, context: Arc<ScoringContext>) -> Self {
        Self {
            config,
            loader,
            context,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &ScoringContext {
        &self.context
    }

    /// Load and score one model
    ///
    /// # Arguments
    /// * `model_id` - Catalog id of the scoring model
    /// * `trait_id` - Trait the model is scored for
    /// * `refresh` - Bypass the scoring file cache
    pub async fn score_model(&self, model_id: &str, trait_id: &str, refresh: bool) -> Result<ScoreResult, ModelError> {
        let loaded = self.loader.load(model_id, refresh).await?;
        debug!(
            "Loaded {} from {} ({:?}, sha256 {})",
            model_id, loaded.provenance.location, loaded.provenance.freshness, loaded.provenance.sha256
        );
        self.score_text(model_id, trait_id, &loaded.text)
    }

    /// Score already-loaded scoring file text
    pub fn score_text(&self, model_id: &str, trait_id: &str, text: &str) -> Result<ScoreResult, ModelError> {
        let file = ScoringFile::parse_str(text)?;
        if file.len() > self.config.max_variants {
            return Err(ModelError::TooManyVariants {
                count: file.len(),
                limit: self.config.max_variants,
            });
        }
        if file.records.iter().all(|r| !r.is_scoreable()) {
            return Err(ModelError::NoUsableRecords);
        }
        if file.malformed_rows > 0 {
            debug!("{}: {} malformed scoring rows", model_id, file.malformed_rows);
        }
        if !file.meta.is_empty() {
            debug!(
                "{}: header build {}, trait {}",
                model_id,
                file.meta.genome_build().unwrap_or("-"),
                file.meta.trait_reported().unwrap_or("-")
            );
        }
        if let Some(declared) = file.meta.pgs_id().filter(|id| *id != model_id) {
            warn!("{}: scoring file header declares {}", model_id, declared);
        }

        let detection = WeightScaleDetector::new(self.config.weight_scale.clone()).detect(&file);
        let af_map = self.context.af_map.as_ref();

        let outcome = VariantMatcher::new(self.config.matcher.clone()).match_records(
            &self.context.genome,
            &file.records,
            af_map,
        );

        let reference = ReferenceStatsEstimator::new(self.context.reference_store.as_ref(), af_map)
            .estimate(model_id, &file.records);

        let raw = outcome.raw_score();
        let evaluation = ScoreEvaluator::new(self.config.evaluator.clone()).evaluate(
            raw,
            &outcome.stats,
            &reference,
            detection.scale,
        );

        match (evaluation.z, evaluation.percentile, evaluation.reason) {
            (_, Some(p), _) => info!("{}: raw {:.4}, percentile {:.1}", model_id, raw, p),
            (_, None, Some(reason)) => info!("{}: raw {:.4}, percentile withheld ({})", model_id, raw, reason),
            _ => info!("{}: raw {:.4}", model_id, raw),
        }

        Ok(ScoreResult {
            model_id: model_id.to_string(),
            trait_id: trait_id.to_string(),
            trait_label: self.context.trait_labels.label(trait_id).map(str::to_string),
            raw_score: raw,
            weight_scale: detection.scale,
            z: evaluation.z,
            percentile: evaluation.percentile,
            reason: evaluation.reason,
            relative_risk: evaluation.relative_risk,
            coverage: evaluation.coverage,
            reference,
            matches: outcome.matches.len(),
            total_variants: outcome.stats.n_total,
            top_variants: outcome.top_variants(self.config.top_variants),
            coverage_stats: outcome.stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use crate::models::{RefSource, SuppressionReason, Variant, WeightScale};
    use crate::reference_stats::StoredMoments;
    use tempfile::TempDir;

    fn variant(rsid: &str, genotype: &str) -> Variant {
        Variant {
            rsid: Some(rsid.to_string()),
            chrom: "1".to_string(),
            pos: rsid.trim_start_matches("rs").to_string(),
            genotype: genotype.to_string(),
        }
    }

    fn processor(dir: &TempDir, context: ScoringContext, config: EngineConfig) -> ScoreProcessor {
        let loader = ScoringFileLoader::new(LoaderConfig {
            cache_dir: dir.path().to_path_buf(),
            use_remote: false,
            ..config.loader.clone()
        })
        .unwrap();
        ScoreProcessor::new(Arc::new(config), loader, Arc::new(context))
    }

    fn context_with_reference() -> ScoringContext {
        let mut store = ReferenceStore::default();
        store.insert("PGS000001", StoredMoments { mu: 0.0, sd: 0.5, used: 3 });
        let mut labels = TraitLabels::default();
        labels.insert("EFO_1", "Test trait");
        ScoringContext {
            genome: GenomeIndex::new(vec![variant("rs1", "AA"), variant("rs2", "CC"), variant("rs3", "GT")]),
            reference_store: Some(store),
            trait_labels: labels,
            ..Default::default()
        }
    }

    const SCORING: &str = "\
#pgs_id=PGS000001
rsID\teffect_allele\tother_allele\teffect_weight
rs1\tA\tG\t0.5
rs2\tT\tC\t0.0
rs3\tC\tT\t0.0
";

    #[test]
    fn test_score_text_end_to_end() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, context_with_reference(), EngineConfig::default());

        let result = processor.score_text("PGS000001", "EFO_1", SCORING).unwrap();
        assert!((result.raw_score - 1.0).abs() < 1e-12);
        assert_eq!(result.z, Some(2.0));
        assert!((result.percentile.unwrap() - 97.7).abs() < 0.1);
        assert_eq!(result.reference.source, RefSource::Provided);
        assert_eq!(result.weight_scale, WeightScale::Unknown);
        assert_eq!(result.trait_label.as_deref(), Some("Test trait"));
        assert_eq!(result.total_variants, 3);
        assert_eq!(result.matches, 3);
        assert_eq!(result.top_variants[0].rsid.as_deref(), Some("rs1"));
    }

    #[test]
    fn test_variant_ceiling() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            max_variants: 2,
            ..EngineConfig::default()
        };
        let processor = processor(&dir, context_with_reference(), config);

        let err = processor.score_text("PGS000001", "EFO_1", SCORING).unwrap_err();
        assert!(matches!(err, ModelError::TooManyVariants { count: 3, limit: 2 }));
        assert_eq!(err.category(), ErrorCategory::ResourceTooLarge);
    }

    #[test]
    fn test_unusable_scoring_files() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, context_with_reference(), EngineConfig::default());

        let err = processor.score_text("PGS000001", "EFO_1", "rsID\teffect_allele\n").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ParseSkip);

        let err = processor
            .score_text("PGS000001", "EFO_1", "rsID\teffect_allele\teffect_weight\nrs1\tA\tNA\n")
            .unwrap_err();
        assert!(matches!(err, ModelError::NoUsableRecords));
    }

    #[test]
    fn test_empty_genome_reports_low_coverage() {
        let dir = TempDir::new().unwrap();
        let context = ScoringContext {
            genome: GenomeIndex::default(),
            ..context_with_reference()
        };
        let processor = processor(&dir, context, EngineConfig::default());

        let result = processor.score_text("PGS000001", "EFO_1", SCORING).unwrap();
        assert_eq!(result.matches, 0);
        assert_eq!(result.raw_score, 0.0);
        assert_eq!(result.reason, Some(SuppressionReason::LowCoverage));
    }

    #[tokio::test]
    async fn test_score_model_from_cache() {
        let dir = TempDir::new().unwrap();
        let processor = processor(&dir, context_with_reference(), EngineConfig::default());
        let unpacked = dir.path().join("unpacked").join("PGS000001_hmPOS_GRCh37.txt");
        std::fs::create_dir_all(unpacked.parent().unwrap()).unwrap();
        std::fs::write(&unpacked, SCORING).unwrap();

        let result = processor.score_model("PGS000001", "EFO_1", false).await.unwrap();
        assert_eq!(result.z, Some(2.0));

        let err = processor.score_model("PGS000009", "EFO_1", false).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ResourceUnavailable);
    }
}
