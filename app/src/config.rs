// ==============================================================================
// config.rs - Engine Configuration
// ==============================================================================
// Description: Tunable thresholds and resource limits for scoring runs, plus
//              the JSON job file that describes one batch
// Author: Matt Barham
// Created: 2026-10-13
// Modified: 2026-10-18
// Version: 1.1.0
// ==============================================================================

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Strand-ambiguity safeguards applied while matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Palindromic records are dropped at or above this minor-allele frequency
    pub palindrome_max_maf: f64,
    /// Drop palindromic records whose frequency cannot be resolved
    pub drop_ambiguous_without_af: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            palindrome_max_maf: 0.42,
            drop_ambiguous_without_af: true,
        }
    }
}

/// Gates that withhold unreliable percentiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub min_weighted_coverage: f64,
    pub max_abs_z_for_percentile: f64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            min_weighted_coverage: 0.6,
            max_abs_z_for_percentile: 5.0,
        }
    }
}

/// Scoring file cache and download settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub cache_dir: PathBuf,
    pub base_url: String,
    pub genome_build: String,
    /// Ceiling on decompressed scoring file size
    pub max_decompressed_bytes: u64,
    pub fetch_timeout_secs: u64,
    pub fetch_retries: u32,
    pub retry_delay_ms: u64,
    /// Fall back to the remote archive when the cache misses
    pub use_remote: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./pgs_scores"),
            base_url: "https://ftp.ebi.ac.uk/pub/databases/spot/pgs/scores".to_string(),
            genome_build: "GRCh37".to_string(),
            max_decompressed_bytes: 10 * 1024 * 1024,
            fetch_timeout_secs: 60,
            fetch_retries: 3,
            retry_delay_ms: 2000,
            use_remote: true,
        }
    }
}

impl LoaderConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Weight-scale inference tolerances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightScaleConfig {
    /// Rows with a usable weight inspected per file
    pub sample_rows: usize,
    pub eps_tight: f64,
    pub eps_loose: f64,
}

impl Default for WeightScaleConfig {
    fn default() -> Self {
        Self {
            sample_rows: 200,
            eps_tight: 1e-6,
            eps_loose: 5e-3,
        }
    }
}

/// Cross-trait hazard composite settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Case-insensitive substring required in a model's evaluation ancestry
    pub ancestry_filter: Option<String>,
    pub winsor_limit: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            ancestry_filter: Some("europe".to_string()),
            winsor_limit: 3.0,
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matcher: MatcherConfig,
    pub evaluator: EvaluatorConfig,
    pub loader: LoaderConfig,
    pub weight_scale: WeightScaleConfig,
    pub composite: CompositeConfig,
    /// Scoring files with more data rows are skipped
    pub max_variants: usize,
    pub top_variants: usize,
    /// Models scored concurrently
    pub concurrency: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            evaluator: EvaluatorConfig::default(),
            loader: LoaderConfig::default(),
            weight_scale: WeightScaleConfig::default(),
            composite: CompositeConfig::default(),
            max_variants: 1_000_000,
            top_variants: 10,
            concurrency: 5,
        }
    }
}

/// Batch description read from `--job`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFile {
    pub engine: EngineConfig,
    pub genome: Option<PathBuf>,
    /// Keep only chromosomes 1-22 from the genotype file
    pub autosomal_only: bool,
    pub traits: Vec<String>,
    /// Explicit trait → model ids; takes precedence over the catalog
    pub trait_models: BTreeMap<String, Vec<String>>,
    pub catalog: Option<PathBuf>,
    pub af_map: Option<PathBuf>,
    pub reference_stats: Option<PathBuf>,
    pub trait_labels: Option<PathBuf>,
    pub ancestry: Option<PathBuf>,
    pub effect_sizes: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

impl JobFile {
    /// Load a job file
    ///
    /// # Arguments
    /// * `path` - JSON file; absent keys take their defaults
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("Invalid job file {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.matcher.palindrome_max_maf, 0.42);
        assert!(config.matcher.drop_ambiguous_without_af);
        assert_eq!(config.evaluator.min_weighted_coverage, 0.6);
        assert_eq!(config.evaluator.max_abs_z_for_percentile, 5.0);
        assert_eq!(config.loader.max_decompressed_bytes, 10 * 1024 * 1024);
        assert_eq!(config.weight_scale.sample_rows, 200);
        assert_eq!(config.composite.ancestry_filter.as_deref(), Some("europe"));
        assert_eq!(config.concurrency, 5);
    }

    #[test]
    fn test_partial_job_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "genome": "genome.txt",
                "traits": ["EFO_0001645"],
                "trait_models": {{"EFO_0001645": ["PGS000001"]}},
                "engine": {{"evaluator": {{"min_weighted_coverage": 0.8}}, "concurrency": 2}}
            }}"#
        )
        .unwrap();

        let job = JobFile::from_path(file.path()).unwrap();
        assert_eq!(job.genome, Some(PathBuf::from("genome.txt")));
        assert_eq!(job.trait_models["EFO_0001645"], vec!["PGS000001".to_string()]);
        assert_eq!(job.engine.evaluator.min_weighted_coverage, 0.8);
        // Unspecified keys keep their defaults
        assert_eq!(job.engine.evaluator.max_abs_z_for_percentile, 5.0);
        assert_eq!(job.engine.concurrency, 2);
        assert_eq!(job.engine.top_variants, 10);
    }
}
