// ==============================================================================
// output.rs - Result File Generation
// ==============================================================================
// Description: Writes per-trait summary rows, per-model detail rows and the
//              cross-trait composite for downstream persistence
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-18
// Version: 2.1.0
// ==============================================================================
// Files:
//   summary.csv          one row per trait
//   details.csv          one row per scored model
//   composite.json       genetic composite or the exclusion list
//   outcomes.json        per-model status and per-trait failures
//   traits/<trait>.json  summary plus full model results for one trait
// ==============================================================================

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::batch::{BatchReport, ModelOutcome, TraitFailure};
use crate::models::{ScoreResult, TraitSummary};

/// One `details.csv` row
#[derive(Debug, Serialize)]
pub struct DetailRow<'a> {
    pub model_id: &'a str,
    pub trait_id: &'a str,
    pub trait_label: Option<&'a str>,
    pub raw_score: f64,
    pub weight_scale: &'static str,
    pub z: Option<f64>,
    pub percentile: Option<f64>,
    pub reason: Option<&'static str>,
    pub relative_risk: Option<f64>,
    pub coverage: f64,
    pub quality_coverage: Option<f64>,
    pub matches: usize,
    pub total_variants: usize,
    pub ref_source: &'static str,
    pub ref_mu: Option<f64>,
    pub ref_sd: Option<f64>,
    pub ref_used: usize,
    pub flip_suspects: usize,
    pub dropped_palindromic: usize,
    pub dropped_ambiguous_no_af: usize,
}

impl<'a> From<&'a ScoreResult> for DetailRow<'a> {
    fn from(result: &'a ScoreResult) -> Self {
        let reference = &result.reference;
        Self {
            model_id: &result.model_id,
            trait_id: &result.trait_id,
            trait_label: result.trait_label.as_deref(),
            raw_score: result.raw_score,
            weight_scale: result.weight_scale.as_str(),
            z: result.z,
            percentile: result.percentile,
            reason: result.reason.map(|r| r.as_str()),
            relative_risk: result.relative_risk,
            coverage: result.coverage,
            quality_coverage: result.coverage_stats.quality_coverage(),
            matches: result.matches,
            total_variants: result.total_variants,
            ref_source: reference.source.as_str(),
            ref_mu: reference.mean(),
            ref_sd: reference.has_variance().then_some(reference.sd),
            ref_used: reference.used,
            flip_suspects: result.coverage_stats.flip_suspects,
            dropped_palindromic: result.coverage_stats.dropped_pal_high_maf,
            dropped_ambiguous_no_af: result.coverage_stats.dropped_ambig_no_af,
        }
    }
}

#[derive(Debug, Serialize)]
struct TraitDetail<'a> {
    run_id: Uuid,
    summary: &'a TraitSummary,
    results: Vec<&'a ScoreResult>,
}

#[derive(Debug, Serialize)]
struct OutcomeFile<'a> {
    run_id: Uuid,
    cancelled: bool,
    models: &'a [ModelOutcome],
    trait_failures: &'a [TraitFailure],
}

/// Paths of every file written for one run
#[derive(Debug, Clone, Default)]
pub struct OutputFiles {
    pub summary: PathBuf,
    pub details: PathBuf,
    pub composite: PathBuf,
    pub outcomes: PathBuf,
    pub traits: BTreeMap<String, PathBuf>,
}

pub struct OutputGenerator {
    output_dir: PathBuf,
}

impl OutputGenerator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write every output file for a finished batch
    ///
    /// # Returns
    /// * Paths of the files written
    pub fn generate(&self, report: &BatchReport) -> Result<OutputFiles> {
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create output directory {:?}", self.output_dir))?;

        let files = OutputFiles {
            summary: self.write_summary(&report.summaries)?,
            details: self.write_details(&report.results)?,
            composite: self.write_json("composite.json", &report.composite)?,
            outcomes: self.write_json(
                "outcomes.json",
                &OutcomeFile {
                    run_id: report.run_id,
                    cancelled: report.cancelled,
                    models: &report.outcomes,
                    trait_failures: &report.trait_failures,
                },
            )?,
            traits: self.write_trait_details(report)?,
        };

        info!(
            "Wrote {} summary rows and {} detail rows to {:?}",
            report.summaries.len(),
            report.results.len(),
            self.output_dir
        );
        Ok(files)
    }

    fn write_summary(&self, summaries: &[TraitSummary]) -> Result<PathBuf> {
        let path = self.output_dir.join("summary.csv");
        let mut writer = csv::Writer::from_path(&path).context("Failed to create summary.csv")?;
        for summary in summaries {
            writer.serialize(summary).context("Failed to write summary row")?;
        }
        writer.flush().context("Failed to flush summary.csv")?;
        Ok(path)
    }

    fn write_details(&self, results: &[ScoreResult]) -> Result<PathBuf> {
        let path = self.output_dir.join("details.csv");
        let mut writer = csv::Writer::from_path(&path).context("Failed to create details.csv")?;
        for result in results {
            writer
                .serialize(DetailRow::from(result))
                .with_context(|| format!("Failed to write detail row for {}", result.model_id))?;
        }
        writer.flush().context("Failed to flush details.csv")?;
        Ok(path)
    }

    fn write_trait_details(&self, report: &BatchReport) -> Result<BTreeMap<String, PathBuf>> {
        let dir = self.output_dir.join("traits");
        std::fs::create_dir_all(&dir).context("Failed to create traits directory")?;

        let mut written = BTreeMap::new();
        for summary in &report.summaries {
            let detail = TraitDetail {
                run_id: report.run_id,
                summary,
                results: report
                    .results
                    .iter()
                    .filter(|r| r.trait_id == summary.trait_id)
                    .collect(),
            };
            let path = write_pretty(&dir.join(format!("{}.json", file_stem(&summary.trait_id))), &detail)?;
            written.insert(summary.trait_id.clone(), path);
        }
        Ok(written)
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf> {
        write_pretty(&self.output_dir.join(name), value)
    }
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> Result<PathBuf> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(file, value).with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path.to_path_buf())
}

/// File-system safe stem for a trait id
fn file_stem(trait_id: &str) -> String {
    trait_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
