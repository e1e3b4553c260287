// ==============================================================================
// reference_stats.rs - Reference Distribution Estimation
// ==============================================================================
// Description: Resolves the mean and standard deviation a raw score is
//              standardized against, from a precomputed store or from
//              allele frequencies under Hardy-Weinberg equilibrium
// Author: Matt Barham
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.1.0
// ==============================================================================
// Priority:
//   1. Precomputed store entry (finite mu, sd > 0)
//   2. Frequencies embedded in the scoring file, over all scoreable rows
//   3. External allele-frequency table, applied the same way
//   4. None: no z-score or percentile
// Per variant with 0 < p < 1:  mu += 2·p·β,  var += 2·p·(1−p)·β²
// ==============================================================================

use crate::loader::ScoringFileLoader;
use crate::models::{RefSource, ReferenceStats, ScoringRecord};
use crate::parsers::{AlleleFreqMap, ScoringFile, ScoringFileError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors from the reference statistics store
#[derive(Error, Debug)]
pub enum ReferenceStoreError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Raised when a score cannot be standardized
#[derive(Error, Debug, Clone, Copy, PartialEq)]
#[error("No reference variance ({ref_source:?}, sd {sd})")]
pub struct NoReferenceVariance {
    pub ref_source: RefSource,
    pub sd: f64,
}

impl ReferenceStats {
    /// z = (raw − mu) / sd
    pub fn standardize(&self, raw_score: f64) -> Result<f64, NoReferenceVariance> {
        if !self.has_variance() || !self.mu.is_finite() {
            return Err(NoReferenceVariance {
                ref_source: self.source,
                sd: self.sd,
            });
        }
        Ok((raw_score - self.mu) / self.sd)
    }
}

/// Null moments read as NaN and are never usable
fn nullable_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
}

/// Precomputed moments for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoredMoments {
    #[serde(deserialize_with = "nullable_f64")]
    pub mu: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub sd: f64,
    #[serde(default)]
    pub used: usize,
}

impl From<ReferenceStats> for StoredMoments {
    fn from(stats: ReferenceStats) -> Self {
        Self {
            mu: stats.mu,
            sd: stats.sd,
            used: stats.used,
        }
    }
}

/// How a store was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub method: String,
    pub generated_at: DateTime<Utc>,
    pub model_count: usize,
}

/// Model id → precomputed reference moments
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceStore {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<StoreMeta>,
    #[serde(default)]
    pub scores: HashMap<String, StoredMoments>,
}

impl ReferenceStore {
    /// Load `{ "scores": { "<model>": { "mu": .., "sd": .., "used": .. } } }`
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ReferenceStoreError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let store: Self = serde_json::from_str(&text)?;
        info!("Loaded reference statistics for {} models", store.scores.len());
        Ok(store)
    }

    /// Usable entry for a model
    pub fn get(&self, model_id: &str) -> Option<ReferenceStats> {
        self.scores
            .get(model_id)
            .filter(|m| m.mu.is_finite() && m.sd.is_finite() && m.sd > 0.0)
            .map(|m| ReferenceStats {
                mu: m.mu,
                sd: m.sd,
                used: m.used,
                source: RefSource::Provided,
            })
    }

    pub fn insert(&mut self, model_id: impl Into<String>, moments: StoredMoments) {
        self.scores.insert(model_id.into(), moments);
    }

    /// Write the store as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReferenceStoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Wrote reference statistics for {} models to {}", self.scores.len(), path.display());
        Ok(())
    }
}

/// Precomputes reference moments for a set of models
///
/// Uses the same Hardy-Weinberg rule as scoring time: frequencies embedded in
/// the scoring file first, then the external frequency table. Models that
/// cannot be loaded or have no usable frequencies are left out of the store.
pub struct ReferenceStoreBuilder<'a> {
    loader: &'a ScoringFileLoader,
    af_map: Option<&'a AlleleFreqMap>,
}

impl<'a> ReferenceStoreBuilder<'a> {
    pub fn new(loader: &'a ScoringFileLoader, af_map: Option<&'a AlleleFreqMap>) -> Self {
        Self { loader, af_map }
    }

    /// Moments for one scoring file's text
    ///
    /// # Returns
    /// * `Ok(Some(_))` - Usable moments
    /// * `Ok(None)` - No variant carried a frequency strictly between 0 and 1
    /// * `Err(ScoringFileError)` - The text is not a scoring file
    pub fn moments(&self, text: &str) -> Result<Option<ReferenceStats>, ScoringFileError> {
        let file = ScoringFile::parse_str(text)?;
        let estimator = ReferenceStatsEstimator::new(None, self.af_map);
        Ok(estimator
            .from_file(&file.records)
            .or_else(|| estimator.from_af_map(&file.records)))
    }

    /// Load each model and collect its moments
    pub async fn build(&self, model_ids: &[String], refresh: bool) -> ReferenceStore {
        let mut store = ReferenceStore::default();
        let (mut from_file, mut from_map) = (0usize, 0usize);

        for model_id in model_ids {
            let loaded = match self.loader.load(model_id, refresh).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    warn!("Skipping {}: {}", model_id, e);
                    continue;
                }
            };
            match self.moments(&loaded.text) {
                Ok(Some(stats)) => {
                    debug!("{}: mu={:.4} sd={:.4} ({} variants)", model_id, stats.mu, stats.sd, stats.used);
                    match stats.source {
                        RefSource::FileAf => from_file += 1,
                        _ => from_map += 1,
                    }
                    store.insert(model_id.clone(), stats.into());
                }
                Ok(None) => warn!("Skipping {}: no usable allele frequencies", model_id),
                Err(e) => warn!("Skipping {}: {}", model_id, e),
            }
        }

        store.meta = Some(StoreMeta {
            method: match (from_file > 0, from_map > 0) {
                (true, false) => "hardy_weinberg_file_af",
                (false, true) => "hardy_weinberg_af_map",
                (true, true) => "hardy_weinberg_mixed",
                (false, false) => "none",
            }
            .to_string(),
            generated_at: Utc::now(),
            model_count: store.scores.len(),
        });
        info!("Built reference statistics for {}/{} models", store.scores.len(), model_ids.len());
        store
    }
}

/// Hardy-Weinberg accumulation over (frequency, beta) pairs
fn hardy_weinberg(pairs: impl Iterator<Item = (f64, f64)>, source: RefSource) -> Option<ReferenceStats> {
    let (mut mu, mut var, mut used) = (0.0, 0.0, 0usize);
    for (p, beta) in pairs {
        if !(p > 0.0 && p < 1.0) {
            continue;
        }
        mu += 2.0 * p * beta;
        var += 2.0 * p * (1.0 - p) * beta * beta;
        used += 1;
    }
    (used > 0 && var > 0.0).then(|| ReferenceStats {
        mu,
        sd: var.sqrt(),
        used,
        source,
    })
}

/// Resolves reference statistics for one model
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceStatsEstimator<'a> {
    store: Option<&'a ReferenceStore>,
    af_map: Option<&'a AlleleFreqMap>,
}

impl<'a> ReferenceStatsEstimator<'a> {
    pub fn new(store: Option<&'a ReferenceStore>, af_map: Option<&'a AlleleFreqMap>) -> Self {
        Self { store, af_map }
    }

    /// Resolve `(mu, sd)` in priority order
    ///
    /// # Returns
    /// Stats with `source = None` when nothing usable was found
    pub fn estimate(&self, model_id: &str, records: &[ScoringRecord]) -> ReferenceStats {
        let stats = self
            .store
            .and_then(|store| store.get(model_id))
            .or_else(|| self.from_file(records))
            .or_else(|| self.from_af_map(records))
            .unwrap_or_else(ReferenceStats::none);

        match stats.source {
            RefSource::None => debug!("No reference distribution for {}", model_id),
            source => info!(
                "Reference for {}: mu={:.4} sd={:.4} from {} variants ({})",
                model_id,
                stats.mu,
                stats.sd,
                stats.used,
                source.as_str()
            ),
        }
        stats
    }

    /// Theoretical moments from frequencies embedded in the scoring file
    pub fn from_file(&self, records: &[ScoringRecord]) -> Option<ReferenceStats> {
        hardy_weinberg(
            records
                .iter()
                .filter(|r| r.is_scoreable())
                .filter_map(|r| r.effect_allele_frequency.map(|p| (p, r.weight))),
            RefSource::FileAf,
        )
    }

    /// Theoretical moments from the external frequency table
    pub fn from_af_map(&self, records: &[ScoringRecord]) -> Option<ReferenceStats> {
        let af_map = self.af_map.filter(|m| !m.is_empty())?;
        hardy_weinberg(
            records.iter().filter(|r| r.is_scoreable()).filter_map(|r| {
                let rsid = r.rsid.as_deref()?;
                af_map.frequency(rsid, &r.effect_allele).map(|p| (p, r.weight))
            }),
            RefSource::AfMap,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoaderConfig;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn record(rsid: &str, weight: f64, eaf: Option<f64>) -> ScoringRecord {
        ScoringRecord {
            rsid: Some(rsid.to_string()),
            chrom: None,
            pos: None,
            effect_allele: "A".to_string(),
            other_allele: Some("G".to_string()),
            weight,
            effect_allele_frequency: eaf,
        }
    }

    #[test]
    fn test_store_takes_priority() {
        let mut store = ReferenceStore::default();
        store.insert("PGS1", StoredMoments { mu: 0.0, sd: 0.5, used: 10 });
        let records = vec![record("rs1", 0.2, Some(0.3))];

        let stats = ReferenceStatsEstimator::new(Some(&store), None).estimate("PGS1", &records);
        assert_eq!(stats.source, RefSource::Provided);
        assert_eq!(stats.sd, 0.5);
    }

    #[test]
    fn test_store_with_zero_sd_is_ignored() {
        let mut store = ReferenceStore::default();
        store.insert("PGS1", StoredMoments { mu: 0.0, sd: 0.0, used: 0 });
        let records = vec![record("rs1", 0.2, Some(0.3))];

        let stats = ReferenceStatsEstimator::new(Some(&store), None).estimate("PGS1", &records);
        assert_eq!(stats.source, RefSource::FileAf);
    }

    #[test]
    fn test_file_af_moments() {
        let records = vec![
            record("rs1", 0.2, Some(0.3)),
            record("rs2", -0.1, Some(0.5)),
            record("rs3", 0.4, Some(1.0)),
            record("rs4", f64::NAN, Some(0.2)),
        ];
        let stats = ReferenceStatsEstimator::default().estimate("PGS1", &records);

        let mu = 2.0 * 0.3 * 0.2 + 2.0 * 0.5 * -0.1;
        let var: f64 = 2.0 * 0.3 * 0.7 * 0.04 + 2.0 * 0.5 * 0.5 * 0.01;
        assert_eq!(stats.source, RefSource::FileAf);
        assert_eq!(stats.used, 2);
        assert!((stats.mu - mu).abs() < 1e-12);
        assert!((stats.sd - var.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_af_map_fallback() {
        let af_map = AlleleFreqMap::parse_str("rsid\tA\tC\tG\tT\nrs1\t0.25\t0\t0.75\t0\n").unwrap();
        let records = vec![record("rs1", 0.4, None), record("rs2", 0.3, None)];

        let stats = ReferenceStatsEstimator::new(None, Some(&af_map)).estimate("PGS1", &records);
        assert_eq!(stats.source, RefSource::AfMap);
        assert_eq!(stats.used, 1);
        assert!((stats.mu - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_no_reference() {
        let records = vec![record("rs1", 0.4, None)];
        let stats = ReferenceStatsEstimator::default().estimate("PGS1", &records);
        assert_eq!(stats.source, RefSource::None);
        assert!(stats.standardize(1.0).is_err());
    }

    #[test]
    fn test_standardize() {
        let stats = ReferenceStats {
            mu: 0.0,
            sd: 0.5,
            used: 1,
            source: RefSource::Provided,
        };
        assert!((stats.standardize(1.0).unwrap() - 2.0).abs() < 1e-12);

        let zero = ReferenceStats { sd: 0.0, ..stats };
        assert_eq!(
            zero.standardize(1.0),
            Err(NoReferenceVariance {
                ref_source: RefSource::Provided,
                sd: 0.0
            })
        );
    }

    #[test]
    fn test_store_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"scores": {{"PGS000001": {{"mu": 0.1, "sd": 0.2, "used": 5}}}}}}"#).unwrap();
        file.flush().unwrap();

        let store = ReferenceStore::from_path(file.path()).unwrap();
        let stats = store.get("PGS000001").unwrap();
        assert_eq!(stats.used, 5);
        assert!(store.get("PGS000002").is_none());
    }

    #[test]
    fn test_null_moments_are_unusable() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"scores": {{"PGS000001": {{"mu": null, "sd": null, "used": 0}}}}}}"#).unwrap();
        file.flush().unwrap();

        let store = ReferenceStore::from_path(file.path()).unwrap();
        assert!(store.get("PGS000001").is_none());
    }

    fn cache_model(cache: &Path, model_id: &str, text: &str) {
        let path = cache.join("unpacked").join(format!("{}_hmPOS_GRCh37.txt", model_id));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, text).unwrap();
    }

    #[tokio::test]
    async fn test_built_store_round_trips() {
        let dir = TempDir::new().unwrap();
        let cache = dir.path().join("cache");
        cache_model(
            &cache,
            "PGS000001",
            "rsID\teffect_allele\teffect_weight\teffect_allele_frequency\nrs1\tA\t0.2\t0.3\nrs2\tA\t-0.1\t0.5\n",
        );
        cache_model(&cache, "PGS000002", "rsID\teffect_allele\teffect_weight\nrs1\tA\t0.4\n");
        cache_model(&cache, "PGS000003", "rsID\teffect_allele\teffect_weight\nrs9\tA\t0.4\n");

        let loader = ScoringFileLoader::new(LoaderConfig {
            cache_dir: cache,
            use_remote: false,
            ..LoaderConfig::default()
        })
        .unwrap();
        let af_map = AlleleFreqMap::parse_str("rsid\tA\tC\tG\tT\nrs1\t0.25\t0\t0.75\t0\n").unwrap();
        let models: Vec<String> = ["PGS000001", "PGS000002", "PGS000003", "PGS000004"]
            .iter()
            .map(|m| m.to_string())
            .collect();

        let built = ReferenceStoreBuilder::new(&loader, Some(&af_map)).build(&models, false).await;
        assert_eq!(built.scores.len(), 2);
        let meta = built.meta.as_ref().unwrap();
        assert_eq!(meta.method, "hardy_weinberg_mixed");
        assert_eq!(meta.model_count, 2);

        let path = dir.path().join("out").join("reference_stats.json");
        built.save(&path).unwrap();
        let store = ReferenceStore::from_path(&path).unwrap();
        assert_eq!(store.meta.as_ref().unwrap().model_count, 2);

        let first = store.get("PGS000001").unwrap();
        let var: f64 = 2.0 * 0.3 * 0.7 * 0.04 + 2.0 * 0.5 * 0.5 * 0.01;
        assert_eq!(first.source, RefSource::Provided);
        assert_eq!(first.used, 2);
        assert!((first.mu - (0.12 - 0.1)).abs() < 1e-12);
        assert!((first.sd - var.sqrt()).abs() < 1e-12);

        let second = store.get("PGS000002").unwrap();
        assert!((second.mu - 0.2).abs() < 1e-12);
        assert_eq!(second.used, 1);

        assert!(store.get("PGS000003").is_none());
        assert!(store.get("PGS000004").is_none());
    }
}
