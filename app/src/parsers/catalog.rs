// ==============================================================================
// catalog.rs - Catalog Metadata Tables
// ==============================================================================
// Description: Model-to-trait mapping, evaluation ancestry, trait labels and
//              per-SD effect sizes read from catalog metadata exports
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================

use super::find_column;
use crate::models::Direction;
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Default location of the catalog's score metadata export
pub const SCORES_METADATA_URL: &str =
    "https://ftp.ebi.ac.uk/pub/databases/spot/pgs/metadata/pgs_all_metadata_scores.csv";

const MODEL_ALIASES: &[&str] = &[
    "Polygenic Score (PGS) ID",
    "Evaluated Score",
    "pgs_id",
    "score_id",
    "PGS ID",
    "PGS",
    "model_id",
    "id",
];
const TRAIT_ALIASES: &[&str] = &["Mapped Trait(s) (EFO ID)", "efo_id", "trait_id"];
const BUILD_ALIASES: &[&str] = &["Original Genome Build", "genome_build"];
const ANCESTRY_ALIASES: &[&str] = &[
    "Ancestry",
    "Ancestry (broad)",
    "Sample Ancestry (broad)",
    "PGS Sample Ancestry",
    "Ancestry Category",
];

/// Errors that can occur while loading catalog metadata
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Metadata fetch failed: {0}")]
    FetchError(#[from] reqwest::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
}

fn csv_reader<R: Read>(source: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source)
}

fn headers_of<R: Read>(reader: &mut csv::Reader<R>) -> Result<Vec<String>, CatalogError> {
    Ok(reader.headers()?.iter().map(str::to_string).collect())
}

/// One scored model in the catalog metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub model_id: String,
    pub trait_ids: Vec<String>,
    pub genome_build: Option<String>,
}

/// Model↔trait mapping from the catalog score metadata CSV
#[derive(Debug, Clone, Default)]
pub struct TraitCatalog {
    entries: Vec<CatalogEntry>,
}

impl TraitCatalog {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn parse_str(text: &str) -> Result<Self, CatalogError> {
        Self::from_reader(text.as_bytes())
    }

    /// Download the metadata export
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, CatalogError> {
        info!("Fetching catalog metadata from {}", url);
        let text = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Self::parse_str(&text)
    }

    fn from_reader<R: Read>(source: R) -> Result<Self, CatalogError> {
        let mut reader = csv_reader(source);
        let headers = headers_of(&mut reader)?;
        let model_idx = find_column(&headers, MODEL_ALIASES).ok_or(CatalogError::MissingColumn("model id"))?;
        let trait_idx = find_column(&headers, TRAIT_ALIASES).ok_or(CatalogError::MissingColumn("trait id"))?;
        let build_idx = find_column(&headers, BUILD_ALIASES);

        let mut entries = Vec::new();
        for row in reader.records() {
            let row = row?;
            let Some(model_id) = row.get(model_idx).filter(|s| !s.is_empty()) else {
                continue;
            };
            let trait_ids = row
                .get(trait_idx)
                .unwrap_or_default()
                .split([',', '|', ';'])
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            entries.push(CatalogEntry {
                model_id: model_id.to_string(),
                trait_ids,
                genome_build: build_idx
                    .and_then(|i| row.get(i))
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            });
        }

        debug!("Catalog holds {} models", entries.len());
        Ok(Self { entries })
    }

    /// Model ids annotated with `trait_id`, optionally restricted to a
    /// source genome build
    pub fn models_for(&self, trait_id: &str, build: Option<&str>) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.trait_ids.iter().any(|t| t == trait_id))
            .filter(|e| match (build, e.genome_build.as_deref()) {
                (Some(want), Some(have)) => have.eq_ignore_ascii_case(want),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|e| e.model_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Model id → ancestry labels of its evaluation cohorts
#[derive(Debug, Clone, Default)]
pub struct AncestryIndex {
    ancestries: HashMap<String, Vec<String>>,
}

impl AncestryIndex {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file)
    }

    pub fn parse_str(text: &str) -> Result<Self, CatalogError> {
        Self::from_reader(text.as_bytes())
    }

    fn from_reader<R: Read>(source: R) -> Result<Self, CatalogError> {
        let mut reader = csv_reader(source);
        let headers = headers_of(&mut reader)?;
        let model_idx = find_column(&headers, MODEL_ALIASES).ok_or(CatalogError::MissingColumn("model id"))?;
        let ancestry_idx =
            find_column(&headers, ANCESTRY_ALIASES).ok_or(CatalogError::MissingColumn("ancestry"))?;

        let mut ancestries: HashMap<String, Vec<String>> = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let Some(model_id) = row.get(model_idx).filter(|s| !s.is_empty()) else {
                continue;
            };
            let labels = ancestries.entry(model_id.to_string()).or_default();
            if let Some(label) = row.get(ancestry_idx).filter(|s| !s.is_empty()) {
                if !labels.iter().any(|l| l == label) {
                    labels.push(label.to_string());
                }
            }
        }

        Ok(Self { ancestries })
    }

    pub fn ancestries(&self, model_id: &str) -> &[String] {
        self.ancestries.get(model_id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether a model passes an ancestry substring filter
    ///
    /// Models without ancestry metadata always pass.
    pub fn passes(&self, model_id: &str, filter: Option<&str>) -> bool {
        let Some(filter) = filter else {
            return true;
        };
        let labels = self.ancestries(model_id);
        if labels.is_empty() {
            return true;
        }
        let needle = filter.to_lowercase();
        labels.iter().any(|l| l.to_lowercase().contains(&needle))
    }
}

#[derive(Debug, Deserialize)]
struct TraitLabelEntry {
    id: Option<String>,
    label: Option<String>,
}

/// Trait id → display label
#[derive(Debug, Clone, Default)]
pub struct TraitLabels {
    labels: HashMap<String, String>,
}

impl TraitLabels {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse_str(&text)
    }

    /// Parse a JSON list of `{ "id": ..., "label": ... }` objects
    pub fn parse_str(text: &str) -> Result<Self, CatalogError> {
        let entries: Vec<TraitLabelEntry> = serde_json::from_str(text)?;
        let labels = entries
            .into_iter()
            .filter_map(|e| {
                let id = e.id?.trim().to_string();
                let label = e.label?.trim().to_string();
                (!id.is_empty() && !label.is_empty()).then_some((id, label))
            })
            .collect::<HashMap<_, _>>();
        info!("Loaded {} trait labels", labels.len());
        Ok(Self { labels })
    }

    pub fn label(&self, trait_id: &str) -> Option<&str> {
        self.labels.get(trait_id).map(String::as_str)
    }

    pub fn insert(&mut self, trait_id: impl Into<String>, label: impl Into<String>) {
        self.labels.insert(trait_id.into(), label.into());
    }
}

/// Per-model effect size for one SD of score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectSize {
    /// Log-scale hazard (or odds) per SD
    pub beta_per_sd: f64,
    pub direction: Direction,
}

/// Model id → effect size per SD, for the hazard composite
#[derive(Debug, Clone, Default)]
pub struct EffectSizeTable {
    sizes: HashMap<String, EffectSize>,
}

impl EffectSizeTable {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json")) {
            Self::from_json_map(&text)
        } else {
            Self::parse_str(&text)
        }
    }

    /// Parse a CSV table
    ///
    /// Per row the first finite value wins, in the order beta per SD,
    /// log(HR) per SD, log(OR) per SD, HR per SD, OR per SD; ratio forms are
    /// logged. An optional `direction` column accepts `higher_better`.
    pub fn parse_str(text: &str) -> Result<Self, CatalogError> {
        let mut reader = csv_reader(text.as_bytes());
        let headers = headers_of(&mut reader)?;
        let model_idx = find_column(&headers, MODEL_ALIASES).ok_or(CatalogError::MissingColumn("model id"))?;
        let beta_idx = find_column(&headers, &["beta_per_sd", "betaPerSD", "beta_perSD", "betaSD"]);
        let log_hr_idx = find_column(&headers, &["log_hr_per_sd", "logHR_perSD", "logHR per SD"]);
        let log_or_idx = find_column(&headers, &["log_or_per_sd", "logOR_perSD", "logOR per SD"]);
        let hr_idx = find_column(&headers, &["hr_per_sd", "HR_per_SD", "HRperSD", "HR per SD"]);
        let or_idx = find_column(&headers, &["or_per_sd", "OR_per_SD", "ORperSD", "OR per SD"]);
        let direction_idx = find_column(&headers, &["direction"]);

        let mut sizes = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let Some(model_id) = row.get(model_idx).filter(|s| !s.is_empty()) else {
                continue;
            };
            let value = |idx: Option<usize>| {
                idx.and_then(|i| row.get(i))
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|v| v.is_finite())
            };
            let ratio = |idx: Option<usize>| value(idx).filter(|v| *v > 0.0).map(f64::ln);

            let beta = value(beta_idx)
                .or_else(|| value(log_hr_idx))
                .or_else(|| value(log_or_idx))
                .or_else(|| ratio(hr_idx))
                .or_else(|| ratio(or_idx));

            if let Some(beta_per_sd) = beta {
                let direction = direction_idx
                    .and_then(|i| row.get(i))
                    .map(parse_direction)
                    .unwrap_or_default();
                sizes.insert(model_id.to_string(), EffectSize { beta_per_sd, direction });
            }
        }

        Ok(Self { sizes })
    }

    /// Parse a JSON object of model id → beta per SD
    pub fn from_json_map(text: &str) -> Result<Self, CatalogError> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let sizes = raw
            .into_iter()
            .filter_map(|(id, v)| {
                let beta_per_sd = v.as_f64().filter(|b| b.is_finite())?;
                Some((
                    id,
                    EffectSize {
                        beta_per_sd,
                        direction: Direction::default(),
                    },
                ))
            })
            .collect();
        Ok(Self { sizes })
    }

    pub fn get(&self, model_id: &str) -> Option<EffectSize> {
        self.sizes.get(model_id).copied()
    }

    pub fn insert(&mut self, model_id: impl Into<String>, size: EffectSize) {
        self.sizes.insert(model_id.into(), size);
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

fn parse_direction(value: &str) -> Direction {
    let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
    if normalized == "higher_better" {
        Direction::HigherBetter
    } else {
        Direction::HigherWorse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_models_for_trait() {
        let csv = "\
Polygenic Score (PGS) ID,PGS Name,Mapped Trait(s) (EFO ID),Original Genome Build
PGS000001,CAD_1,EFO_0001645,GRCh37
PGS000002,CAD_2,\"EFO_0001645, EFO_0000378\",GRCh38
PGS000003,T2D,EFO_0001360,GRCh37
";
        let catalog = TraitCatalog::parse_str(csv).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.models_for("EFO_0001645", None),
            vec!["PGS000001".to_string(), "PGS000002".to_string()]
        );
        assert_eq!(catalog.models_for("EFO_0001645", Some("grch37")), vec!["PGS000001".to_string()]);
        assert_eq!(catalog.models_for("EFO_0000378", None), vec!["PGS000002".to_string()]);
        assert!(catalog.models_for("EFO_9", None).is_empty());
    }

    #[test]
    fn test_ancestry_filter() {
        let csv = "\
PGS Sample Set (PSS),Evaluated Score,Ancestry (broad)
PSS1,PGS000001,European
PSS2,PGS000001,East Asian
PSS3,PGS000002,African American or Afro-Caribbean
PSS4,PGS000003,
";
        let index = AncestryIndex::parse_str(csv).unwrap();
        assert_eq!(index.ancestries("PGS000001").len(), 2);
        assert!(index.passes("PGS000001", Some("europe")));
        assert!(!index.passes("PGS000002", Some("europe")));
        // No labels recorded, or model unknown: passes
        assert!(index.passes("PGS000003", Some("europe")));
        assert!(index.passes("PGS999999", Some("europe")));
        assert!(index.passes("PGS000002", None));
    }

    #[test]
    fn test_trait_labels() {
        let json = r#"[{"id":"EFO_0001645","label":" Coronary artery disease "},{"id":"x"}]"#;
        let labels = TraitLabels::parse_str(json).unwrap();
        assert_eq!(labels.label("EFO_0001645"), Some("Coronary artery disease"));
        assert_eq!(labels.label("x"), None);
    }

    #[test]
    fn test_effect_size_precedence() {
        let csv = "\
pgs_id,beta_per_sd,HR_per_SD,OR_per_SD,direction
PGS1,0.2,1.5,,
PGS2,,2.0,,higher-better
PGS3,,,1.5,
PGS4,,,,
";
        let table = EffectSizeTable::parse_str(csv).unwrap();
        assert_eq!(table.get("PGS1").unwrap().beta_per_sd, 0.2);

        let second = table.get("PGS2").unwrap();
        assert!((second.beta_per_sd - 2.0f64.ln()).abs() < 1e-12);
        assert_eq!(second.direction, Direction::HigherBetter);

        assert!((table.get("PGS3").unwrap().beta_per_sd - 1.5f64.ln()).abs() < 1e-12);
        assert!(table.get("PGS4").is_none());
    }

    #[test]
    fn test_effect_size_json_map() {
        let table = EffectSizeTable::from_json_map(r#"{"PGS1": 0.15, "PGS2": "n/a"}"#).unwrap();
        assert_eq!(table.get("PGS1").unwrap().beta_per_sd, 0.15);
        assert!(table.get("PGS2").is_none());
    }
}
