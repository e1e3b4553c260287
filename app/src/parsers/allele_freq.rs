// ==============================================================================
// allele_freq.rs - Allele Frequency Lookup Table
// ==============================================================================
// Description: Per-base population allele frequencies keyed by rsID, used as
//              a fallback when a scoring file carries no frequencies
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================
// Format: Tab-delimited text with header
// Example:
//   rsid    A       C       G       T
//   rs123   0.12    0.00    0.88    0.00
// ==============================================================================

use super::find_column;
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::info;

const BASES: [char; 4] = ['A', 'C', 'G', 'T'];

/// Errors that can occur while loading an allele frequency table
#[derive(Error, Debug)]
pub enum AlleleFreqError {
    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Missing required column: {0}")]
    MissingColumn(String),
}

/// rsID → frequency of A, C, G, T
#[derive(Debug, Clone, Default)]
pub struct AlleleFreqMap {
    freqs: HashMap<String, [Option<f64>; 4]>,
}

impl AlleleFreqMap {
    /// Load a table from disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AlleleFreqError> {
        let reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(path.as_ref())?;
        let map = Self::from_csv(reader)?;
        info!("Loaded allele frequencies for {} variants", map.len());
        Ok(map)
    }

    pub fn parse_str(text: &str) -> Result<Self, AlleleFreqError> {
        let reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(text.as_bytes());
        Self::from_csv(reader)
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>) -> Result<Self, AlleleFreqError> {
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let rsid_idx = find_column(&headers, &["rsid", "rsID", "id"])
            .ok_or_else(|| AlleleFreqError::MissingColumn("rsid".to_string()))?;

        let mut base_idx = [0usize; 4];
        for (slot, base) in base_idx.iter_mut().zip(BASES) {
            *slot = find_column(&headers, &[base.to_string().as_str()])
                .ok_or_else(|| AlleleFreqError::MissingColumn(base.to_string()))?;
        }

        let mut freqs = HashMap::new();
        for row in reader.records() {
            let row = row?;
            let Some(rsid) = row.get(rsid_idx).filter(|s| !s.is_empty()) else {
                continue;
            };
            let mut entry = [None; 4];
            for (value, idx) in entry.iter_mut().zip(base_idx) {
                *value = row
                    .get(idx)
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|p| p.is_finite() && (0.0..=1.0).contains(p));
            }
            freqs.insert(rsid.to_string(), entry);
        }

        Ok(Self { freqs })
    }

    /// Frequency of `allele` at `rsid`; only single A/C/G/T alleles resolve
    pub fn frequency(&self, rsid: &str, allele: &str) -> Option<f64> {
        let mut chars = allele.chars();
        let base = chars.next()?.to_ascii_uppercase();
        if chars.next().is_some() {
            return None;
        }
        let slot = BASES.iter().position(|b| *b == base)?;
        self.freqs.get(rsid).and_then(|entry| entry[slot])
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TABLE: &str = "rsid\tA\tC\tG\tT\nrs1\t0.1\t0\t0.9\t0\nrs2\t\t0.5\tx\t0.5\n";

    #[test]
    fn test_frequency_lookup() {
        let map = AlleleFreqMap::parse_str(TABLE).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.frequency("rs1", "G"), Some(0.9));
        assert_eq!(map.frequency("rs1", "a"), Some(0.1));
        assert_eq!(map.frequency("rs2", "A"), None);
        assert_eq!(map.frequency("rs2", "G"), None);
        assert_eq!(map.frequency("rs1", "AG"), None);
        assert_eq!(map.frequency("rs9", "A"), None);
    }

    #[test]
    fn test_from_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(TABLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let map = AlleleFreqMap::from_path(file.path()).unwrap();
        assert_eq!(map.frequency("rs2", "T"), Some(0.5));
    }

    #[test]
    fn test_missing_base_column() {
        let result = AlleleFreqMap::parse_str("rsid\tA\tC\tG\nrs1\t0.1\t0.2\t0.7\n");
        assert!(matches!(result, Err(AlleleFreqError::MissingColumn(c)) if c == "T"));
    }
}
