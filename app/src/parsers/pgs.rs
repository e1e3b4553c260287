// ==============================================================================
// pgs.rs - Polygenic Score (PGS) Scoring File Parser
// ==============================================================================
// Description: Parser for harmonized scoring files: header metadata, alias
//              based column resolution and record extraction
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-14
// Version: 2.0.0
// ==============================================================================
// Format: Tab-delimited text, '#key=value' metadata lines, one header row
// Example:
//   #pgs_id=PGS000001
//   #weight_type=log(OR)
//   rsID    chr_name    chr_position    effect_allele    other_allele    effect_weight    OR
//   rs123   1           100             A                G               0.0953           1.1
// ==============================================================================

use super::find_column;
use crate::models::ScoringRecord;
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

const RSID_ALIASES: &[&str] = &["hm_rsid", "hm_rsID", "rsid", "rsID"];
const CHR_ALIASES: &[&str] = &["hm_chr", "chr_name", "chrom"];
const POS_ALIASES: &[&str] = &["hm_pos", "chr_position", "position"];
const EFFECT_ALIASES: &[&str] = &["effect_allele", "hm_effect_allele", "ea", "a1"];
const OTHER_ALIASES: &[&str] = &[
    "other_allele",
    "oa",
    "hm_inferOtherAllele",
    "non_effect_allele",
    "nea",
    "a2",
];
const WEIGHT_ALIASES: &[&str] = &["effect_weight", "beta", "weight"];
const EAF_ALIASES: &[&str] = &[
    "af_eff",
    "effect_allele_frequency",
    "eaf",
    "hm_effect_allele_frequency",
    "hm_af",
    "effect_allele_frequency_in_training",
    "allele_frequency",
];
const OR_ALIASES: &[&str] = &["or", "odds_ratio"];
const HR_ALIASES: &[&str] = &["hr", "hazard_ratio"];

/// Errors that can occur during scoring file parsing
#[derive(Error, Debug)]
pub enum ScoringFileError {
    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("File has no header row")]
    EmptyFile,

    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
}

/// `#key=value` lines preceding the header row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeaderMeta {
    entries: BTreeMap<String, String>,
}

impl HeaderMeta {
    /// Parse one comment line, ignoring lines that are not `#key=value`
    fn absorb(&mut self, line: &str) {
        let Some(body) = line.trim().strip_prefix('#') else {
            return;
        };
        let Some((key, value)) = body.split_once('=') else {
            return;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || key.contains(char::is_whitespace) || value.is_empty() {
            return;
        }
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Declared scale of the weight column (e.g., "beta", "log(OR)")
    pub fn weight_type(&self) -> Option<&str> {
        self.get("weight_type").or_else(|| self.get("weightType"))
    }

    pub fn pgs_id(&self) -> Option<&str> {
        self.get("pgs_id")
    }

    pub fn trait_reported(&self) -> Option<&str> {
        self.get("trait_reported")
    }

    pub fn genome_build(&self) -> Option<&str> {
        self.get("genome_build")
            .or_else(|| self.get("HmPOS_build"))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolved column indices for one scoring file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap {
    pub rsid: Option<usize>,
    pub chrom: Option<usize>,
    pub pos: Option<usize>,
    pub effect_allele: usize,
    pub other_allele: Option<usize>,
    pub weight: usize,
    pub eaf: Option<usize>,
    pub odds_ratio: Option<usize>,
    pub hazard_ratio: Option<usize>,
}

impl ColumnMap {
    /// Resolve logical fields against a header row
    ///
    /// # Returns
    /// * `Err(ScoringFileError::MissingColumn)` - No effect allele, no weight,
    ///   or neither an rsID nor a chromosome/position pair
    pub fn resolve<S: AsRef<str>>(headers: &[S]) -> Result<Self, ScoringFileError> {
        let effect_allele =
            find_column(headers, EFFECT_ALIASES).ok_or(ScoringFileError::MissingColumn("effect_allele"))?;
        let weight = find_column(headers, WEIGHT_ALIASES).ok_or(ScoringFileError::MissingColumn("effect_weight"))?;

        let rsid = find_column(headers, RSID_ALIASES);
        let chrom = find_column(headers, CHR_ALIASES);
        let pos = find_column(headers, POS_ALIASES);
        if rsid.is_none() && (chrom.is_none() || pos.is_none()) {
            return Err(ScoringFileError::MissingColumn("rsid or chr/pos"));
        }

        Ok(Self {
            rsid,
            chrom,
            pos,
            effect_allele,
            other_allele: find_column(headers, OTHER_ALIASES),
            weight,
            eaf: find_column(headers, EAF_ALIASES),
            odds_ratio: find_column(headers, OR_ALIASES),
            hazard_ratio: find_column(headers, HR_ALIASES),
        })
    }

    pub fn has_ratio_columns(&self) -> bool {
        self.odds_ratio.is_some() || self.hazard_ratio.is_some()
    }
}

/// OR/HR values co-reported on one row
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EffectRatios {
    pub odds_ratio: Option<f64>,
    pub hazard_ratio: Option<f64>,
}

/// Parsed scoring file
#[derive(Debug, Clone, Default)]
pub struct ScoringFile {
    pub meta: HeaderMeta,
    pub columns: ColumnMap,
    /// One record per data row, in file order
    pub records: Vec<ScoringRecord>,
    /// Co-reported ratios, index-aligned with `records`
    pub ratios: Vec<EffectRatios>,
    /// Rows lacking an effect allele or a parseable weight
    pub malformed_rows: usize,
}

impl ScoringFile {
    /// Parse scoring file text
    ///
    /// # Arguments
    /// * `text` - Full decompressed file contents
    ///
    /// # Returns
    /// * `Ok(ScoringFile)` - Header metadata, column map and records
    /// * `Err(ScoringFileError)` - No header row or a required column is absent
    pub fn parse_str(text: &str) -> Result<Self, ScoringFileError> {
        let mut meta = HeaderMeta::default();
        let mut body_start = text.len();
        let mut offset = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                meta.absorb(trimmed);
            } else if !trimmed.is_empty() {
                body_start = offset;
                break;
            }
            offset += line.len();
        }

        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(true)
            .quoting(false)
            .comment(Some(b'#'))
            .trim(csv::Trim::All)
            .from_reader(text[body_start..].as_bytes());

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ScoringFileError::EmptyFile);
        }
        let columns = ColumnMap::resolve(&headers)?;

        let mut records = Vec::new();
        let mut ratios = Vec::new();
        let mut malformed_rows = 0;

        for row in reader.records() {
            let row = row?;
            if row.iter().all(str::is_empty) {
                continue;
            }
            let record = extract_record(&row, &columns);
            if !record.is_scoreable() {
                malformed_rows += 1;
            }
            if columns.has_ratio_columns() {
                ratios.push(EffectRatios {
                    odds_ratio: columns.odds_ratio.and_then(|i| parse_number(row.get(i))),
                    hazard_ratio: columns.hazard_ratio.and_then(|i| parse_number(row.get(i))),
                });
            }
            records.push(record);
        }

        debug!(
            "Parsed scoring file: {} rows, {} malformed, {} metadata keys",
            records.len(),
            malformed_rows,
            meta.entries.len()
        );

        Ok(Self {
            meta,
            columns,
            records,
            ratios,
            malformed_rows,
        })
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn extract_record(row: &csv::StringRecord, columns: &ColumnMap) -> ScoringRecord {
    let text = |idx: Option<usize>| {
        idx.and_then(|i| row.get(i))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    ScoringRecord {
        rsid: text(columns.rsid),
        chrom: text(columns.chrom),
        pos: text(columns.pos),
        effect_allele: row
            .get(columns.effect_allele)
            .unwrap_or_default()
            .to_ascii_uppercase(),
        other_allele: text(columns.other_allele).map(|s| s.to_ascii_uppercase()),
        weight: parse_number(row.get(columns.weight)).unwrap_or(f64::NAN),
        effect_allele_frequency: columns.eaf.and_then(|i| parse_number(row.get(i))),
    }
}

fn parse_number(field: Option<&str>) -> Option<f64> {
    field
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
#pgs_id=PGS000001
#trait_reported=Coronary artery disease
#weight_type = log(OR)
# free-form comment
rsID\tchr_name\tchr_position\teffect_allele\tother_allele\teffect_weight\tOR
rs1\t1\t100\ta\tg\t0.0953\t1.1
rs2\t1\t200\tC\tT\t-0.1054\t0.9
\t2\t300\tT\tA\tNA\t1.0
";

    #[test]
    fn test_parse_header_meta() {
        let file = ScoringFile::parse_str(SAMPLE).unwrap();
        assert_eq!(file.meta.pgs_id(), Some("PGS000001"));
        assert_eq!(file.meta.trait_reported(), Some("Coronary artery disease"));
        assert_eq!(file.meta.weight_type(), Some("log(OR)"));
        assert_eq!(file.meta.get("free-form"), None);
    }

    #[test]
    fn test_parse_records() {
        let file = ScoringFile::parse_str(SAMPLE).unwrap();
        assert_eq!(file.len(), 3);
        assert_eq!(file.malformed_rows, 1);

        let first = &file.records[0];
        assert_eq!(first.rsid.as_deref(), Some("rs1"));
        assert_eq!(first.effect_allele, "A");
        assert_eq!(first.other_allele.as_deref(), Some("G"));
        assert!((first.weight - 0.0953).abs() < 1e-12);

        // Missing rsid falls back to the locus key, NA weight is NaN
        let third = &file.records[2];
        assert_eq!(third.key(), "2:300");
        assert!(third.weight.is_nan());

        assert_eq!(file.ratios.len(), 3);
        assert_eq!(file.ratios[1].odds_ratio, Some(0.9));
        assert_eq!(file.ratios[1].hazard_ratio, None);
    }

    #[test]
    fn test_harmonized_columns_preferred() {
        let text = "rsID\thm_rsID\thm_chr\thm_pos\teffect_allele\tbeta\thm_af\n\
                    rs_old\trs_new\t3\t42\tG\t0.2\t0.3\n";
        let file = ScoringFile::parse_str(text).unwrap();
        let record = &file.records[0];
        assert_eq!(record.rsid.as_deref(), Some("rs_new"));
        assert_eq!(record.locus().as_deref(), Some("3:42"));
        assert_eq!(record.effect_allele_frequency, Some(0.3));
        assert!(file.ratios.is_empty());
    }

    #[test]
    fn test_missing_columns() {
        let no_weight = "rsID\teffect_allele\nrs1\tA\n";
        assert!(matches!(
            ScoringFile::parse_str(no_weight),
            Err(ScoringFileError::MissingColumn("effect_weight"))
        ));

        let no_locator = "chr_name\teffect_allele\teffect_weight\n1\tA\t0.1\n";
        assert!(matches!(
            ScoringFile::parse_str(no_locator),
            Err(ScoringFileError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_empty_file() {
        assert!(ScoringFile::parse_str("#pgs_id=PGS000002\n").is_err());
    }
}
