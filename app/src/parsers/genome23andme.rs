// ==============================================================================
// genome23andme.rs - Consumer Raw Genotype Parser
// ==============================================================================
// Description: Parser for 23andMe-style raw genotype exports
// Author: Matt Barham
// Created: 2025-11-04
// Modified: 2026-10-13
// Version: 2.0.0
// ==============================================================================
// Format: Tab-delimited text with header comments
// Example:
//   # rsid    chromosome    position    genotype
//   rs548049170    1    69869    TT
//   rs13328684    1    74792    --
//   rs9283150    1    565508    AA
// ==============================================================================

use crate::models::Variant;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Parsed genotype export
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGenome {
    /// Variants in file order
    pub variants: Vec<Variant>,
    /// Data lines dropped as malformed
    pub skipped_lines: usize,
}

/// Parser for consumer raw genotype files
#[derive(Debug, Clone, Default)]
pub struct Genome23Parser {
    /// Chromosomes to include (e.g., vec!["1", "2", ..., "22"])
    /// If empty, includes all chromosomes
    pub include_chromosomes: Vec<String>,
}

/// Errors that can occur during genotype parsing
#[derive(Error, Debug)]
pub enum Genome23ParseError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid line format at line {line}: {details}")]
    InvalidFormat { line: usize, details: String },
}

impl Genome23Parser {
    /// Create a new parser that includes all chromosomes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that only includes autosomal chromosomes (1-22)
    pub fn autosomal_only() -> Self {
        Self {
            include_chromosomes: (1..=22).map(|n| n.to_string()).collect(),
        }
    }

    /// Read and parse a genotype file
    ///
    /// # Arguments
    /// * `path` - Path to the raw data file (genome_*.txt)
    ///
    /// # Returns
    /// * `Ok(ParsedGenome)` - Variants plus the count of dropped lines
    /// * `Err(Genome23ParseError)` - The file could not be read
    pub async fn parse_file(&self, path: impl AsRef<Path>) -> Result<ParsedGenome, Genome23ParseError> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(self.parse_str(&text))
    }

    /// Parse genotype export text
    ///
    /// Lines starting with '#' and blank lines are skipped. Malformed lines
    /// are dropped and counted; an empty result is valid.
    pub fn parse_str(&self, text: &str) -> ParsedGenome {
        let mut parsed = ParsedGenome::default();

        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            match parse_line(line, idx + 1) {
                Ok(variant) => {
                    if self.include_chromosomes.is_empty()
                        || self.include_chromosomes.contains(&variant.chrom)
                    {
                        parsed.variants.push(variant);
                    }
                }
                Err(e) => {
                    debug!("Skipping genotype line: {}", e);
                    parsed.skipped_lines += 1;
                }
            }
        }

        debug!(
            "Parsed {} genotype calls ({} lines skipped)",
            parsed.variants.len(),
            parsed.skipped_lines
        );
        parsed
    }
}

/// Parse a single data line
fn parse_line(line: &str, line_number: usize) -> Result<Variant, Genome23ParseError> {
    let fields: Vec<&str> = line.split('\t').map(str::trim).collect();

    if fields.len() < 4 {
        return Err(Genome23ParseError::InvalidFormat {
            line: line_number,
            details: format!("Expected 4 tab-delimited fields, found {}", fields.len()),
        });
    }

    let (rsid, chrom, pos, genotype) = (fields[0], fields[1], fields[2], fields[3]);
    if chrom.is_empty() || pos.is_empty() || genotype.is_empty() {
        return Err(Genome23ParseError::InvalidFormat {
            line: line_number,
            details: "Empty chromosome, position or genotype".to_string(),
        });
    }

    let genotype = genotype.to_ascii_uppercase();
    let genotype = if genotype.len() == 2 {
        genotype
    } else {
        Variant::NO_CALL.to_string()
    };

    Ok(Variant {
        rsid: (!rsid.is_empty()).then(|| rsid.to_string()),
        chrom: chrom.to_string(),
        pos: pos.to_string(),
        genotype,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Create a temporary test file with sample genotype data
    fn create_test_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_parse_valid_file() {
        let contents = "\
# rsid\tchromosome\tposition\tgenotype
rs548049170\t1\t69869\tTT
rs13328684\t1\t74792\t--
rs9283150\t1\t565508\taa
rs12345678\t2\t100000\tAG
";
        let file = create_test_file(contents);
        let parsed = Genome23Parser::new().parse_file(file.path()).await.unwrap();
        let records = parsed.variants;

        assert_eq!(records.len(), 4);
        assert_eq!(records[0].rsid.as_deref(), Some("rs548049170"));
        assert_eq!(records[0].chrom, "1");
        assert_eq!(records[0].pos, "69869");
        assert!(records[1].is_no_call());
        // Genotypes are upper-cased
        assert_eq!(records[2].genotype, "AA");
        assert_eq!(records[3].locus(), "2:100000");
        assert_eq!(parsed.skipped_lines, 0);
    }

    #[test]
    fn test_malformed_lines_are_counted() {
        let contents = "\
rs1\t1\t100\tAA
rs2\t1\t200
rs4\t\t400\tAA
rs3\t1\t300\tAG
";
        let parsed = Genome23Parser::new().parse_str(contents);
        assert_eq!(parsed.variants.len(), 2);
        assert_eq!(parsed.skipped_lines, 2);
    }

    #[test]
    fn test_empty_input_is_valid() {
        let parsed = Genome23Parser::new().parse_str("# only comments\n\n");
        assert!(parsed.variants.is_empty());
        assert_eq!(parsed.skipped_lines, 0);
    }

    #[test]
    fn test_odd_genotype_length_is_no_call() {
        let parsed = Genome23Parser::new().parse_str("rs1\tX\t100\tA\nrs2\t1\t5\tAGT\n");
        assert_eq!(parsed.variants.len(), 2);
        assert!(parsed.variants.iter().all(|v| v.is_no_call()));
    }

    #[test]
    fn test_autosomal_only() {
        let contents = "\
rs548049170\t1\t69869\tTT
rs12345678\tX\t100000\tAG
rs98765432\t22\t200000\tCC
rs22222222\tMT\t400000\tAA
";
        let parsed = Genome23Parser::autosomal_only().parse_str(contents);
        assert_eq!(parsed.variants.len(), 2);
        assert_eq!(parsed.variants[1].chrom, "22");
    }

    #[test]
    fn test_whitespace_handling() {
        let parsed = Genome23Parser::new().parse_str("  rs548049170  \t  1  \t  69869  \t  TT\n");
        assert_eq!(parsed.variants.len(), 1);
        assert_eq!(parsed.variants[0].rsid.as_deref(), Some("rs548049170"));
        assert_eq!(parsed.variants[0].pos, "69869");
    }
}
