// ==============================================================================
// genotype_converter.rs - Genotype to Dosage Conversion
// ==============================================================================
// Description: Counts effect-allele copies in consumer genotypes and provides
//              strand helpers for allele pairs
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-14
// Version: 2.0.0
// ==============================================================================
// Algorithm:
//   Given the effect allele of a scoring record:
//   - EE (e.g., AA where effect=A) → 2
//   - EX or XE (e.g., AG where effect=A) → 1
//   - XX (e.g., GG where effect=A) → 0
//   - "--", indel codes or other non-ACGT calls → None (not genotyped)
// ==============================================================================

use thiserror::Error;

/// Errors that can occur during genotype conversion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeConversionError {
    #[error("Effect allele '{0}' is not a single base")]
    MultiBaseAllele(String),
}

fn is_base(c: char) -> bool {
    matches!(c, 'A' | 'C' | 'G' | 'T')
}

/// Count copies of `effect_allele` in a two-letter genotype
///
/// # Arguments
/// * `genotype` - Two-character genotype string (e.g., "TT", "AG", "--")
/// * `effect_allele` - Single-base effect allele (e.g., "A")
///
/// # Returns
/// * `Ok(Some(dosage))` - 0, 1 or 2 copies
/// * `Ok(None)` - No-call or a genotype that is not two unambiguous bases
/// * `Err(GenotypeConversionError)` - The effect allele is not one base
///
/// # Examples
/// ```
/// use prs_engine::genotype_converter::effect_allele_dosage;
///
/// assert_eq!(effect_allele_dosage("AG", "A").unwrap(), Some(1));
/// assert_eq!(effect_allele_dosage("AA", "A").unwrap(), Some(2));
/// assert_eq!(effect_allele_dosage("GG", "A").unwrap(), Some(0));
/// assert_eq!(effect_allele_dosage("--", "A").unwrap(), None);
/// ```
pub fn effect_allele_dosage(
    genotype: &str,
    effect_allele: &str,
) -> Result<Option<u8>, GenotypeConversionError> {
    let effect = single_base(effect_allele)
        .ok_or_else(|| GenotypeConversionError::MultiBaseAllele(effect_allele.to_string()))?;

    let mut chars = genotype.chars().map(|c| c.to_ascii_uppercase());
    let (Some(first), Some(second), None) = (chars.next(), chars.next(), chars.next()) else {
        return Ok(None);
    };
    if !is_base(first) || !is_base(second) {
        return Ok(None);
    }

    Ok(Some(u8::from(first == effect) + u8::from(second == effect)))
}

/// Single upper-cased A/C/G/T base, if `allele` is exactly that
pub fn single_base(allele: &str) -> Option<char> {
    let mut chars = allele.trim().chars();
    let base = chars.next()?.to_ascii_uppercase();
    (chars.next().is_none() && is_base(base)).then_some(base)
}

/// Watson-Crick complement of a base
pub fn complement(base: char) -> Option<char> {
    match base.to_ascii_uppercase() {
        'A' => Some('T'),
        'T' => Some('A'),
        'C' => Some('G'),
        'G' => Some('C'),
        _ => None,
    }
}

/// A/T and C/G pairs read the same on both strands
pub fn is_strand_ambiguous(effect: char, other: char) -> bool {
    complement(effect) == Some(other.to_ascii_uppercase())
}

/// Resolve the other allele from an explicit column or a slash-delimited
/// alternatives field (e.g., "A/G")
///
/// A single base is taken as-is; otherwise the first single-base
/// alternative differing from the effect allele is used.
pub fn resolve_other_allele(field: Option<&str>, effect_allele: &str) -> Option<char> {
    let field = field?.trim();
    if let Some(base) = single_base(field) {
        return Some(base);
    }
    let effect = single_base(effect_allele);
    field
        .split('/')
        .filter_map(single_base)
        .find(|base| Some(*base) != effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dosage_counts() {
        assert_eq!(effect_allele_dosage("AG", "A").unwrap(), Some(1));
        assert_eq!(effect_allele_dosage("GA", "A").unwrap(), Some(1));
        assert_eq!(effect_allele_dosage("AA", "A").unwrap(), Some(2));
        assert_eq!(effect_allele_dosage("GG", "A").unwrap(), Some(0));
        assert_eq!(effect_allele_dosage("ag", "a").unwrap(), Some(1));
    }

    #[test]
    fn test_no_call_and_invalid_genotypes() {
        assert_eq!(effect_allele_dosage("--", "A").unwrap(), None);
        assert_eq!(effect_allele_dosage("A-", "A").unwrap(), None);
        assert_eq!(effect_allele_dosage("DI", "A").unwrap(), None);
        assert_eq!(effect_allele_dosage("A", "A").unwrap(), None);
        assert_eq!(effect_allele_dosage("AAA", "A").unwrap(), None);
        assert_eq!(effect_allele_dosage("NN", "A").unwrap(), None);
    }

    #[test]
    fn test_multi_base_effect_allele() {
        assert_eq!(
            effect_allele_dosage("AA", "AT"),
            Err(GenotypeConversionError::MultiBaseAllele("AT".to_string()))
        );
    }

    #[test]
    fn test_strand_ambiguity() {
        assert!(is_strand_ambiguous('A', 'T'));
        assert!(is_strand_ambiguous('G', 'c'));
        assert!(!is_strand_ambiguous('A', 'G'));
        assert!(!is_strand_ambiguous('A', 'A'));
    }

    #[test]
    fn test_resolve_other_allele() {
        assert_eq!(resolve_other_allele(Some("G"), "A"), Some('G'));
        assert_eq!(resolve_other_allele(Some("A/G"), "A"), Some('G'));
        assert_eq!(resolve_other_allele(Some("G/T"), "G"), Some('T'));
        assert_eq!(resolve_other_allele(Some("AT/C"), "A"), Some('C'));
        assert_eq!(resolve_other_allele(Some("ACT"), "A"), None);
        assert_eq!(resolve_other_allele(None, "A"), None);
    }
}
