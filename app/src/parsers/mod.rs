// ==============================================================================
// parsers/mod.rs - File parser modules
// ==============================================================================
// Description: Parsers for genotype exports, scoring files and the lookup
//              tables consulted while scoring
// Author: Matt Barham
// Created: 2025-11-03
// Modified: 2026-10-14
// Version: 2.0.0
// ==============================================================================

pub mod allele_freq;
pub mod catalog;
pub mod genome23andme;
pub mod pgs;

pub use allele_freq::{AlleleFreqError, AlleleFreqMap};
pub use catalog::{AncestryIndex, CatalogError, EffectSize, EffectSizeTable, TraitCatalog, TraitLabels};
pub use genome23andme::{Genome23ParseError, Genome23Parser, ParsedGenome};
pub use pgs::{ColumnMap, EffectRatios, HeaderMeta, ScoringFile, ScoringFileError};

/// Index of the first header matching one of `aliases`
///
/// Aliases are probed in order and compared case-insensitively, so the
/// earliest alias wins even when a later one appears first in the header.
pub fn find_column<S: AsRef<str>>(headers: &[S], aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| {
        headers
            .iter()
            .position(|h| h.as_ref().trim().eq_ignore_ascii_case(alias))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_column_alias_order() {
        let headers = ["rsID", "chr_name", "hm_rsID", "effect_weight"];
        assert_eq!(find_column(&headers, &["hm_rsid", "rsid"]), Some(2));
        assert_eq!(find_column(&headers, &["EFFECT_WEIGHT"]), Some(3));
        assert_eq!(find_column(&headers, &["beta"]), None);
    }
}
