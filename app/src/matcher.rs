// ==============================================================================
// matcher.rs - Variant Matcher
// ==============================================================================
// Description: Matches scoring records against a genotype set, computes
//              dosages and contributions, applies strand and allele-frequency
//              safeguards and accumulates coverage statistics
// Author: Matt Barham
// Created: 2026-10-15
// Modified: 2026-10-18
// Version: 1.1.0
// ==============================================================================

use crate::config::MatcherConfig;
use crate::genotype_converter::{effect_allele_dosage, is_strand_ambiguous, resolve_other_allele, single_base};
use crate::models::{CoverageStats, Match, ScoringRecord, Variant};
use crate::parsers::AlleleFreqMap;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Read-only lookup over one person's genotype calls
///
/// Shared across concurrent model evaluations.
#[derive(Debug, Clone, Default)]
pub struct GenomeIndex {
    variants: Vec<Variant>,
    by_rsid: HashMap<String, usize>,
    by_locus: HashMap<String, usize>,
}

impl GenomeIndex {
    /// Index variants by rsID and by `chromosome:position`; later
    /// duplicates replace earlier ones
    pub fn new(variants: Vec<Variant>) -> Self {
        let mut by_rsid = HashMap::with_capacity(variants.len());
        let mut by_locus = HashMap::with_capacity(variants.len());
        for (idx, variant) in variants.iter().enumerate() {
            if let Some(rsid) = &variant.rsid {
                by_rsid.insert(rsid.clone(), idx);
            }
            by_locus.insert(variant.locus(), idx);
        }
        Self {
            variants,
            by_rsid,
            by_locus,
        }
    }

    /// Genome variant for a scoring record: rsID first, then locus
    pub fn lookup(&self, record: &ScoringRecord) -> Option<&Variant> {
        record
            .rsid
            .as_deref()
            .and_then(|rsid| self.by_rsid.get(rsid))
            .or_else(|| record.locus().and_then(|locus| self.by_locus.get(&locus)))
            .map(|&idx| &self.variants[idx])
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Variants with an actual genotype call
    pub fn called_count(&self) -> usize {
        self.variants.iter().filter(|v| !v.is_no_call()).count()
    }

    pub fn has_calls(&self) -> bool {
        self.variants.iter().any(|v| !v.is_no_call())
    }
}

/// Result of one matching pass
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub matches: Vec<Match>,
    pub stats: CoverageStats,
}

impl MatchOutcome {
    /// Σ beta × dosage over matches
    pub fn raw_score(&self) -> f64 {
        crate::evaluator::raw_score(&self.matches)
    }

    /// Up to `k` matches with the largest |score|
    pub fn top_variants(&self, k: usize) -> Vec<Match> {
        let mut top = self.matches.clone();
        top.sort_by(|a, b| b.score.abs().total_cmp(&a.score.abs()));
        top.truncate(k);
        top
    }
}

/// Effect-allele frequency: file value first, then the lookup table
fn resolve_frequency(record: &ScoringRecord, af_map: Option<&AlleleFreqMap>) -> Option<f64> {
    record
        .effect_allele_frequency
        .filter(|p| (0.0..=1.0).contains(p))
        .or_else(|| {
            let rsid = record.rsid.as_deref()?;
            af_map?.frequency(rsid, &record.effect_allele)
        })
}

/// Matches scoring records to genotype calls
#[derive(Debug, Clone, Default)]
pub struct VariantMatcher {
    config: MatcherConfig,
}

impl VariantMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Run one matching pass
    ///
    /// # Arguments
    /// * `genome` - Indexed genotype calls
    /// * `records` - Scoring file records in file order
    /// * `af_map` - Optional fallback allele frequencies
    ///
    /// # Returns
    /// Matches in record order plus coverage statistics. Records without an
    /// effect allele or finite weight are skipped; dropped palindromes stay
    /// in the weighted denominators.
    pub fn match_records(
        &self,
        genome: &GenomeIndex,
        records: &[ScoringRecord],
        af_map: Option<&AlleleFreqMap>,
    ) -> MatchOutcome {
        let mut stats = CoverageStats::default();
        let mut matches = Vec::new();
        let mut ambiguous_seen: HashSet<String> = HashSet::new();

        for record in records {
            stats.n_total += 1;
            if !record.is_scoreable() {
                continue;
            }

            let beta = record.weight;
            stats.n_total_with_beta += 1;
            stats.w_total += beta.abs();
            stats.q_total += beta * beta;

            let other = resolve_other_allele(record.other_allele.as_deref(), &record.effect_allele);
            let palindromic = match (single_base(&record.effect_allele), other) {
                (Some(effect), Some(other)) => is_strand_ambiguous(effect, other),
                _ => false,
            };

            let af = resolve_frequency(record, af_map);
            if let Some(p) = af.filter(|p| *p > 0.5) {
                stats.flip_suspects += 1;
                debug!("Possible allele flip at {} (effect allele frequency {:.3})", record.key(), p);
            }

            if palindromic {
                let key = record.key();
                if ambiguous_seen.insert(key.clone()) {
                    debug!("Strand-ambiguous record {} ({}/{:?})", key, record.effect_allele, other);
                }
                match af {
                    Some(p) if p.min(1.0 - p) >= self.config.palindrome_max_maf => {
                        stats.dropped_pal_high_maf += 1;
                        continue;
                    }
                    None if self.config.drop_ambiguous_without_af => {
                        stats.dropped_ambig_no_af += 1;
                        continue;
                    }
                    _ => {}
                }
            }

            let Some(variant) = genome.lookup(record) else {
                continue;
            };
            let dosage = match effect_allele_dosage(&variant.genotype, &record.effect_allele) {
                Ok(Some(dosage)) => dosage,
                Ok(None) => continue,
                Err(e) => {
                    debug!("Skipping {}: {}", record.key(), e);
                    continue;
                }
            };

            stats.n_matched += 1;
            stats.w_matched += beta.abs();
            stats.q_matched += beta * beta;

            matches.push(Match {
                rsid: record.rsid.clone(),
                locus: record.locus().unwrap_or_else(|| variant.locus()),
                genotype: variant.genotype.clone(),
                effect_allele: record.effect_allele.clone(),
                other_allele: other.map(String::from),
                beta,
                dosage,
                score: beta * f64::from(dosage),
                af,
            });
        }

        let (mut mu, mut var, mut used) = (0.0, 0.0, 0);
        for m in &matches {
            if let Some(p) = m.af {
                mu += 2.0 * p * m.beta;
                var += 2.0 * p * (1.0 - p) * m.beta * m.beta;
                used += 1;
            }
        }
        if used > 0 {
            stats.mu_af = Some(mu);
            stats.sd_af = Some(var.sqrt());
        }
        stats.n_af_used = used;

        info!(
            "Matched {}/{} records (weighted coverage {:.1}%, {} ambiguous without AF, {} high-MAF palindromes, {} flip suspects)",
            stats.n_matched,
            stats.n_total_with_beta,
            stats.weighted_coverage().unwrap_or(0.0) * 100.0,
            stats.dropped_ambig_no_af,
            stats.dropped_pal_high_maf,
            stats.flip_suspects
        );

        MatchOutcome { matches, stats }
    }
}
