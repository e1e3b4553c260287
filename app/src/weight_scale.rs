// ==============================================================================
// weight_scale.rs - Effect Weight Scale Detection
// ==============================================================================
// Description: Infers whether a scoring file's weights are linear betas, log
//              odds/hazard ratios or raw ratios by comparing them against
//              co-reported OR/HR columns, reconciled with header hints
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-16
// Version: 1.0.0
// ==============================================================================
// Algorithm:
//   For up to N rows with a finite weight w:
//     OR > 0 → |w - ln(OR)| and |w - OR|;  HR > 0 → |w - ln(HR)| and |w - HR|
//   Take the median of each difference list.
//   - log_or / log_hr : median log diff <= eps_loose and
//                       (<= eps_tight or smaller than the raw diff)
//   - or_ratio / hr_ratio : median raw diff <= eps_loose
//   - beta : ratios were compared but nothing fit
//   - unknown : nothing to compare against
// ==============================================================================

use crate::config::WeightScaleConfig;
use crate::models::WeightScale;
use crate::parsers::ScoringFile;
use serde::Serialize;
use tracing::debug;

/// Scale declared in a `#weight_type=` header line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightHint {
    Beta,
    /// "OR/HR": weights are ratios
    Ratio,
    LogOr,
    LogHr,
}

impl WeightHint {
    /// Parse a `weight_type` value; unrecognized values (e.g., "NR") give None
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();

        match normalized.as_str() {
            "BETA" => Some(WeightHint::Beta),
            "OR/HR" | "OR" | "HR" | "ODDSRATIO" | "HAZARDRATIO" => Some(WeightHint::Ratio),
            "LOG(OR)" | "LOGOR" | "LN(OR)" => Some(WeightHint::LogOr),
            "LOG(HR)" | "LOGHR" | "LN(HR)" => Some(WeightHint::LogHr),
            _ => None,
        }
    }
}

/// Audit record of one detection
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleEvidence {
    pub rows_sampled: usize,
    pub or_samples: usize,
    pub hr_samples: usize,
    pub median_log_or_diff: Option<f64>,
    pub median_or_diff: Option<f64>,
    pub median_log_hr_diff: Option<f64>,
    pub median_hr_diff: Option<f64>,
    /// Classification from the data alone
    pub inferred: WeightScale,
    pub hint: Option<WeightHint>,
}

/// Final scale plus the evidence behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScaleDetection {
    pub scale: WeightScale,
    pub evidence: ScaleEvidence,
}

/// Classifies a scoring file's weight scale
#[derive(Debug, Clone, Default)]
pub struct WeightScaleDetector {
    config: WeightScaleConfig,
}

impl WeightScaleDetector {
    pub fn new(config: WeightScaleConfig) -> Self {
        Self { config }
    }

    /// Detect the scale of `file`'s weights
    ///
    /// # Arguments
    /// * `file` - Parsed scoring file; its `weight_type` header is the hint
    ///
    /// # Returns
    /// The evidence-based class wins whenever it is definite (log or
    /// ratio); otherwise the hint decides, falling back to the evidence.
    pub fn detect(&self, file: &ScoringFile) -> ScaleDetection {
        let mut log_or = Vec::new();
        let mut raw_or = Vec::new();
        let mut log_hr = Vec::new();
        let mut raw_hr = Vec::new();
        let mut rows_sampled = 0;

        for (record, ratios) in file.records.iter().zip(&file.ratios) {
            if rows_sampled >= self.config.sample_rows {
                break;
            }
            let w = record.weight;
            if !w.is_finite() {
                continue;
            }
            rows_sampled += 1;

            if let Some(or) = ratios.odds_ratio.filter(|v| *v > 0.0) {
                log_or.push((w - or.ln()).abs());
                raw_or.push((w - or).abs());
            }
            if let Some(hr) = ratios.hazard_ratio.filter(|v| *v > 0.0) {
                log_hr.push((w - hr.ln()).abs());
                raw_hr.push((w - hr).abs());
            }
        }

        let median_log_or_diff = median(&mut log_or);
        let median_or_diff = median(&mut raw_or);
        let median_log_hr_diff = median(&mut log_hr);
        let median_hr_diff = median(&mut raw_hr);

        let inferred = self.classify(
            median_log_or_diff,
            median_or_diff,
            median_log_hr_diff,
            median_hr_diff,
        );
        let hint = file.meta.weight_type().and_then(WeightHint::parse);
        let only_hr = file.columns.hazard_ratio.is_some() && file.columns.odds_ratio.is_none();
        let scale = reconcile(inferred, hint, only_hr);

        debug!(
            "Weight scale {} (inferred {}, hint {:?}, {} rows sampled)",
            scale, inferred, hint, rows_sampled
        );

        ScaleDetection {
            scale,
            evidence: ScaleEvidence {
                rows_sampled,
                or_samples: log_or.len(),
                hr_samples: log_hr.len(),
                median_log_or_diff,
                median_or_diff,
                median_log_hr_diff,
                median_hr_diff,
                inferred,
                hint,
            },
        }
    }

    fn classify(
        &self,
        m_log_or: Option<f64>,
        m_or: Option<f64>,
        m_log_hr: Option<f64>,
        m_hr: Option<f64>,
    ) -> WeightScale {
        let tight = self.config.eps_tight;
        let loose = self.config.eps_loose;
        let log_fits = |m_log: Option<f64>, m_raw: Option<f64>| match m_log {
            Some(m) if m <= loose => m <= tight || m_raw.map_or(true, |raw| m < raw),
            _ => false,
        };
        let raw_fits = |m_raw: Option<f64>| m_raw.is_some_and(|m| m <= loose);

        if log_fits(m_log_or, m_or) {
            WeightScale::LogOr
        } else if log_fits(m_log_hr, m_hr) {
            WeightScale::LogHr
        } else if raw_fits(m_or) {
            WeightScale::OrRatio
        } else if raw_fits(m_hr) {
            WeightScale::HrRatio
        } else if m_or.is_some() || m_hr.is_some() {
            WeightScale::Beta
        } else {
            WeightScale::Unknown
        }
    }
}

/// Combine the data-driven class with a declared hint
fn reconcile(inferred: WeightScale, hint: Option<WeightHint>, only_hr: bool) -> WeightScale {
    let inconclusive = matches!(inferred, WeightScale::Beta | WeightScale::Unknown);
    match hint {
        Some(hint) if inconclusive => match hint {
            WeightHint::Beta => WeightScale::Beta,
            WeightHint::Ratio if only_hr => WeightScale::HrRatio,
            WeightHint::Ratio => WeightScale::OrRatio,
            WeightHint::LogOr => WeightScale::LogOr,
            WeightHint::LogHr => WeightScale::LogHr,
        },
        _ => inferred,
    }
}

/// Median of finite values; sorts in place
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 1 {
        values[mid]
    } else {
        (values[mid - 1] + values[mid]) / 2.0
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_with(header: &str, rows: &[String]) -> ScoringFile {
        let mut text = String::from(header);
        text.push('\n');
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        ScoringFile::parse_str(&text).unwrap()
    }

    fn odds_ratios() -> Vec<f64> {
        vec![1.1, 0.9, 1.25, 1.05, 0.8, 1.5]
    }

    #[test]
    fn test_log_or_detected() {
        let rows: Vec<String> = odds_ratios()
            .iter()
            .enumerate()
            .map(|(i, or)| format!("rs{}\tA\t{}\t{}", i, or.ln(), or))
            .collect();
        let file = file_with("rsID\teffect_allele\teffect_weight\tOR", &rows);

        let detection = WeightScaleDetector::default().detect(&file);
        assert_eq!(detection.scale, WeightScale::LogOr);
        assert_eq!(detection.evidence.or_samples, 6);
        assert!(detection.evidence.median_log_or_diff.unwrap() < 1e-9);
    }

    #[test]
    fn test_rounded_log_hr_detected() {
        let rows: Vec<String> = odds_ratios()
            .iter()
            .enumerate()
            .map(|(i, hr)| format!("rs{}\tA\t{:.3}\t{}", i, hr.ln(), hr))
            .collect();
        let file = file_with("rsID\teffect_allele\tbeta\thazard_ratio", &rows);

        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::LogHr);
    }

    #[test]
    fn test_ratio_scale_detected() {
        let rows: Vec<String> = odds_ratios()
            .iter()
            .enumerate()
            .map(|(i, or)| format!("rs{}\tA\t{}\t{}", i, or, or))
            .collect();
        let file = file_with("rsID\teffect_allele\teffect_weight\todds_ratio", &rows);

        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::OrRatio);
    }

    #[test]
    fn test_unrelated_weights_are_beta() {
        let rows: Vec<String> = (0..5).map(|i| format!("rs{}\tA\t0.{}7\t2.5", i, i)).collect();
        let file = file_with("rsID\teffect_allele\teffect_weight\tOR", &rows);

        let detection = WeightScaleDetector::default().detect(&file);
        assert_eq!(detection.scale, WeightScale::Beta);
        assert_eq!(detection.evidence.inferred, WeightScale::Beta);
    }

    #[test]
    fn test_no_ratio_columns_is_unknown() {
        let file = file_with("rsID\teffect_allele\teffect_weight", &["rs1\tA\t0.2".to_string()]);
        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::Unknown);
    }

    #[test]
    fn test_hint_applies_when_inconclusive() {
        let text = "#weight_type=log(OR)\nrsID\teffect_allele\teffect_weight\nrs1\tA\t0.2\n";
        let file = ScoringFile::parse_str(text).unwrap();
        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::LogOr);

        let text = "#weight_type=BETA\nrsID\teffect_allele\teffect_weight\nrs1\tA\t0.2\n";
        let file = ScoringFile::parse_str(text).unwrap();
        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::Beta);
    }

    #[test]
    fn test_evidence_overrides_hint() {
        let mut text = String::from("#weight_type=BETA\nrsID\teffect_allele\teffect_weight\tOR\n");
        for (i, or) in odds_ratios().iter().enumerate() {
            text.push_str(&format!("rs{}\tA\t{}\t{}\n", i, or.ln(), or));
        }
        let file = ScoringFile::parse_str(&text).unwrap();

        let detection = WeightScaleDetector::default().detect(&file);
        assert_eq!(detection.scale, WeightScale::LogOr);
        assert_eq!(detection.evidence.hint, Some(WeightHint::Beta));
    }

    #[test]
    fn test_ratio_hint_with_hr_column() {
        let text = "#weight_type=OR/HR\nrsID\teffect_allele\teffect_weight\tHR\nrs1\tA\t0.2\t\n";
        let file = ScoringFile::parse_str(text).unwrap();
        assert_eq!(WeightScaleDetector::default().detect(&file).scale, WeightScale::HrRatio);
    }

    #[test]
    fn test_sample_is_bounded() {
        let rows: Vec<String> = (0..50).map(|i| format!("rs{}\tA\t0.1\t1.2", i)).collect();
        let file = file_with("rsID\teffect_allele\teffect_weight\tOR", &rows);
        let detector = WeightScaleDetector::new(WeightScaleConfig {
            sample_rows: 10,
            ..WeightScaleConfig::default()
        });
        assert_eq!(detector.detect(&file).evidence.rows_sampled, 10);
    }

    #[test]
    fn test_hint_parsing() {
        assert_eq!(WeightHint::parse("beta"), Some(WeightHint::Beta));
        assert_eq!(WeightHint::parse("OR/HR"), Some(WeightHint::Ratio));
        assert_eq!(WeightHint::parse("log(OR)"), Some(WeightHint::LogOr));
        assert_eq!(WeightHint::parse("log_hr"), Some(WeightHint::LogHr));
        assert_eq!(WeightHint::parse("NR"), None);
    }
}
