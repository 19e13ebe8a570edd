//! Post-commit quality validation: a quick pass over already
//! committed enrichments that flags placeholder output, empty critical
//! fields, and thin summaries without blocking the pipeline.

use crate::types::Enrichment;
use regex::Regex;
use std::sync::OnceLock;

const MIN_SUMMARY_WORDS: usize = 4;
const PASS_THRESHOLD: u8 = 60;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(auto-summary generated offline|todo: describe|lorem ipsum|no description available)").unwrap()
    })
}

#[derive(Debug, Clone)]
pub struct QualityReport {
    pub score: u8,
    pub is_placeholder: bool,
    pub has_empty_critical_fields: bool,
    pub summary_too_thin: bool,
}

impl QualityReport {
    pub fn passes(&self) -> bool {
        self.score >= PASS_THRESHOLD
    }
}

pub fn assess(enrichment: &Enrichment) -> QualityReport {
    let is_placeholder = placeholder_regex().is_match(&enrichment.summary);
    let has_empty_critical_fields = enrichment.inputs.is_empty() && enrichment.outputs.is_empty();
    let word_count = enrichment.summary.split_whitespace().count();
    let summary_too_thin = word_count < MIN_SUMMARY_WORDS;

    let mut score: i32 = 100;
    if is_placeholder {
        score -= 60;
    }
    if has_empty_critical_fields {
        score -= 25;
    }
    if summary_too_thin {
        score -= 20;
    }
    if enrichment.pitfalls.is_empty() {
        score -= 5;
    }

    QualityReport {
        score: score.clamp(0, 100) as u8,
        is_placeholder,
        has_empty_critical_fields,
        summary_too_thin,
    }
}

/// Summarizes a batch of reports for a cycle-level log line.
pub struct QualitySummary {
    pub total: usize,
    pub failed: usize,
    pub average_score: f64,
}

pub fn summarize(reports: &[QualityReport]) -> QualitySummary {
    if reports.is_empty() {
        return QualitySummary { total: 0, failed: 0, average_score: 0.0 };
    }
    let failed = reports.iter().filter(|r| !r.passes()).count();
    let average_score = reports.iter().map(|r| r.score as f64).sum::<f64>() / reports.len() as f64;
    QualitySummary { total: reports.len(), failed, average_score }
}

/// Result of an operator-invoked quality sweep over every committed
/// enrichment, with optional cleanup of known-bad (placeholder) records.
#[derive(Debug, Clone)]
pub struct QualityGateReport {
    pub total: usize,
    pub fake: usize,
    pub quality_score: u8,
    pub removed: usize,
}

/// Assesses every enrichment in the store. With `fix`, deletes the
/// placeholder ones and re-queues their spans for re-enrichment.
pub fn run_quality_gate(store: &mut crate::store::Store, fix: bool) -> crate::error::Result<QualityGateReport> {
    let enrichments = store.all_enrichments()?;
    let assessed: Vec<(String, QualityReport)> = enrichments.iter().map(|e| (e.span_hash.clone(), assess(e))).collect();

    let total = assessed.len();
    let fake = assessed.iter().filter(|(_, r)| r.is_placeholder).count();
    // Percentage of enrichments that are not placeholders -- the headline
    // number an operator reads, not an average of per-record quality
    // scores (those already factor placeholder-ness in at a 60-point
    // penalty, which would double-count it here).
    let quality_score = if total == 0 { 100 } else { (((total - fake) * 100) / total) as u8 };

    let mut removed = 0;
    if fix {
        for (hash, report) in &assessed {
            if report.is_placeholder {
                store.delete_enrichment(hash)?;
                removed += 1;
            }
        }
    }

    Ok(QualityGateReport { total, fake, quality_score, removed })
}
