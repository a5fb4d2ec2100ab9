//! Deterministic stages: financial totals, aggregation and refinement

use std::collections::BTreeMap;
use strsim::normalized_levenshtein;
use uuid::Uuid;

use crate::db::risks::FindingRefinement;
use crate::models::{
    AggregateSummary, AmountRef, DocumentExtraction, FinancialSummary, Finding, FindingDraft,
    PerspectiveRisk, Severity,
};

/// Largest amounts listed in the financial summary
pub const LARGEST_AMOUNTS: usize = 10;
/// Findings listed as top findings
pub const TOP_FINDINGS: usize = 10;
/// Title similarity at or above which findings are duplicates
pub const DUPLICATE_SIMILARITY: f64 = 0.9;

/// Pass 3: totals per currency and the largest amounts
pub fn financial_summary<'a>(
    extractions: impl IntoIterator<Item = &'a DocumentExtraction>,
) -> FinancialSummary {
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    let mut amounts = Vec::new();
    let mut documents_with_amounts = 0;

    for extraction in extractions {
        let valid: Vec<_> = extraction
            .amounts
            .iter()
            .filter(|a| a.amount.is_finite())
            .collect();
        if valid.is_empty() {
            continue;
        }
        documents_with_amounts += 1;

        for amount in valid {
            let currency = amount.currency.trim().to_uppercase();
            let currency = if currency.is_empty() { "UNKNOWN".to_string() } else { currency };
            *totals.entry(currency.clone()).or_default() += amount.amount;
            amounts.push(AmountRef {
                document_id: extraction.document_id,
                file_name: extraction.file_name.clone(),
                label: amount.label.clone(),
                amount: amount.amount,
                currency,
            });
        }
    }

    amounts.sort_by(|a, b| b.amount.abs().total_cmp(&a.amount.abs()));
    amounts.truncate(LARGEST_AMOUNTS);

    FinancialSummary {
        totals_by_currency: totals,
        largest_amounts: amounts,
        documents_with_amounts,
    }
}

/// Pass 5: counts, weighted risk score and top findings
///
/// The score is the mean severity weight per finding relative to critical,
/// scaled to 0..100; no findings scores 0.
pub fn aggregate(drafts: &[&FindingDraft]) -> AggregateSummary {
    let mut severity_counts: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut category_counts: BTreeMap<String, usize> = BTreeMap::new();
    for draft in drafts {
        *severity_counts.entry(draft.severity).or_default() += 1;
        *category_counts.entry(draft.category.clone()).or_default() += 1;
    }

    let risk_score = if drafts.is_empty() {
        0.0
    } else {
        let total: f64 = drafts.iter().map(|d| d.severity.weight()).sum();
        let mean = total / drafts.len() as f64;
        ((mean / Severity::Critical.weight()) * 1000.0).round() / 10.0
    };

    let mut ranked: Vec<&&FindingDraft> = drafts.iter().collect();
    ranked.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then(b.confidence.total_cmp(&a.confidence))
    });

    AggregateSummary {
        total_findings: drafts.len(),
        severity_counts,
        category_counts,
        risk_score,
        top_findings: ranked.into_iter().take(TOP_FINDINGS).map(|d| d.id).collect(),
    }
}

fn normalise_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn category_key(category: &str) -> String {
    category.trim().to_lowercase()
}

/// Refine: duplicate marks and perspective-risk links
///
/// Findings are visited oldest first. A finding duplicates the first earlier
/// finding of the same category whose title is similar enough. Findings link
/// to the first perspective risk with their category. Categories compare
/// case-insensitively. Only findings that change are returned.
pub fn refinements(findings: &[Finding], risks: &[PerspectiveRisk]) -> Vec<FindingRefinement> {
    let risk_by_category: BTreeMap<String, Uuid> = risks
        .iter()
        .rev()
        .map(|r| (category_key(&r.category), r.id))
        .collect();

    // Stable: equal timestamps keep the store order
    let mut ordered: Vec<&Finding> = findings.iter().collect();
    ordered.sort_by_key(|f| f.created_at);

    let mut originals: Vec<(String, String, Uuid)> = Vec::new();
    let mut out = Vec::new();

    for finding in ordered {
        let category = category_key(&finding.category);
        let title = normalise_title(&finding.title);
        let duplicate_of = originals
            .iter()
            .find(|(other_category, other, _)| {
                *other_category == category
                    && normalized_levenshtein(&title, other) >= DUPLICATE_SIMILARITY
            })
            .map(|(_, _, id)| *id);

        let perspective_risk_id = finding
            .perspective_risk_id
            .or_else(|| risk_by_category.get(&category).copied());

        if duplicate_of.is_none() {
            originals.push((category, title, finding.id));
        }

        if duplicate_of != finding.duplicate_of || perspective_risk_id != finding.perspective_risk_id {
            out.push(FindingRefinement {
                finding_id: finding.id,
                duplicate_of,
                perspective_risk_id,
            });
        }
    }

    out
}
