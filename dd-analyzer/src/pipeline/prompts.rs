//! Prompt builders and response parsers of the LLM passes
//!
//! Parsers are lenient about what the model sends back: missing fields take
//! defaults, severities and statuses are matched loosely and amounts may
//! arrive as strings.

use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{
    AggregateSummary, BlueprintQuestion, DocumentExtraction, DueDiligence, FinancialSummary,
    FindingDraft, FindingType, KeyDate, MissingDocument, MonetaryAmount, PerspectiveRisk,
    Severity, Synthesis, Verification, VerificationStatus,
};
use crate::services::llm_client::{parse_json_response, CompletionRequest, LlmError};

const SYSTEM_ANALYST: &str = "You are an experienced due diligence lawyer and analyst. \
You read data room documents for a prospective transaction and report facts and risks \
precisely. Always answer with a single JSON object and nothing else.";

/// Default confidence when the model gives none
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Cut `text` to at most `max_chars` characters
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn briefing_block(dd: &DueDiligence) -> String {
    if dd.briefing.trim().is_empty() {
        format!("Transaction: {} ({})", dd.name, dd.transaction_type)
    } else {
        format!(
            "Transaction: {} ({})\nBriefing: {}",
            dd.name, dd.transaction_type, dd.briefing
        )
    }
}

fn clamp_confidence(value: Option<f64>) -> f64 {
    value
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0)
}

/// Number from a JSON number or a string like "USD 1,250,000.50"
fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
}

// ============================================================================
// Pass 1: extraction
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawAmount {
    #[serde(default)]
    label: String,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    currency: String,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    parties: Vec<String>,
    #[serde(default)]
    dates: Vec<KeyDate>,
    #[serde(default)]
    amounts: Vec<RawAmount>,
    #[serde(default)]
    key_terms: Vec<String>,
}

pub fn extraction_request(
    dd: &DueDiligence,
    file_name: &str,
    folder: Option<&str>,
    text: &str,
    max_chars: usize,
) -> CompletionRequest {
    let user = format!(
        "{}\n\nDocument: {}\nFolder: {}\n\nExtract the key facts of this document as JSON:\n\
         {{\"summary\": string (3 sentences max), \"parties\": [string], \
         \"dates\": [{{\"label\": string, \"date\": string}}], \
         \"amounts\": [{{\"label\": string, \"amount\": number, \"currency\": ISO code}}], \
         \"key_terms\": [string]}}\n\n--- DOCUMENT TEXT ---\n{}",
        briefing_block(dd),
        file_name,
        folder.unwrap_or("(unclassified)"),
        truncate_chars(text, max_chars)
    );
    CompletionRequest::json("pass1_extract", SYSTEM_ANALYST, user)
}

pub fn parse_extraction(
    content: &str,
    document_id: Uuid,
    file_name: &str,
    folder: Option<&str>,
) -> Result<DocumentExtraction, LlmError> {
    let raw: RawExtraction = parse_json_response(content)?;
    Ok(DocumentExtraction {
        document_id,
        file_name: file_name.to_string(),
        folder: folder.map(str::to_string),
        summary: raw.summary,
        parties: raw.parties,
        dates: raw.dates,
        amounts: raw
            .amounts
            .into_iter()
            .filter_map(|a| {
                lenient_number(&a.amount).map(|amount| MonetaryAmount {
                    label: a.label,
                    amount,
                    currency: a.currency,
                })
            })
            .collect(),
        key_terms: raw.key_terms,
    })
}

// ============================================================================
// Pass 2: risk analysis
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawFinding {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    clause_reference: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    /// File names a cross-document conflict involves
    #[serde(default)]
    documents: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFindings {
    #[serde(default, alias = "conflicts", alias = "risks")]
    findings: Vec<RawFinding>,
}

fn to_draft(raw: RawFinding, document_id: Option<Uuid>, finding_type: FindingType, default_category: &str) -> Option<FindingDraft> {
    if raw.title.trim().is_empty() {
        return None;
    }
    Some(FindingDraft {
        id: Uuid::new_v4(),
        document_id,
        category: raw
            .category
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_category.to_string()),
        title: raw.title.trim().to_string(),
        description: raw.description.trim().to_string(),
        severity: Severity::from_model_output(&raw.severity),
        finding_type,
        clause_reference: raw.clause_reference.filter(|c| !c.trim().is_empty()),
        confidence: clamp_confidence(raw.confidence),
    })
}

pub fn analysis_request(
    dd: &DueDiligence,
    extraction: Option<&DocumentExtraction>,
    file_name: &str,
    text: &str,
    questions: &[&BlueprintQuestion],
    risks: &[PerspectiveRisk],
    max_chars: usize,
) -> CompletionRequest {
    let mut checklist: Vec<String> = questions
        .iter()
        .map(|q| format!("- [{}] {}", q.category, q.question))
        .collect();
    checklist.extend(
        risks
            .iter()
            .map(|r| format!("- [{}] {}: {}", r.category.to_lowercase(), r.title, r.query)),
    );
    if checklist.is_empty() {
        checklist.push("- [general] Any material legal, financial or commercial risk".to_string());
    }

    let facts = extraction
        .map(|e| format!("Known facts: {}\n", e.summary))
        .unwrap_or_default();

    let user = format!(
        "{}\n\nDocument: {}\n{}\nReview the document against this checklist \
         (category in brackets):\n{}\n\nReport each risk you find as JSON:\n\
         {{\"findings\": [{{\"title\": string, \"description\": string, \
         \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \"category\": string, \
         \"clause_reference\": string|null, \"confidence\": number 0-1}}]}}\n\
         Return an empty list when there are none.\n\n--- DOCUMENT TEXT ---\n{}",
        briefing_block(dd),
        file_name,
        facts,
        checklist.join("\n"),
        truncate_chars(text, max_chars)
    );
    CompletionRequest::json("pass2_analyze", SYSTEM_ANALYST, user)
}

pub fn parse_findings(
    content: &str,
    document_id: Uuid,
    default_category: &str,
) -> Result<Vec<FindingDraft>, LlmError> {
    let raw: RawFindings = parse_json_response(content)?;
    Ok(raw
        .findings
        .into_iter()
        .filter_map(|f| to_draft(f, Some(document_id), FindingType::Risk, default_category))
        .collect())
}

// ============================================================================
// Pass 4: cross-document conflicts
// ============================================================================

pub fn conflicts_request(dd: &DueDiligence, extractions: &[&DocumentExtraction]) -> CompletionRequest {
    let digest = extractions
        .iter()
        .map(|e| {
            let amounts = e
                .amounts
                .iter()
                .map(|a| format!("{} {} {}", a.label, a.amount, a.currency))
                .collect::<Vec<_>>()
                .join("; ");
            let dates = e
                .dates
                .iter()
                .map(|d| format!("{} {}", d.label, d.date))
                .collect::<Vec<_>>()
                .join("; ");
            format!(
                "## {}\nSummary: {}\nParties: {}\nDates: {}\nAmounts: {}",
                e.file_name,
                e.summary,
                e.parties.join(", "),
                dates,
                amounts
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "{}\n\nCompare the document digests below and report inconsistencies between \
         documents: conflicting parties, dates, amounts or obligations. Answer as JSON:\n\
         {{\"conflicts\": [{{\"title\": string, \"description\": string, \
         \"severity\": \"low\"|\"medium\"|\"high\"|\"critical\", \"category\": string, \
         \"documents\": [file name]}}]}}\n\n{}",
        briefing_block(dd),
        digest
    );
    CompletionRequest::json("pass4_cross_doc", SYSTEM_ANALYST, user)
}

/// Conflicts attach to the first referenced document that is known
pub fn parse_conflicts(
    content: &str,
    extractions: &[&DocumentExtraction],
) -> Result<Vec<FindingDraft>, LlmError> {
    let raw: RawFindings = parse_json_response(content)?;
    Ok(raw
        .findings
        .into_iter()
        .filter_map(|f| {
            let document_id = f.documents.iter().find_map(|name| {
                extractions
                    .iter()
                    .find(|e| e.file_name.eq_ignore_ascii_case(name.trim()))
                    .map(|e| e.document_id)
            });
            to_draft(f, document_id, FindingType::CrossDocument, "consistency")
        })
        .collect())
}

// ============================================================================
// Pass 6: synthesis
// ============================================================================

pub fn synthesis_request(
    dd: &DueDiligence,
    aggregate: &AggregateSummary,
    top: &[&FindingDraft],
    financials: Option<&FinancialSummary>,
    missing: &[MissingDocument],
) -> CompletionRequest {
    let findings = top
        .iter()
        .map(|f| format!("- [{}] {} ({}): {}", f.severity, f.title, f.category, f.description))
        .collect::<Vec<_>>()
        .join("\n");
    let totals = financials
        .map(|f| {
            f.totals_by_currency
                .iter()
                .map(|(currency, total)| format!("{} {:.2}", currency, total))
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    let gaps = missing
        .iter()
        .map(|m| m.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let user = format!(
        "{}\n\nRisk score: {:.0}/100 across {} findings.\nMost severe findings:\n{}\n\
         Financial totals: {}\nMissing documents: {}\n\nWrite the executive synthesis as JSON:\n\
         {{\"executive_summary\": string, \"key_risks\": [string], \"recommendations\": [string]}}",
        briefing_block(dd),
        aggregate.risk_score,
        aggregate.total_findings,
        if findings.is_empty() { "(none)".to_string() } else { findings },
        if totals.is_empty() { "(none)".to_string() } else { totals },
        if gaps.is_empty() { "(none)".to_string() } else { gaps },
    );
    CompletionRequest::json("pass6_synthesize", SYSTEM_ANALYST, user)
}

pub fn parse_synthesis(content: &str) -> Result<Synthesis, LlmError> {
    parse_json_response(content)
}

// ============================================================================
// Pass 7: verification
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawVerification {
    #[serde(default)]
    status: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    note: String,
}

pub fn verification_request(finding: &FindingDraft, file_name: &str, text: &str, max_chars: usize) -> CompletionRequest {
    let user = format!(
        "Check whether this finding is supported by the source document.\n\n\
         Finding: {}\nSeverity: {}\nDescription: {}\nClause: {}\n\nAnswer as JSON:\n\
         {{\"status\": \"verified\"|\"disputed\", \"confidence\": number 0-1, \"note\": string}}\n\n\
         --- {} ---\n{}",
        finding.title,
        finding.severity,
        finding.description,
        finding.clause_reference.as_deref().unwrap_or("(none)"),
        file_name,
        truncate_chars(text, max_chars)
    );
    CompletionRequest::json("pass7_verify", SYSTEM_ANALYST, user)
}

pub fn parse_verification(content: &str) -> Result<Verification, LlmError> {
    let raw: RawVerification = parse_json_response(content)?;
    let status = match raw.status.trim().to_ascii_lowercase().as_str() {
        "verified" | "confirmed" | "supported" => VerificationStatus::Verified,
        "disputed" | "refuted" | "unsupported" | "not_supported" => VerificationStatus::Disputed,
        _ => VerificationStatus::Unverified,
    };
    Ok(Verification {
        status,
        confidence: clamp_confidence(raw.confidence),
        note: raw.note,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn test_extraction_accepts_string_amounts() {
        let id = Uuid::new_v4();
        let content = r#"```json
{"summary": "Loan facility", "parties": ["Bank", "Target"],
 "amounts": [{"label": "Facility", "amount": "USD 1,250,000", "currency": "USD"},
             {"label": "Rate", "amount": null, "currency": ""}]}
```"#;
        let extraction = parse_extraction(content, id, "loan.docx", Some("Financial")).unwrap();
        assert_eq!(extraction.document_id, id);
        assert_eq!(extraction.amounts.len(), 1);
        assert_eq!(extraction.amounts[0].amount, 1_250_000.0);
        assert!(extraction.dates.is_empty());
    }

    #[test]
    fn test_findings_are_normalised() {
        let doc = Uuid::new_v4();
        let content = r#"{"findings": [
            {"title": "Change of control", "description": "Consent needed", "severity": "HIGH",
             "category": "Change_Of_Control", "confidence": 1.7},
            {"title": "  ", "severity": "low"},
            {"title": "Notice period", "severity": "weird"}
        ]}"#;
        let drafts = parse_findings(content, doc, "contracts").unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].severity, Severity::High);
        assert_eq!(drafts[0].category, "change_of_control");
        assert_eq!(drafts[0].confidence, 1.0);
        assert_eq!(drafts[0].document_id, Some(doc));
        assert_eq!(drafts[1].severity, Severity::Medium);
        assert_eq!(drafts[1].category, "contracts");
    }

    #[test]
    fn test_conflicts_resolve_document_names() {
        let a = DocumentExtraction {
            document_id: Uuid::new_v4(),
            file_name: "SPA.docx".into(),
            folder: None,
            summary: String::new(),
            parties: vec![],
            dates: vec![],
            amounts: vec![],
            key_terms: vec![],
        };
        let content = r#"{"conflicts": [{"title": "Price mismatch", "severity": "high",
            "documents": ["unknown.pdf", "spa.docx"]}]}"#;
        let drafts = parse_conflicts(content, &[&a]).unwrap();
        assert_eq!(drafts[0].document_id, Some(a.document_id));
        assert_eq!(drafts[0].finding_type, FindingType::CrossDocument);
        assert_eq!(drafts[0].category, "consistency");
    }

    #[test]
    fn test_verification_status_mapping() {
        let v = parse_verification(r#"{"status": "Confirmed", "confidence": 0.9}"#).unwrap();
        assert_eq!(v.status, VerificationStatus::Verified);
        let v = parse_verification(r#"{"status": "refuted", "note": "Clause absent"}"#).unwrap();
        assert_eq!(v.status, VerificationStatus::Disputed);
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
        assert!(parse_verification("no json here").is_err());
    }
}
