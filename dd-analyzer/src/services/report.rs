//! Run report
//!
//! The JSON report is written by the store stage and rebuilt after refine;
//! Markdown is rendered on request from the stored JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use uuid::Uuid;

use crate::models::{
    AggregateSummary, AnalysisRun, DueDiligence, FinancialSummary, Finding, FindingType,
    MissingDocument, PassResults, Severity, Synthesis, VerificationStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportFinding {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub finding_type: FindingType,
    pub document_id: Option<Uuid>,
    pub document_name: Option<String>,
    pub clause_reference: Option<String>,
    pub confidence: f64,
    pub verification_status: VerificationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub dd_id: Uuid,
    pub dd_name: String,
    pub transaction_type: String,
    pub blueprint: String,
    pub run_id: Uuid,
    pub run_number: i64,
    pub generated_at: DateTime<Utc>,
    pub document_count: usize,
    pub synthesis: Option<Synthesis>,
    pub aggregate: Option<AggregateSummary>,
    pub financials: Option<FinancialSummary>,
    pub missing_documents: Vec<MissingDocument>,
    /// Most severe group first
    pub findings_by_severity: Vec<(Severity, Vec<ReportFinding>)>,
}

impl RunReport {
    pub fn findings_count(&self) -> usize {
        self.findings_by_severity.iter().map(|(_, f)| f.len()).sum()
    }
}

/// Assemble the report of a run from its pass results and findings
///
/// Duplicate findings are left out.
pub fn build_report(
    dd: &DueDiligence,
    run: &AnalysisRun,
    results: &PassResults,
    findings: &[Finding],
    document_names: &BTreeMap<Uuid, String>,
) -> RunReport {
    let mut grouped: BTreeMap<Severity, Vec<ReportFinding>> = BTreeMap::new();
    for finding in findings.iter().filter(|f| f.duplicate_of.is_none()) {
        grouped.entry(finding.severity).or_default().push(ReportFinding {
            id: finding.id,
            title: finding.title.clone(),
            description: finding.description.clone(),
            category: finding.category.clone(),
            finding_type: finding.finding_type,
            document_id: finding.document_id,
            document_name: finding
                .document_id
                .and_then(|id| document_names.get(&id).cloned()),
            clause_reference: finding.clause_reference.clone(),
            confidence: finding.confidence,
            verification_status: finding.verification_status,
        });
    }

    RunReport {
        dd_id: dd.id,
        dd_name: dd.name.clone(),
        transaction_type: dd.transaction_type.clone(),
        blueprint: run.blueprint.clone(),
        run_id: run.id,
        run_number: run.run_number,
        generated_at: Utc::now(),
        document_count: results
            .wizard
            .as_ref()
            .map(|w| w.document_count)
            .unwrap_or_default(),
        synthesis: results.pass6_synthesis.clone(),
        aggregate: results.pass5_aggregate.clone(),
        financials: results.pass3_financials.clone(),
        missing_documents: results
            .classification
            .as_ref()
            .map(|c| c.missing_documents.clone())
            .unwrap_or_default(),
        findings_by_severity: grouped.into_iter().rev().collect(),
    }
}

fn bullet_list(out: &mut String, items: &[String]) {
    for item in items {
        let _ = writeln!(out, "- {}", item);
    }
    out.push('\n');
}

pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# Due Diligence Report: {}\n", report.dd_name);
    let _ = writeln!(
        out,
        "Transaction type: {} | Run #{} | Generated {}\n",
        report.transaction_type,
        report.run_number,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(out, "Documents analysed: {}\n", report.document_count);

    if let Some(synthesis) = &report.synthesis {
        out.push_str("## Executive Summary\n\n");
        let _ = writeln!(out, "{}\n", synthesis.executive_summary);
        if !synthesis.key_risks.is_empty() {
            out.push_str("### Key Risks\n\n");
            bullet_list(&mut out, &synthesis.key_risks);
        }
        if !synthesis.recommendations.is_empty() {
            out.push_str("### Recommendations\n\n");
            bullet_list(&mut out, &synthesis.recommendations);
        }
    }

    if let Some(aggregate) = &report.aggregate {
        out.push_str("## Risk Overview\n\n");
        let _ = writeln!(out, "Risk score: {:.0}/100\n", aggregate.risk_score);
        out.push_str("| Severity | Findings |\n|---|---|\n");
        for (severity, count) in aggregate.severity_counts.iter().rev() {
            let _ = writeln!(out, "| {} | {} |", severity, count);
        }
        out.push('\n');
    }

    if let Some(financials) = &report.financials {
        if !financials.totals_by_currency.is_empty() {
            out.push_str("## Financial Exposure\n\n");
            out.push_str("| Currency | Total |\n|---|---|\n");
            for (currency, total) in &financials.totals_by_currency {
                let _ = writeln!(out, "| {} | {:.2} |", currency, total);
            }
            out.push('\n');
        }
    }

    if !report.missing_documents.is_empty() {
        out.push_str("## Missing Documents\n\n");
        let items: Vec<String> = report
            .missing_documents
            .iter()
            .map(|m| {
                let required = if m.required { " (required)" } else { "" };
                format!("{} in {}{}", m.name, m.folder, required)
            })
            .collect();
        bullet_list(&mut out, &items);
    }

    out.push_str("## Findings\n\n");
    if report.findings_count() == 0 {
        out.push_str("No findings.\n");
    }
    for (severity, findings) in &report.findings_by_severity {
        let _ = writeln!(out, "### {} ({})\n", severity.to_string().to_uppercase(), findings.len());
        for finding in findings {
            let _ = writeln!(out, "#### {}\n", finding.title);
            let _ = writeln!(out, "{}\n", finding.description);
            let mut meta = vec![format!("Category: {}", finding.category)];
            if let Some(name) = &finding.document_name {
                meta.push(format!("Document: {}", name));
            }
            if let Some(clause) = &finding.clause_reference {
                meta.push(format!("Clause: {}", clause));
            }
            if finding.verification_status != VerificationStatus::Unverified {
                meta.push(format!("Verification: {}", finding.verification_status));
            }
            let _ = writeln!(out, "_{}_\n", meta.join(" | "));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReviewStatus;

    fn finding(run: &AnalysisRun, title: &str, severity: Severity, duplicate_of: Option<Uuid>) -> Finding {
        Finding {
            id: Uuid::new_v4(),
            dd_id: run.dd_id,
            run_id: run.id,
            perspective_risk_id: None,
            document_id: None,
            category: "contracts".to_string(),
            title: title.to_string(),
            description: "Details".to_string(),
            severity,
            finding_type: FindingType::Risk,
            clause_reference: Some("12.1".to_string()),
            confidence: 0.9,
            verification_status: VerificationStatus::Verified,
            status: ReviewStatus::Open,
            reviewer_note: None,
            reviewed_by: None,
            reviewed_at: None,
            duplicate_of,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_groups_by_severity_and_drops_duplicates() {
        let dd = DueDiligence::new("Atlas".into(), "ana".into(), "m_and_a".into(), String::new());
        let run = AnalysisRun::new(dd.id, 1, "m_and_a".into(), false);
        let original = finding(&run, "Change of control", Severity::High, None);
        let findings = vec![
            finding(&run, "Late filing", Severity::Low, None),
            finding(&run, "Change of control (again)", Severity::High, Some(original.id)),
            original,
            finding(&run, "Uncapped indemnity", Severity::Critical, None),
        ];

        let report = build_report(&dd, &run, &PassResults::default(), &findings, &BTreeMap::new());
        let order: Vec<Severity> = report.findings_by_severity.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec![Severity::Critical, Severity::High, Severity::Low]);
        assert_eq!(report.findings_count(), 3);

        let markdown = render_markdown(&report);
        assert!(markdown.starts_with("# Due Diligence Report: Atlas"));
        assert!(markdown.contains("### CRITICAL (1)"));
        assert!(markdown.contains("Clause: 12.1"));
        assert!(!markdown.contains("(again)"));
    }

    #[test]
    fn test_report_json_round_trip() {
        let dd = DueDiligence::new("Atlas".into(), "ana".into(), "mining".into(), String::new());
        let run = AnalysisRun::new(dd.id, 2, "mining".into(), true);
        let findings = vec![finding(&run, "Expired licence", Severity::Critical, None)];
        let report = build_report(&dd, &run, &PassResults::default(), &findings, &BTreeMap::new());

        let value = serde_json::to_value(&report).unwrap();
        let back: RunReport = serde_json::from_value(value).unwrap();
        assert_eq!(back, report);
    }
}
