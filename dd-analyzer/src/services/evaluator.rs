//! Rubric evaluation of completed runs
//!
//! The model grades each criterion; the overall score is computed here so it
//! does not depend on the model's arithmetic.

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{CriterionScore, EvalRubric, Evaluation, Finding};
use crate::services::llm_client::{parse_json_response, CompletionRequest, LlmError, LlmProvider};
use crate::services::report::RunReport;

/// Findings included in the grading prompt
const MAX_PROMPT_FINDINGS: usize = 50;

#[derive(Debug, Deserialize)]
struct RawScore {
    criterion: String,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Deserialize)]
struct RawEvaluation {
    #[serde(default)]
    scores: Vec<RawScore>,
    #[serde(default)]
    summary: String,
}

/// Align model scores with the rubric, clamped to each criterion's range
///
/// Criteria the model skipped score 0.
fn align_scores(rubric: &EvalRubric, raw: Vec<RawScore>) -> Vec<CriterionScore> {
    rubric
        .criteria
        .iter()
        .map(|criterion| {
            let matched = raw
                .iter()
                .find(|s| s.criterion.trim().eq_ignore_ascii_case(criterion.name.trim()));
            let score = matched
                .map(|s| s.score)
                .filter(|s| s.is_finite())
                .unwrap_or(0.0)
                .clamp(0.0, criterion.max_score.max(0.0));
            CriterionScore {
                criterion: criterion.name.clone(),
                score,
                max_score: criterion.max_score,
                rationale: matched.map(|s| s.rationale.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

/// Weighted mean of score/max over criteria, scaled to 0..100
pub fn overall_score(rubric: &EvalRubric, scores: &[CriterionScore]) -> f64 {
    let (weighted, total_weight) = rubric.criteria.iter().zip(scores).fold(
        (0.0, 0.0),
        |(weighted, total), (criterion, score)| {
            let weight = criterion.weight.max(0.0);
            let ratio = if score.max_score > 0.0 {
                score.score / score.max_score
            } else {
                0.0
            };
            (weighted + weight * ratio, total + weight)
        },
    );

    if total_weight <= 0.0 {
        return 0.0;
    }
    ((weighted / total_weight) * 1000.0).round() / 10.0
}

fn build_prompt(rubric: &EvalRubric, report: &RunReport, findings: &[Finding]) -> CompletionRequest {
    let system = "You are a senior due diligence partner reviewing the work product of an \
                  automated analysis. Grade it strictly against the rubric. Respond with JSON: \
                  {\"scores\": [{\"criterion\": string, \"score\": number, \"rationale\": string}], \
                  \"summary\": string}.";

    let criteria = rubric
        .criteria
        .iter()
        .map(|c| format!("- {} (0-{}): {}", c.name, c.max_score, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    let listed = findings
        .iter()
        .filter(|f| f.duplicate_of.is_none())
        .take(MAX_PROMPT_FINDINGS)
        .map(|f| format!("- [{}] {} ({}): {}", f.severity, f.title, f.category, f.description))
        .collect::<Vec<_>>()
        .join("\n");

    let summary = report
        .synthesis
        .as_ref()
        .map(|s| s.executive_summary.as_str())
        .unwrap_or("(none)");

    let user = format!(
        "Rubric: {}\n{}\n\nCriteria:\n{}\n\nDeal: {} ({})\nDocuments analysed: {}\n\n\
         Executive summary:\n{}\n\nFindings ({} total):\n{}",
        rubric.name,
        rubric.description,
        criteria,
        report.dd_name,
        report.transaction_type,
        report.document_count,
        summary,
        findings.len(),
        listed
    );

    CompletionRequest::json("evaluation", system, user)
}

/// Grade a run against a rubric
pub async fn evaluate_run(
    llm: &dyn LlmProvider,
    rubric: &EvalRubric,
    run_id: Uuid,
    report: &RunReport,
    findings: &[Finding],
) -> Result<Evaluation, LlmError> {
    let response = llm.complete(build_prompt(rubric, report, findings)).await?;
    debug!(run_id = %run_id, chars = response.content.len(), "Evaluation response received");

    let raw: RawEvaluation = parse_json_response(&response.content)?;
    let scores = align_scores(rubric, raw.scores);
    let overall = overall_score(rubric, &scores);

    info!(run_id = %run_id, rubric = %rubric.name, overall, "Run evaluated");

    Ok(Evaluation {
        id: Uuid::new_v4(),
        rubric_id: rubric.id,
        run_id,
        scores,
        overall_score: overall,
        summary: raw.summary,
        created_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvalCriterion;

    fn rubric() -> EvalRubric {
        EvalRubric::new(
            "Quality".into(),
            "Report quality".into(),
            vec![
                EvalCriterion {
                    name: "Coverage".into(),
                    description: "All material risks found".into(),
                    weight: 3.0,
                    max_score: 5.0,
                },
                EvalCriterion {
                    name: "Accuracy".into(),
                    description: "Findings are correct".into(),
                    weight: 1.0,
                    max_score: 10.0,
                },
            ],
        )
    }

    fn raw(criterion: &str, score: f64) -> RawScore {
        RawScore {
            criterion: criterion.to_string(),
            score,
            rationale: String::new(),
        }
    }

    #[test]
    fn test_scores_clamped_and_aligned() {
        let rubric = rubric();
        let scores = align_scores(&rubric, vec![raw("accuracy", 14.0), raw("Coverage", -2.0)]);
        assert_eq!(scores[0].criterion, "Coverage");
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[1].score, 10.0);
    }

    #[test]
    fn test_missing_criterion_scores_zero() {
        let rubric = rubric();
        let scores = align_scores(&rubric, vec![raw("Accuracy", 5.0)]);
        assert_eq!(scores[0].score, 0.0);
        assert_eq!(scores[1].score, 5.0);
    }

    #[test]
    fn test_overall_is_weighted() {
        let rubric = rubric();
        // Coverage 4/5 = 0.8 (w3), Accuracy 5/10 = 0.5 (w1) → (2.4 + 0.5) / 4 = 72.5
        let scores = align_scores(&rubric, vec![raw("Coverage", 4.0), raw("Accuracy", 5.0)]);
        assert_eq!(overall_score(&rubric, &scores), 72.5);
    }

    #[test]
    fn test_zero_weights_give_zero() {
        let mut rubric = rubric();
        for criterion in &mut rubric.criteria {
            criterion.weight = 0.0;
        }
        let scores = align_scores(&rubric, vec![raw("Coverage", 5.0)]);
        assert_eq!(overall_score(&rubric, &scores), 0.0);
    }
}
