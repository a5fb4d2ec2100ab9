//! Evaluation rubrics and results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalCriterion {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Relative weight in the overall score
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_score() -> f64 {
    5.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalRubric {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub criteria: Vec<EvalCriterion>,
    pub created_at: DateTime<Utc>,
}

impl EvalRubric {
    pub fn new(name: String, description: String, criteria: Vec<EvalCriterion>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            description,
            criteria,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion: String,
    pub score: f64,
    pub max_score: f64,
    #[serde(default)]
    pub rationale: String,
}

/// Rubric-graded assessment of one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub id: Uuid,
    pub rubric_id: Uuid,
    pub run_id: Uuid,
    pub scores: Vec<CriterionScore>,
    /// Weighted score normalised to 0..100
    pub overall_score: f64,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}
