//! Data models for dd-analyzer

/// Unit enum persisted as a snake_case string column
///
/// Generates `as_str`, `Display`, `FromStr` and serde impls that agree on the
/// same literal.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:tt ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = dd_common::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(dd_common::Error::InvalidInput(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod analysis_run;
pub mod blueprint;
pub mod checkpoint;
pub mod document;
pub mod due_diligence;
pub mod evaluation;
pub mod pass_results;
pub mod risk;

pub use analysis_run::{AnalysisRun, RunStatus};
pub use blueprint::{Blueprint, BlueprintFolder, BlueprintQuestion, ExpectedDocument};
pub use checkpoint::{ProcessingCheckpoint, StageProgress};
pub use document::{ClassificationStatus, Document, DocumentVersion, Folder, TextStatus};
pub use due_diligence::DueDiligence;
pub use evaluation::{CriterionScore, EvalCriterion, EvalRubric, Evaluation};
pub use pass_results::{
    AggregateSummary, AmountRef, ClassificationSummary, DocumentExtraction, FinancialSummary,
    FindingDraft, KeyDate, MissingDocument, MonetaryAmount, PassResults, Synthesis, Verification,
    WizardOutcome,
};
pub use risk::{Finding, FindingType, PerspectiveRisk, ReviewStatus, Severity, VerificationStatus};

use chrono::{DateTime, Utc};
use dd_common::{Error, Result};
use uuid::Uuid;

/// Parse an RFC3339 column
pub(crate) fn parse_timestamp(value: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse a UUID column
pub(crate) fn parse_uuid(value: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
