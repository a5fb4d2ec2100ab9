//! Services used by the pipeline and the HTTP handlers

pub mod blueprints;
pub mod change_detector;
pub mod classifier;
pub mod document_store;
pub mod evaluator;
pub mod llm_client;
pub mod report;
pub mod zip_ingest;

pub use blueprints::{BlueprintError, BlueprintRegistry};
pub use classifier::{Classification, Classifier, Thresholds};
pub use document_store::DocumentStore;
pub use llm_client::{LlmError, LlmProvider, OpenAiCompatibleClient};
pub use zip_ingest::{IngestError, IngestLimits};
