//! # DD Common Library
//!
//! Shared code for the due-diligence analysis service:
//! - Error type and result alias
//! - Configuration loading and root folder resolution
//! - Database initialization (schema for every table)
//! - Pipeline stage registry
//! - Event types (DdEvent enum) and EventBus
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod sse;
pub mod stages;

pub use error::{Error, Result};
pub use stages::PipelineStage;
