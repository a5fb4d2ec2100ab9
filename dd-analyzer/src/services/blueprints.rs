//! Blueprint registry
//!
//! Built-in blueprints are compiled in; YAML files in the blueprints
//! directory override them by key or add new transaction types.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::models::Blueprint;
use crate::services::classifier::compile_pattern;

const BUILTIN: &[(&str, &str)] = &[
    ("m_and_a.yaml", include_str!("../../blueprints/m_and_a.yaml")),
    ("mining.yaml", include_str!("../../blueprints/mining.yaml")),
];

#[derive(Debug, Error)]
pub enum BlueprintError {
    #[error("Failed to parse blueprint {source_name}: {message}")]
    Parse { source_name: String, message: String },

    #[error("Invalid blueprint '{key}': {message}")]
    Invalid { key: String, message: String },

    #[error("Unknown transaction type: {0}")]
    Unknown(String),
}

fn invalid(blueprint: &Blueprint, message: impl Into<String>) -> BlueprintError {
    BlueprintError::Invalid {
        key: blueprint.key.clone(),
        message: message.into(),
    }
}

/// Check folder references and patterns of a blueprint
pub fn validate(blueprint: &Blueprint) -> Result<(), BlueprintError> {
    if blueprint.key.trim().is_empty() {
        return Err(invalid(blueprint, "key is empty"));
    }
    if blueprint.folders.is_empty() {
        return Err(invalid(blueprint, "no folders"));
    }

    let mut names = BTreeSet::new();
    for folder in &blueprint.folders {
        if !names.insert(folder.name.as_str()) {
            return Err(invalid(blueprint, format!("duplicate folder '{}'", folder.name)));
        }
        for pattern in &folder.patterns {
            compile_pattern(pattern).map_err(|e| {
                invalid(blueprint, format!("folder '{}' pattern: {}", folder.name, e))
            })?;
        }
    }

    if !names.contains(blueprint.fallback_folder.as_str()) {
        return Err(invalid(
            blueprint,
            format!("fallback folder '{}' is not defined", blueprint.fallback_folder),
        ));
    }

    for expected in &blueprint.expected_documents {
        if !names.contains(expected.folder.as_str()) {
            return Err(invalid(
                blueprint,
                format!("expected document '{}' references unknown folder '{}'", expected.name, expected.folder),
            ));
        }
        for pattern in &expected.patterns {
            compile_pattern(pattern).map_err(|e| {
                invalid(blueprint, format!("expected document '{}' pattern: {}", expected.name, e))
            })?;
        }
    }

    for question in &blueprint.questions {
        if !names.contains(question.folder.as_str()) {
            return Err(invalid(
                blueprint,
                format!("question references unknown folder '{}'", question.folder),
            ));
        }
    }

    Ok(())
}

pub fn parse_blueprint(yaml: &str, source_name: &str) -> Result<Blueprint, BlueprintError> {
    let blueprint: Blueprint = serde_yaml::from_str(yaml).map_err(|e| BlueprintError::Parse {
        source_name: source_name.to_string(),
        message: e.to_string(),
    })?;
    validate(&blueprint)?;
    Ok(blueprint)
}

#[derive(Debug, Clone, Default)]
pub struct BlueprintRegistry {
    blueprints: BTreeMap<String, Arc<Blueprint>>,
}

impl BlueprintRegistry {
    pub fn builtin() -> Result<Self, BlueprintError> {
        let mut registry = Self::default();
        for (name, yaml) in BUILTIN {
            registry.insert(parse_blueprint(yaml, name)?);
        }
        Ok(registry)
    }

    /// Built-ins plus every valid `*.yaml`/`*.yml` under `dir`
    ///
    /// Invalid files are logged and skipped.
    pub fn load(dir: &Path) -> Result<Self, BlueprintError> {
        let mut registry = Self::builtin()?;
        if !dir.is_dir() {
            return Ok(registry);
        }

        let files = WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            });

        for entry in files {
            let path = entry.path();
            let parsed = std::fs::read_to_string(path)
                .map_err(|e| BlueprintError::Parse {
                    source_name: path.display().to_string(),
                    message: e.to_string(),
                })
                .and_then(|yaml| parse_blueprint(&yaml, &path.display().to_string()));

            match parsed {
                Ok(blueprint) => {
                    info!(key = %blueprint.key, path = %path.display(), "Loaded blueprint");
                    registry.insert(blueprint);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping blueprint file"),
            }
        }

        Ok(registry)
    }

    pub fn insert(&mut self, blueprint: Blueprint) {
        self.blueprints.insert(blueprint.key.clone(), Arc::new(blueprint));
    }

    pub fn get(&self, key: &str) -> Result<Arc<Blueprint>, BlueprintError> {
        self.blueprints
            .get(key)
            .cloned()
            .ok_or_else(|| BlueprintError::Unknown(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blueprints.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.blueprints.keys().map(String::as_str)
    }
}
