//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`DD_ROOT_FOLDER`, then `DD_ROOT`)
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup: a warning is logged
//! and defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "DD_ROOT_FOLDER";
/// Alternative root folder environment variable
pub const ROOT_ENV: &str = "DD_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "dd.db";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/dd-analyzer (or /var/lib/dd-analyzer for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("dd-analyzer"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/dd-analyzer"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("dd-analyzer"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/dd-analyzer"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("dd-analyzer"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\dd-analyzer"))
        } else {
            PathBuf::from("./dd_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted upload size in megabytes
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5740
}

fn default_max_upload_mb() -> usize {
    256
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

/// LLM endpoint section (any OpenAI-compatible chat completions API)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// API key (lowest priority source, see API key resolution)
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    180
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_rpm() -> u32 {
    60
}

fn default_llm_max_tokens() -> u32 {
    4096
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_max_retries(),
            requests_per_minute: default_llm_rpm(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

/// Pipeline section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Resume runs left `interrupted` by a previous process on startup
    #[serde(default)]
    pub auto_resume: bool,
    /// Pause at checkpoints A/B/C until a reviewer approves
    #[serde(default)]
    pub review_gates: bool,
    /// Documents processed concurrently by per-document passes
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
    /// Maximum characters of document text sent to the model per call
    #[serde(default = "default_max_document_chars")]
    pub max_document_chars: usize,
}

fn default_max_concurrent_documents() -> usize {
    4
}

fn default_max_document_chars() -> usize {
    24_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_resume: false,
            review_gates: false,
            max_concurrent_documents: default_max_concurrent_documents(),
            max_document_chars: default_max_document_chars(),
        }
    }
}

/// ZIP ingest limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_total_mb")]
    pub max_total_uncompressed_mb: u64,
}

fn default_max_files() -> usize {
    5_000
}

fn default_max_total_mb() -> u64 {
    2_048
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_total_uncompressed_mb: default_max_total_mb(),
        }
    }
}

/// Complete TOML configuration file
///
/// Every section is optional; missing keys take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl TomlConfig {
    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
    }

    /// Load config with graceful degradation
    ///
    /// Missing file → defaults. Unparseable file → warning + defaults.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid config file, using defaults");
                Self::default()
            }
        }
    }

    /// Write config back to disk (used when the API key is changed via the API)
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Per-user config file path for a module (`~/.config/dd-analyzer/<module>.toml`)
pub fn user_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("dd-analyzer").join(format!("{}.toml", module_name)))
}

/// Root folder resolver
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
        }
    }

    /// Set command-line override (highest priority)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Resolve root folder following the priority order in the module docs
    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Ok(path) = std::env::var(ROOT_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(config_path) = user_config_path(&self.module_name) {
            if config_path.exists() {
                match TomlConfig::from_file(&config_path) {
                    Ok(TomlConfig {
                        root_folder: Some(root),
                        ..
                    }) => return root,
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "Ignoring unreadable config file"),
                }
            }
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Root folder layout and initialization
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.documents_dir())?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Stored document files live under `<root>/documents/<dd_id>/`
    pub fn documents_dir(&self) -> PathBuf {
        self.root_folder.join("documents")
    }

    /// User blueprint overrides
    pub fn blueprints_dir(&self) -> PathBuf {
        self.root_folder.join("blueprints")
    }

    /// Config file kept alongside the data
    pub fn config_path(&self, module_name: &str) -> PathBuf {
        self.root_folder.join(format!("{}.toml", module_name))
    }
}

/// User-Agent for outbound HTTP clients
pub fn get_user_agent() -> String {
    format!("dd-analyzer/{}", env!("CARGO_PKG_VERSION"))
}
