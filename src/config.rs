//! Configuration parsing and validation.
//!
//! Settings come from an optional TOML file (`--config`, default
//! `./docq.toml`) with environment overrides applied on top. The service
//! credential is never read from the file: it comes from `OPENAI_API_KEY`.
//!
//! ```toml
//! [documents]
//! dir = "./assets"
//!
//! [assistant]
//! model = "gpt-4o-mini"
//!
//! [sync]
//! upload_concurrency = 4
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{DocqError, Result};

/// Environment variable carrying the service API key.
pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
/// Environment variable overriding `documents.dir`.
pub const PDF_DIR_VAR: &str = "PDF_DIR";
/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./docq.toml";

/// Upper bound on in-flight uploads.
pub const MAX_UPLOAD_CONCURRENCY: usize = 8;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_true")]
    pub validate_pdf: bool,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dir: default_documents_dir(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            validate_pdf: true,
        }
    }
}

fn default_documents_dir() -> PathBuf {
    PathBuf::from("./assets")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string(), "**/*.PDF".to_string()]
}
fn default_max_file_bytes() -> u64 {
    512 * 1024 * 1024
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles per attempt, capped at 32x.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_secs: default_max_poll_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    4
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_poll_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AssistantConfig {
    #[serde(default = "default_vector_store_name")]
    pub vector_store_name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            vector_store_name: default_vector_store_name(),
            model: default_model(),
            instructions: default_instructions(),
        }
    }
}

fn default_vector_store_name() -> String {
    "document_store".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_instructions() -> String {
    "You are a helpful document assistant that answers questions based on the content of \
     uploaded documents. Provide accurate information and cite your sources when possible. \
     If you don't know the answer or can't find relevant information, acknowledge this honestly."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    #[serde(default = "default_upload_concurrency")]
    pub upload_concurrency: usize,
    #[serde(default = "default_true")]
    pub wait_for_indexing: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: default_upload_concurrency(),
            wait_for_indexing: true,
        }
    }
}

fn default_upload_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

fn default_state_path() -> PathBuf {
    PathBuf::from("./.docq/state.json")
}

/// Load configuration.
///
/// With `Some(path)` the file must exist. With `None`, [`DEFAULT_CONFIG_PATH`]
/// is used if present and built-in defaults otherwise. Environment overrides
/// are applied last, then the result is validated.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// [`load_config`] with an injectable environment lookup.
pub fn load_config_with_env<F>(path: Option<&Path>, env: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(p) => parse_file(p)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                parse_file(default)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(dir) = env(PDF_DIR_VAR).filter(|d| !d.trim().is_empty()) {
        config.documents.dir = PathBuf::from(dir);
    }

    validate(&config)?;
    Ok(config)
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        DocqError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_str(&content)
}

/// Parse a TOML document into a [`Config`] (no environment overrides).
pub fn parse_str(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| DocqError::Config(format!("Failed to parse config file: {}", e)))
}

fn validate(config: &Config) -> Result<()> {
    let concurrency = config.sync.upload_concurrency;
    if concurrency == 0 || concurrency > MAX_UPLOAD_CONCURRENCY {
        return Err(DocqError::Config(format!(
            "sync.upload_concurrency must be in 1..={}, got {}",
            MAX_UPLOAD_CONCURRENCY, concurrency
        )));
    }
    if config.remote.timeout_secs == 0 {
        return Err(DocqError::Config("remote.timeout_secs must be > 0".into()));
    }
    if config.remote.poll_interval_ms == 0 {
        return Err(DocqError::Config(
            "remote.poll_interval_ms must be > 0".into(),
        ));
    }
    if config.assistant.model.trim().is_empty() {
        return Err(DocqError::Config("assistant.model must not be empty".into()));
    }
    if config.assistant.vector_store_name.trim().is_empty() {
        return Err(DocqError::Config(
            "assistant.vector_store_name must not be empty".into(),
        ));
    }
    if config.documents.include_globs.is_empty() {
        return Err(DocqError::Config(
            "documents.include_globs must list at least one pattern".into(),
        ));
    }
    Ok(())
}

/// Read the API credential from the process environment.
pub fn load_api_key() -> Result<String> {
    load_api_key_with_env(|key| std::env::var(key).ok())
}

pub fn load_api_key_with_env<F>(env: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    match env(API_KEY_VAR) {
        Some(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
        _ => Err(DocqError::Config(format!(
            "{} environment variable not set",
            API_KEY_VAR
        ))),
    }
}
