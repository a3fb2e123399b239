//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the `--config` command-line flag
//! 2. `$MAILHARVEST_CONFIG` (environment variable)
//! 3. `~/.config/mailharvest/config.toml` (Linux/macOS)
//!    `%APPDATA%\mailharvest\config.toml` (Windows)
//! 4. Built-in defaults
//!
//! Credentials and endpoints may then be overridden from the environment
//! (see [`Config::apply_env`]). The resulting value is handed to each
//! collaborator's constructor; nothing reads configuration globally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarvestError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Mailbox connection.
    pub mailbox: MailboxConfig,
    /// Language-model inference service.
    pub inference: InferenceConfig,
    /// Blob storage for attachments.
    pub storage: StorageConfig,
    /// Analytical warehouse.
    pub warehouse: WarehouseConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Mailbox connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// IMAP server host name.
    pub host: String,
    /// IMAP over TLS port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Login password (or app password).
    pub password: String,
    /// Folder to read from.
    pub folder: String,
    /// How many of the most recent messages one run looks at.
    pub fetch_limit: usize,
}

/// Inference service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL of the generative language API.
    pub endpoint: String,
    /// API key.
    pub api_key: String,
    /// Candidate models, tried in order.
    pub models: Vec<String>,
    /// Attempts per model when rate limited.
    pub max_attempts: u32,
    /// Backoff base; attempt `n` (0-based) sleeps `base * 2^n`.
    pub base_delay_secs: u64,
    /// Sampling temperature.
    pub temperature: f32,
    /// Nucleus sampling mass.
    pub top_p: f32,
    /// Top-k sampling.
    pub top_k: u32,
    /// Output-token ceiling.
    pub max_output_tokens: u32,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host used to build public URLs.
    pub host: String,
    /// Base URL of the upload API.
    pub upload_endpoint: String,
    /// Bucket receiving attachments.
    pub bucket: String,
    /// OAuth bearer token. Falls back to `GCP_ACCESS_TOKEN`.
    pub access_token: String,
    /// First path segment of every object key.
    pub key_prefix: String,
}

/// Warehouse settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseConfig {
    /// Base URL of the warehouse REST API.
    pub endpoint: String,
    /// Cloud project owning the dataset.
    pub project_id: String,
    /// Dataset holding both tables.
    pub dataset: String,
    /// Table receiving engineer records.
    pub engineer_table: String,
    /// Table receiving project records.
    pub project_table: String,
    /// OAuth bearer token. Falls back to `GCP_ACCESS_TOKEN`.
    pub access_token: String,
}

// ── Default implementations ─────────────────────────────────────

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 993,
            username: String::new(),
            password: String::new(),
            folder: "INBOX".to_string(),
            fetch_limit: 200,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            models: vec!["models/gemini-2.0-flash".to_string()],
            max_attempts: 3,
            base_delay_secs: 5,
            temperature: 0.1,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 8192,
            timeout_secs: 120,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            host: "storage.googleapis.com".to_string(),
            upload_endpoint: "https://storage.googleapis.com/upload/storage/v1".to_string(),
            bucket: String::new(),
            access_token: String::new(),
            key_prefix: "attachments".to_string(),
        }
    }
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://bigquery.googleapis.com/bigquery/v2".to_string(),
            project_id: String::new(),
            dataset: "gmailData".to_string(),
            engineer_table: "EngineerData".to_string(),
            project_table: "ProjectData".to_string(),
            access_token: String::new(),
        }
    }
}

impl InferenceConfig {
    /// Backoff base as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }
}

impl Config {
    /// Overlay environment variables on top of the loaded file.
    ///
    /// `lookup` is `std::env::var(..).ok()` in production; tests pass a map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("IMAP_SERVER") {
            self.mailbox.host = v;
        }
        if let Some(v) = get("IMAP_PORT") {
            match v.trim().parse() {
                Ok(port) => self.mailbox.port = port,
                Err(_) => tracing::warn!(value = %v, "Ignoring invalid IMAP_PORT"),
            }
        }
        if let Some(v) = get("IMAP_USER") {
            self.mailbox.username = v;
        }
        if let Some(v) = get("IMAP_PASSWORD") {
            self.mailbox.password = v;
        }
        if let Some(v) = get("GOOGLE_API_KEY") {
            self.inference.api_key = v;
        }
        if let Some(v) = get("GCP_PROJECT_ID") {
            self.warehouse.project_id = v;
        }
        if let Some(v) = get("BIGQUERY_DATASET") {
            self.warehouse.dataset = v;
        }
        if let Some(v) = get("GCS_BUCKET_NAME") {
            self.storage.bucket = v;
        }
        if let Some(token) = get("GCP_ACCESS_TOKEN") {
            if self.storage.access_token.is_empty() {
                self.storage.access_token = token.clone();
            }
            if self.warehouse.access_token.is_empty() {
                self.warehouse.access_token = token;
            }
        }
    }

    /// Check that every field a pipeline run needs is present.
    ///
    /// All missing fields are reported together.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.mailbox.host.is_empty() {
            missing.push("mailbox.host (IMAP_SERVER)");
        }
        if self.mailbox.username.is_empty() {
            missing.push("mailbox.username (IMAP_USER)");
        }
        if self.mailbox.password.is_empty() {
            missing.push("mailbox.password (IMAP_PASSWORD)");
        }
        if self.inference.api_key.is_empty() {
            missing.push("inference.api_key (GOOGLE_API_KEY)");
        }
        if self.inference.models.is_empty() {
            missing.push("inference.models");
        }
        if self.storage.bucket.is_empty() {
            missing.push("storage.bucket (GCS_BUCKET_NAME)");
        }
        if self.warehouse.project_id.is_empty() {
            missing.push("warehouse.project_id (GCP_PROJECT_ID)");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )))
        }
    }
}

// ── Load ────────────────────────────────────────────────────────

/// Load configuration from `explicit` or the standard locations.
///
/// A missing file yields the defaults; an unreadable or malformed file is an
/// error, since running against half a configuration would hit the wrong
/// services.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => config_file_path(),
    };

    let Some(path) = path else {
        return Ok(Config::default());
    };

    if !path.exists() {
        if explicit.is_some() {
            return Err(HarvestError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| HarvestError::io(&path, e))?;
    let cfg = toml::from_str::<Config>(&contents)
        .map_err(|e| HarvestError::Config(format!("{}: {e}", path.display())))?;
    tracing::info!(path = %path.display(), "Loaded config");
    Ok(cfg)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MAILHARVEST_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    dirs::config_dir().map(|d| d.join("mailharvest").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailharvest")
}
