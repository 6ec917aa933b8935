//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from `~/.parley/config.toml` with environment
//! variable overrides. Validates all settings at startup; the result is
//! immutable for the lifetime of the process and handed to components at
//! construction.

use parley_core::SessionFlags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model endpoint flavor: "dashscope", "openai" or "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL override (required for "custom")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Vision-capable chat model
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Replaces the built-in system prompt when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Defaults for newly created sessions
    #[serde(default)]
    pub sessions: SessionDefaults,
}

fn default_provider() -> String {
    "dashscope".into()
}
fn default_model() -> String {
    "qwen-vl-max".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt.as_ref().map(|_| "[custom]"))
            .field("agent", &self.agent)
            .field("tools", &self.tools)
            .field("retrieval", &self.retrieval)
            .field("ingest", &self.ingest)
            .field("embedding", &self.embedding)
            .field("storage", &self.storage)
            .field("sessions", &self.sessions)
            .finish()
    }
}

/// Reasoning loop budgets and model-call policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model calls allowed per turn before the loop aborts
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    #[serde(default = "default_model_timeout_secs")]
    pub model_timeout_secs: u64,

    /// Retries after the first failed model call
    #[serde(default = "default_model_max_retries")]
    pub model_max_retries: u32,

    /// First backoff delay; doubles per retry
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Stored messages sent back to the model as history
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Retrieve once before the first step and put the hits in the system prompt
    #[serde(default)]
    pub prefetch_context: bool,
}

fn default_max_steps() -> u32 {
    8
}
fn default_model_timeout_secs() -> u64 {
    60
}
fn default_model_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_history_window() -> usize {
    20
}

impl AgentSettings {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            model_timeout_secs: default_model_timeout_secs(),
            model_max_retries: default_model_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            history_window: default_history_window(),
            prefetch_context: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_tool_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Retries for a tool call that timed out
    #[serde(default = "default_tool_max_retries")]
    pub max_retries: u32,
}

fn default_tool_timeout_secs() -> u64 {
    15
}
fn default_tool_max_retries() -> u32 {
    1
}

impl ToolSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_tool_timeout_secs(),
            max_retries: default_tool_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Hits scoring below this are dropped
    #[serde(default)]
    pub min_score: f32,

    /// Top up session hits from the global knowledge base
    #[serde(default)]
    pub include_global: bool,
}

fn default_top_k() -> usize {
    4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
            include_global: false,
        }
    }
}

/// Chunking parameters, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,

    /// Folder loaded into the global knowledge base at startup
    /// (default `<data_dir>/knowledge`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_dir: Option<PathBuf>,

    /// Set to false to skip the startup load
    #[serde(default = "default_true")]
    pub load_knowledge_dir: bool,
}

fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_max_document_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_document_bytes: default_max_document_bytes(),
            knowledge_dir: None,
            load_knowledge_dir: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (offline, deterministic) or "remote" (the provider's /embeddings)
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,

    /// Texts per remote embedding request
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}
fn default_embedding_model() -> String {
    "text-embedding-v2".into()
}
fn default_embedding_dimensions() -> usize {
    256
}
fn default_embedding_batch_size() -> usize {
    25
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            batch_size: default_embedding_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for sessions, vectors and the history cache (default `~/.parley/data`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// "file" or "sqlite"
    #[serde(default = "default_session_backend")]
    pub session_backend: String,

    /// "file" or "memory"
    #[serde(default = "default_vector_backend")]
    pub vector_backend: String,
}

fn default_session_backend() -> String {
    "file".into()
}
fn default_vector_backend() -> String {
    "file".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            session_backend: default_session_backend(),
            vector_backend: default_vector_backend(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    #[serde(default = "default_true")]
    pub tools_enabled: bool,

    #[serde(default = "default_true")]
    pub rag_enabled: bool,
}

impl SessionDefaults {
    pub fn flags(&self) -> SessionFlags {
        SessionFlags {
            tools_enabled: self.tools_enabled,
            rag_enabled: self.rag_enabled,
        }
    }
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            tools_enabled: true,
            rag_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.parley/config.toml).
    ///
    /// Environment overrides:
    /// - `PARLEY_API_KEY` > `DASHSCOPE_API_KEY` > `OPENAI_API_KEY` (when no key is configured)
    /// - `PARLEY_MODEL`, `PARLEY_API_URL`, `PARLEY_DATA_DIR`, `PARLEY_KNOWLEDGE_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through a lookup function.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = var("PARLEY_API_KEY")
                .or_else(|| var("DASHSCOPE_API_KEY"))
                .or_else(|| var("OPENAI_API_KEY"));
        }
        if let Some(model) = var("PARLEY_MODEL") {
            self.model = model;
        }
        if let Some(url) = var("PARLEY_API_URL") {
            self.api_url = Some(url);
        }
        if let Some(dir) = var("PARLEY_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("PARLEY_KNOWLEDGE_DIR") {
            self.ingest.knowledge_dir = Some(PathBuf::from(dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("data"))
    }

    /// Folder of shared documents for the global knowledge base.
    pub fn knowledge_dir(&self) -> PathBuf {
        self.ingest
            .knowledge_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("knowledge"))
    }

    /// Base URL of the chat endpoint.
    pub fn api_base_url(&self) -> String {
        if let Some(url) = &self.api_url {
            return url.trim_end_matches('/').to_string();
        }
        match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1".into(),
            _ => "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !matches!(self.provider.as_str(), "dashscope" | "openai" | "custom") {
            return Err(ConfigError::ValidationError(format!(
                "unknown provider '{}' (expected dashscope, openai or custom)",
                self.provider
            )));
        }
        if self.provider == "custom" && self.api_url.is_none() {
            return Err(ConfigError::ValidationError(
                "provider 'custom' requires api_url".into(),
            ));
        }
        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError("agent.max_steps must be >= 1".into()));
        }
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::ValidationError("retrieval.top_k must be >= 1".into()));
        }
        if self.ingest.chunk_size == 0 {
            return Err(ConfigError::ValidationError("ingest.chunk_size must be > 0".into()));
        }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size {
            return Err(ConfigError::ValidationError(
                "ingest.chunk_overlap must be smaller than ingest.chunk_size".into(),
            ));
        }
        if self.embedding.dimensions == 0 || self.embedding.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimensions and embedding.batch_size must be > 0".into(),
            ));
        }
        if !matches!(self.embedding.provider.as_str(), "hash" | "remote") {
            return Err(ConfigError::ValidationError(format!(
                "unknown embedding.provider '{}' (expected hash or remote)",
                self.embedding.provider
            )));
        }
        if !matches!(self.storage.session_backend.as_str(), "file" | "sqlite") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage.session_backend '{}'",
                self.storage.session_backend
            )));
        }
        if !matches!(self.storage.vector_backend.as_str(), "file" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown storage.vector_backend '{}'",
                self.storage.vector_backend
            )));
        }
        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
            agent: AgentSettings::default(),
            tools: ToolSettings::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
            embedding: EmbeddingConfig::default(),
            storage: StorageConfig::default(),
            sessions: SessionDefaults::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for parley_core::Error {
    fn from(e: ConfigError) -> Self {
        parley_core::Error::Config {
            message: e.to_string(),
        }
    }
}
