//! Error types for the Parley domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; all of them fold into
//! [`Error`], and every error maps onto one stable [`ErrorKind`] that the UI
//! layer renders.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The top-level error type for all Parley operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Session store errors ---
    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    // --- Vector store errors ---
    #[error("Vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    // --- Ingestion errors ---
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    // --- History sync errors ---
    #[error("History sync error: {0}")]
    Sync(#[from] SyncError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The user stopped the turn before it finished.
    #[error("Generation stopped by user")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable classification of every error the core can raise.
///
/// The UI keys its rendering off this, so variants are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad file type, malformed tool input, bad configuration. Never retried.
    InputValidation,
    /// Rate limit or timeout that may succeed on retry.
    TransientUpstream,
    /// Retries exhausted or credentials rejected.
    ModelUnavailable,
    /// Local cache and authoritative store disagree, or embeddings are incompatible.
    Consistency,
    /// Step budget hit. Informational; the turn still produces an answer.
    BudgetExceeded,
    /// A durable write failed.
    StorageFailure,
    /// Unknown or deleted session.
    NotFound,
    /// The user stopped generation.
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputValidation => "input_validation",
            Self::TransientUpstream => "transient_upstream",
            Self::ModelUnavailable => "model_unavailable",
            Self::Consistency => "consistency",
            Self::BudgetExceeded => "budget_exceeded",
            Self::StorageFailure => "storage_failure",
            Self::NotFound => "not_found",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the UI shows: a stable kind plus a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFacingError {
    pub kind: ErrorKind,
    pub message: String,
}

impl std::fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider(e) => e.kind(),
            Self::Tool(e) => e.kind(),
            Self::Store(e) => e.kind(),
            Self::VectorStore(e) => e.kind(),
            Self::Ingest(e) => e.kind(),
            Self::Sync(e) => e.kind(),
            Self::Config { .. } => ErrorKind::InputValidation,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Render this error for the user.
    pub fn user_facing(&self) -> UserFacingError {
        let kind = self.kind();
        let message = match kind {
            ErrorKind::ModelUnavailable => {
                format!("The model is unavailable right now ({self}). Please try again shortly.")
            }
            ErrorKind::StorageFailure => {
                format!("Your message was not saved ({self}).")
            }
            _ => self.to_string(),
        };
        UserFacingError { kind, message }
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),

    #[error("Model unavailable after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

impl ProviderError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => {
                ErrorKind::TransientUpstream
            }
            Self::ApiError { status_code, .. } if *status_code >= 500 => {
                ErrorKind::TransientUpstream
            }
            Self::InvalidResponse(_) => ErrorKind::Internal,
            _ => ErrorKind::ModelUnavailable,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid input for {tool_name}: {reason}")]
    InvalidInput { tool_name: String, reason: String },

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_ms}ms")]
    Timeout { tool_name: String, timeout_ms: u64 },
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::InvalidInput { .. } => ErrorKind::InputValidation,
            Self::Timeout { .. } => ErrorKind::TransientUpstream,
            Self::ExecutionFailed { .. } => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session was deleted: {0}")]
    SessionDeleted(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) | Self::SessionDeleted(_) => ErrorKind::NotFound,
            Self::Storage(_) | Self::MigrationFailed(_) => ErrorKind::StorageFailure,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum VectorStoreError {
    #[error(
        "Embedding version mismatch in '{namespace}': index built with {expected}, query uses {found}"
    )]
    EmbeddingVersionMismatch {
        namespace: String,
        expected: String,
        found: String,
    },

    #[error("Chunk {chunk_id} has an empty or wrongly sized embedding")]
    InvalidEmbedding { chunk_id: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl VectorStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmbeddingVersionMismatch { .. } => ErrorKind::Consistency,
            Self::InvalidEmbedding { .. } => ErrorKind::Internal,
            Self::Storage(_) => ErrorKind::StorageFailure,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum IngestError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document contains no extractable text")]
    EmptyDocument,

    #[error("Document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("Text extraction failed: {0}")]
    Extraction(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmbeddingFailed(_) => ErrorKind::TransientUpstream,
            _ => ErrorKind::InputValidation,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Local history cache I/O failed: {0}")]
    CacheIo(String),

    #[error("Local history cache is corrupt: {0}")]
    CacheCorrupt(String),

    /// The cache and the authoritative store disagree about a session.
    #[error("Local history diverged from the store for session {session_id}: {detail}")]
    Diverged { session_id: String, detail: String },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CacheIo(_) | Self::CacheCorrupt(_) => ErrorKind::StorageFailure,
            Self::Diverged { .. } => ErrorKind::Consistency,
        }
    }
}
