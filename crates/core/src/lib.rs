//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley chat agent.
//! This crate does **no I/O** — it defines the domain model that every other
//! crate implements against.
//!
//! ## Layout
//!
//! Every external capability is a trait here:
//! - [`Provider`] — the vision-capable chat model
//! - [`Embedder`] — text → vector
//! - [`VectorStore`] — namespaced chunk index
//! - [`SessionStore`] — the authoritative conversation record
//! - [`Tool`] — one callable capability, collected in a [`ToolRegistry`]
//!
//! Implementations live in their respective crates, so tests can swap any of
//! them for an in-memory double.

pub mod document;
pub mod embedding;
pub mod error;
pub mod event;
pub mod keyed_lock;
pub mod message;
pub mod provider;
pub mod schema;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use document::{DocumentChunk, NamespaceStats, ScoredChunk, VectorStore};
pub use embedding::{Embedder, EmbeddingVersion};
pub use error::{Error, ErrorKind, Result, UserFacingError};
pub use event::{DomainEvent, EventBus};
pub use keyed_lock::KeyedLocks;
pub use message::{ImageRef, Message, Role, SessionId, ToolInvocation};
pub use provider::{ChatMessage, Provider, ProviderRequest, ProviderResponse, ToolCallRequest};
pub use session::{SessionFlags, SessionMeta, SessionStore};
pub use tool::{Tool, ToolContext, ToolKind, ToolRegistry, ToolResult, ToolSpec};
