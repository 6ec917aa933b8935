//! Durable stores for Parley: session logs and per-namespace vector indexes.
//!
//! Two families live here:
//! - [`SessionStore`](parley_core::SessionStore) implementations: in-memory,
//!   JSON files, and SQLite (feature `sqlite`).
//! - [`VectorStore`](parley_core::VectorStore) implementations: in-memory and
//!   JSON files.

pub mod atomic;
pub mod file_backend;
pub mod file_vectors;
pub mod in_memory;
pub mod index;
pub mod record;
pub mod vector;

#[cfg(test)]
mod store_tests;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use file_backend::FileSessionStore;
pub use file_vectors::FileVectorStore;
pub use in_memory::{InMemorySessionStore, InMemoryVectorStore};
pub use record::SessionRecord;
pub use vector::{cosine_similarity, rank_chunks};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSessionStore;
