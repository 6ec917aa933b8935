//! Knowledge base for Parley: turn uploaded documents into embedded chunks
//! and find the ones relevant to a question.
//!
//! - [`DocumentIngestor`] extracts text, splits it with a [`Chunker`], embeds
//!   the pieces and writes them to a [`VectorStore`](parley_core::VectorStore).
//! - [`Retriever`] embeds a query with the same embedder and ranks chunks of a
//!   session's namespace (optionally topped up from the global one).

pub mod chunker;
pub mod extract;
pub mod ingestor;
pub mod retriever;

pub use chunker::Chunker;
pub use extract::{extract_text, mime_from_path, SUPPORTED_MIME_TYPES};
pub use ingestor::{DirectoryLoad, DocumentIngestor};
pub use retriever::{RetrievedChunk, Retriever};
