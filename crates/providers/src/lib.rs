//! Model provider implementations for Parley.
//!
//! All providers implement the `parley_core::Provider` trait; embedders
//! implement `parley_core::Embedder`. The factory builds both from
//! configuration.

pub mod embedder;
pub mod factory;
pub mod openai_compat;
pub mod retry;

pub use embedder::{HashEmbedder, ProviderEmbedder};
pub use factory::{build_embedder, build_from_config};
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryProvider};
