//! Builds the model provider and embedder from configuration.

use crate::embedder::{HashEmbedder, ProviderEmbedder};
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, RetryProvider};
use parley_config::AppConfig;
use parley_core::embedding::Embedder;
use parley_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

/// The chat provider the reasoning loop talks to: the configured endpoint
/// wrapped in bounded retries with a per-call timeout.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let endpoint = OpenAiCompatProvider::new(&config.provider, config.api_base_url(), api_key);
    info!(provider = %config.provider, model = %config.model, "Model provider configured");
    Arc::new(RetryProvider::new(
        Arc::new(endpoint),
        RetryPolicy::from_config(&config.agent),
    ))
}

/// The embedder shared by ingestion and retrieval.
pub fn build_embedder(config: &AppConfig, provider: Arc<dyn Provider>) -> Arc<dyn Embedder> {
    let embedder: Arc<dyn Embedder> = match config.embedding.provider.as_str() {
        "remote" => Arc::new(ProviderEmbedder::new(
            provider,
            config.embedding.model.clone(),
            config.embedding.dimensions,
            config.embedding.batch_size,
        )),
        _ => Arc::new(HashEmbedder::new(config.embedding.dimensions)),
    };
    info!(version = %embedder.version(), "Embedder configured");
    embedder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_dashscope() {
        let config = AppConfig::default();
        let provider = build_from_config(&config);
        assert_eq!(provider.name(), "dashscope");
    }

    #[test]
    fn default_embedder_is_hash() {
        let config = AppConfig::default();
        let embedder = build_embedder(&config, build_from_config(&config));
        assert_eq!(embedder.version().model, "hash-v1");
        assert_eq!(embedder.version().dimensions, 256);
    }

    #[test]
    fn remote_embedder_uses_configured_model() {
        let mut config = AppConfig::default();
        config.embedding.provider = "remote".into();
        config.embedding.dimensions = 1536;
        let embedder = build_embedder(&config, build_from_config(&config));
        assert_eq!(embedder.version().to_string(), "text-embedding-v2@1536");
    }
}
