//! Built-in tools for Parley.
//!
//! The set is fixed: `calculator`, `current_time`, `weather_lookup` and
//! `web_search` are action tools; `knowledge_search` is the retrieval tool
//! and needs a [`Retriever`](parley_knowledge::Retriever), so it is added
//! separately with [`register_knowledge`].

pub mod calculator;
pub mod current_time;
pub mod knowledge_search;
pub mod weather_lookup;
pub mod web_search;

use parley_config::ToolSettings;
use parley_core::tool::ToolRegistry;
use parley_knowledge::Retriever;
use std::sync::Arc;

pub use calculator::CalculatorTool;
pub use current_time::CurrentTimeTool;
pub use knowledge_search::{KNOWLEDGE_SEARCH, KnowledgeSearchTool};
pub use weather_lookup::WeatherLookupTool;
pub use web_search::WebSearchTool;

/// A registry with every action tool, using the configured call timeout.
pub fn default_registry(settings: &ToolSettings) -> ToolRegistry {
    let mut registry = ToolRegistry::new().with_call_timeout(settings.call_timeout());
    registry.register(Box::new(CalculatorTool));
    registry.register(Box::new(CurrentTimeTool));
    registry.register(Box::new(WeatherLookupTool));
    registry.register(Box::new(WebSearchTool));
    registry
}

/// Add `knowledge_search` backed by `retriever`.
pub fn register_knowledge(registry: &mut ToolRegistry, retriever: Arc<Retriever>, default_k: usize) {
    registry.register(Box::new(KnowledgeSearchTool::new(retriever, default_k)));
}
