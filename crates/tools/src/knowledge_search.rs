//! Knowledge search tool — retrieval over the session's uploaded documents.
//!
//! This is the one tool of kind [`ToolKind::Retrieval`]: the reasoning loop
//! treats a call to it as a retrieval request, gated by the session's
//! `rag_enabled` flag rather than `tools_enabled`.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolKind, ToolResult};
use parley_knowledge::{RetrievedChunk, Retriever};
use std::sync::Arc;

pub const KNOWLEDGE_SEARCH: &str = "knowledge_search";

/// Snippets longer than this are cut in the tool output.
const SNIPPET_CHARS: usize = 300;

pub struct KnowledgeSearchTool {
    retriever: Arc<Retriever>,
    default_k: usize,
}

impl KnowledgeSearchTool {
    pub fn new(retriever: Arc<Retriever>, default_k: usize) -> Self {
        Self {
            retriever,
            default_k: default_k.max(1),
        }
    }
}

#[async_trait]
impl Tool for KnowledgeSearchTool {
    fn name(&self) -> &str {
        KNOWLEDGE_SEARCH
    }

    fn description(&self) -> &str {
        "Search the documents the user uploaded to this conversation. Use it for questions \
         about their files or domain knowledge they provided."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Retrieval
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "What to look for in the knowledge base"
                },
                "k": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 10,
                    "description": "Maximum number of passages to return"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let k = arguments["k"].as_u64().map_or(self.default_k, |k| k as usize);

        let hits = self
            .retriever
            .retrieve(query, &ctx.session_id, k)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: KNOWLEDGE_SEARCH.into(),
                reason: e.to_string(),
            })?;

        let data: Vec<serde_json::Value> = hits
            .iter()
            .map(|h| {
                serde_json::json!({
                    "chunk_id": h.chunk.id,
                    "source": h.chunk.source,
                    "score": h.score,
                })
            })
            .collect();
        Ok(ToolResult::ok(format_hits(&hits)).with_data(serde_json::Value::Array(data)))
    }
}

/// Render hits as numbered passages with their source.
pub fn format_hits(hits: &[RetrievedChunk]) -> String {
    if hits.is_empty() {
        return "No relevant passages found in the knowledge base.".into();
    }
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let mut snippet: String = hit.chunk.text.chars().take(SNIPPET_CHARS).collect();
            if hit.chunk.text.chars().count() > SNIPPET_CHARS {
                snippet.push_str("...");
            }
            format!("[{}] {snippet}\nSource: {}", i + 1, hit.chunk.source)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
