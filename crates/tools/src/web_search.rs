//! Web search tool — offline mock results.
//!
//! Results are canned per topic with a generic fallback, so conversations that
//! exercise search behave the same on every run and need no network.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolResult};
use serde::Serialize;

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web (simulated). Returns titles, URLs and snippets for a query."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 5,
                    "description": "Number of results to return (default 3)"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let count = arguments["num_results"].as_u64().unwrap_or(3) as usize;

        let hits = search(query, count);
        let output = hits
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {} <{}>\n   {}", i + 1, h.title, h.url, h.snippet))
            .collect::<Vec<_>>()
            .join("\n");
        let data = serde_json::to_value(&hits).map_err(|e| ToolError::ExecutionFailed {
            tool_name: "web_search".into(),
            reason: e.to_string(),
        })?;
        Ok(ToolResult::ok(output).with_data(data))
    }
}

#[derive(Debug, Clone, Serialize)]
struct SearchHit {
    title: String,
    url: String,
    snippet: String,
}

fn hit(title: &str, url: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        url: url.into(),
        snippet: snippet.into(),
    }
}

fn search(query: &str, count: usize) -> Vec<SearchHit> {
    let q = query.to_lowercase();

    let topics: [(&[&str], Vec<SearchHit>); 2] = [
        (
            &["rust", "cargo"],
            vec![
                hit(
                    "The Rust Programming Language",
                    "https://doc.rust-lang.org/book/",
                    "The official book: ownership, borrowing, traits and fearless concurrency.",
                ),
                hit(
                    "Rust Standard Library",
                    "https://doc.rust-lang.org/std/",
                    "API reference for the Rust standard library.",
                ),
            ],
        ),
        (
            &["qwen", "vision", "multimodal"],
            vec![hit(
                "Qwen-VL model overview",
                "https://help.aliyun.com/zh/model-studio/",
                "Vision-language models that answer questions about images and text.",
            )],
        ),
    ];

    for (keywords, hits) in &topics {
        if keywords.iter().any(|k| q.contains(k)) {
            return hits.iter().take(count).cloned().collect();
        }
    }

    let encoded = query.split_whitespace().collect::<Vec<_>>().join("+");
    (1..=count)
        .map(|i| SearchHit {
            title: format!("Result {i} for: {query}"),
            url: format!("https://example.com/search?q={encoded}&p={i}"),
            snippet: format!("Simulated result for '{query}'. No live search backend is configured."),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::SessionId;

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::from("s1"))
    }

    #[tokio::test]
    async fn topic_results() {
        let result = WebSearchTool
            .execute(serde_json::json!({"query": "learn Rust ownership"}), &ctx())
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("The Rust Programming Language"));
    }

    #[tokio::test]
    async fn fallback_respects_num_results() {
        let result = WebSearchTool
            .execute(serde_json::json!({"query": "gardening tips", "num_results": 2}), &ctx())
            .await
            .unwrap();
        let hits = result.data.unwrap();
        assert_eq!(hits.as_array().unwrap().len(), 2);
        assert!(hits[0]["url"].as_str().unwrap().contains("gardening+tips"));
    }

    #[test]
    fn spec_is_action_tool() {
        let spec = WebSearchTool.spec();
        assert_eq!(spec.name, "web_search");
        assert_eq!(spec.kind, parley_core::tool::ToolKind::Action);
    }
}
