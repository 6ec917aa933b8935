//! Events a turn streams to the UI while it runs.
//!
//! Wire shape (JSON, tagged by `type`):
//! - `thought`     — reasoning text that came with a tool call
//! - `tool_call`   — a tool is about to run
//! - `tool_result` — the tool finished (or failed, or was unavailable)
//! - `retrieval`   — knowledge-base passages were found
//! - `answer`      — the final (or best-effort) answer
//! - `error`       — the turn failed
//! - `done`        — terminal state and step count

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Thought { step: u32, content: String },

    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    ToolResult {
        id: String,
        name: String,
        output: String,
        success: bool,
    },

    Retrieval { hits: usize, sources: Vec<String> },

    Answer { content: String, truncated: bool },

    Error { kind: String, message: String },

    Done {
        session_id: String,
        state: String,
        steps: u32,
        tool_calls_made: usize,
    },
}

impl AgentStreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Retrieval { .. } => "retrieval",
            Self::Answer { .. } => "answer",
            Self::Error { .. } => "error",
            Self::Done { .. } => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
