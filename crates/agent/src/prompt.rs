//! Prompt assembly for one model call.

use parley_core::document::ScoredChunk;
use parley_core::message::{Message, Role};
use parley_core::provider::ChatMessage;
use parley_core::tool::ToolSpec;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful multimodal assistant.

What you can do:
1. Answer questions from documents the user uploaded (PDF, text, markdown) through the knowledge base.
2. Understand images the user attaches.
3. Call tools such as the calculator, current time, weather and web search.
4. Combine what you see in an image with what the documents say.

Rules:
- When knowledge-base passages are provided, base your answer on them and say which document they came from.
- Never claim that no document was uploaded when passages or an uploaded-file list are present.
- Use a tool when it gives a more reliable answer than recalling from memory, for example arithmetic.
- Answer naturally, accurately and concisely.";

const TEXT_ACTION_HINT: &str = "If you cannot call functions directly, request one tool per reply in exactly this form:
Thought: <your reasoning>
Action: <tool name>
Action Input: <JSON arguments>
You will receive the result as an Observation. When you are done, reply with the answer only.";

/// Everything the system message is built from.
pub struct SystemContext<'a> {
    pub base: &'a str,
    pub tools: &'a [ToolSpec],
    pub documents: &'a [String],
    pub prefetched: &'a [ScoredChunk],
}

pub fn system_message(ctx: &SystemContext<'_>) -> ChatMessage {
    let mut text = ctx.base.trim().to_string();

    if ctx.tools.is_empty() {
        text.push_str("\n\nNo tools are available in this conversation. Answer directly.");
    } else {
        text.push_str("\n\n## Available tools\n");
        for spec in ctx.tools {
            text.push_str(&format!("- {}: {}\n", spec.name, spec.description));
        }
        text.push('\n');
        text.push_str(TEXT_ACTION_HINT);
    }

    if !ctx.documents.is_empty() {
        text.push_str(&format!(
            "\n\n## Uploaded files\nThe user uploaded these files in this conversation: {}",
            ctx.documents.join(", ")
        ));
    }

    if !ctx.prefetched.is_empty() {
        text.push_str("\n\n## Knowledge base passages\n");
        text.push_str(&format_passages(ctx.prefetched));
    }

    ChatMessage::system(text)
}

/// Numbered passages with their source, as shown to the model.
pub fn format_passages(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "--- Passage {} (source: {}) ---\n{}",
                i + 1,
                hit.chunk.source,
                hit.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The last `window` stored messages, in model form.
///
/// Stored tool messages are skipped: they have no call id to pair with.
/// A cut that would start on an assistant reply is moved past it.
pub fn history_messages(history: &[Message], window: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    let mut tail = &history[start..];
    while let Some(first) = tail.first() {
        if first.role == Role::User {
            break;
        }
        tail = &tail[1..];
    }

    tail.iter()
        .filter_map(|m| match m.role {
            Role::User => Some(user_message(m)),
            Role::Assistant => Some(ChatMessage::assistant(m.content.clone())),
            Role::Tool | Role::System => None,
        })
        .collect()
}

/// A stored user message, with its image attached for the vision model.
pub fn user_message(message: &Message) -> ChatMessage {
    let chat = ChatMessage::user(message.content.clone());
    match &message.image {
        Some(image) => chat.with_image(image.clone()),
        None => chat,
    }
}

/// Feedback for a text-format action, sent back as the next user turn.
pub fn observation_message(tool: &str, observation: &str) -> ChatMessage {
    ChatMessage::user(format!("Observation from {tool}:\n{observation}"))
}
