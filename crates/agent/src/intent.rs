//! Turning a model reply into what the loop should do next.
//!
//! Native function calls win. Models without them can reply in text:
//!
//! ```text
//! Thought: I should add the numbers
//! Action: calculator
//! Action Input: {"a": 2, "b": 2, "op": "+"}
//! ```
//!
//! Anything else is a final answer (a leading `Final Answer:` is stripped).

use parley_core::provider::ChatMessage;
use serde_json::Value;

/// One requested tool or retrieval call.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    Answer(String),
    Act {
        /// Reasoning text that came with the calls
        thought: String,
        calls: Vec<ActionRequest>,
        /// `true` for native tool calls, `false` for the text format
        native: bool,
    },
}

/// Classify a reply. `step` makes ids for text-format calls unique per turn.
pub fn parse(message: &ChatMessage, step: u32) -> Intent {
    if !message.tool_calls.is_empty() {
        let calls = message
            .tool_calls
            .iter()
            .map(|tc| ActionRequest {
                id: tc.id.clone(),
                name: tc.name.trim().to_string(),
                input: parse_arguments(&tc.arguments),
            })
            .collect();
        return Intent::Act {
            thought: strip_label(message.content.trim(), "Thought:").to_string(),
            calls,
            native: true,
        };
    }

    if let Some((thought, call)) = parse_text_action(&message.content, step) {
        return Intent::Act {
            thought,
            calls: vec![call],
            native: false,
        };
    }

    let text = message.content.trim();
    let answer = match find_line_label(text, "Final Answer:") {
        Some(at) => text[at + "Final Answer:".len()..].trim(),
        None => text,
    };
    Intent::Answer(answer.to_string())
}

/// Arguments arrive as a JSON string. Empty means no arguments; anything
/// unparseable is passed through as a string so schema validation rejects it.
fn parse_arguments(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_text_action(content: &str, step: u32) -> Option<(String, ActionRequest)> {
    let action_at = find_line_label(content, "Action:")?;
    let name_line = content[action_at + "Action:".len()..].lines().next()?;
    let name = name_line.trim().trim_matches('`').trim();
    if name.is_empty() {
        return None;
    }

    let after_name = &content[action_at..];
    let input = match find_line_label(after_name, "Action Input:") {
        Some(at) => {
            let mut raw = &after_name[at + "Action Input:".len()..];
            if let Some(end) = find_line_label(raw, "Observation:") {
                raw = &raw[..end];
            }
            parse_arguments(strip_fences(raw))
        }
        None => Value::Object(serde_json::Map::new()),
    };

    let thought = strip_label(content[..action_at].trim(), "Thought:").to_string();
    Some((
        thought,
        ActionRequest {
            id: format!("text_call_{step}"),
            name: name.to_string(),
            input,
        },
    ))
}

/// Byte offset of `label` when it starts a line (case-insensitive).
fn find_line_label(text: &str, label: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let indent = line.len() - trimmed.len();
        if starts_with_ignore_case(trimmed, label) {
            return Some(offset + indent);
        }
        offset += line.len();
    }
    None
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.len() >= prefix.len()
        && text.is_char_boundary(prefix.len())
        && text[..prefix.len()].eq_ignore_ascii_case(prefix)
}

fn strip_label<'a>(text: &'a str, label: &str) -> &'a str {
    if starts_with_ignore_case(text, label) {
        text[label.len()..].trim()
    } else {
        text
    }
}

fn strip_fences(raw: &str) -> &str {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("```json")
        .or_else(|| raw.strip_prefix("```"))
        .unwrap_or(raw);
    raw.strip_suffix("```").unwrap_or(raw).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::provider::ToolCallRequest;

    #[test]
    fn plain_text_is_an_answer() {
        let intent = parse(&ChatMessage::assistant("  The answer is 4. "), 1);
        assert_eq!(intent, Intent::Answer("The answer is 4.".into()));
    }

    #[test]
    fn final_answer_label_is_stripped() {
        let msg = ChatMessage::assistant("Thought: done\nFinal Answer: 2 + 2 = 4");
        assert_eq!(parse(&msg, 1), Intent::Answer("2 + 2 = 4".into()));
    }

    #[test]
    fn native_tool_call() {
        let msg = ChatMessage::assistant("Let me compute").with_tool_calls(vec![ToolCallRequest {
            id: "call_1".into(),
            name: "calculator".into(),
            arguments: r#"{"a":2,"b":2,"op":"+"}"#.into(),
        }]);
        match parse(&msg, 1) {
            Intent::Act { thought, calls, native } => {
                assert!(native);
                assert_eq!(thought, "Let me compute");
                assert_eq!(calls[0].name, "calculator");
                assert_eq!(calls[0].input["op"], "+");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn native_call_with_empty_arguments() {
        let msg = ChatMessage::assistant("").with_tool_calls(vec![ToolCallRequest {
            id: "c".into(),
            name: "current_time".into(),
            arguments: String::new(),
        }]);
        let Intent::Act { calls, .. } = parse(&msg, 1) else {
            panic!("expected action");
        };
        assert_eq!(calls[0].input, serde_json::json!({}));
    }

    #[test]
    fn malformed_native_arguments_pass_through_as_string() {
        let msg = ChatMessage::assistant("").with_tool_calls(vec![ToolCallRequest {
            id: "c".into(),
            name: "calculator".into(),
            arguments: "{not json".into(),
        }]);
        let Intent::Act { calls, .. } = parse(&msg, 1) else {
            panic!("expected action");
        };
        assert_eq!(calls[0].input, Value::String("{not json".into()));
    }

    #[test]
    fn text_format_action() {
        let msg = ChatMessage::assistant(
            "Thought: I should add them\nAction: calculator\nAction Input: {\"expression\": \"2+2\"}",
        );
        match parse(&msg, 3) {
            Intent::Act { thought, calls, native } => {
                assert!(!native);
                assert_eq!(thought, "I should add them");
                assert_eq!(calls[0].id, "text_call_3");
                assert_eq!(calls[0].input["expression"], "2+2");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn text_format_with_fences_and_hallucinated_observation() {
        let msg = ChatMessage::assistant(
            "action: knowledge_search\naction input: ```json\n{\"query\": \"warranty\"}\n```\nObservation: made up",
        );
        let Intent::Act { calls, .. } = parse(&msg, 1) else {
            panic!("expected action");
        };
        assert_eq!(calls[0].name, "knowledge_search");
        assert_eq!(calls[0].input["query"], "warranty");
    }

    #[test]
    fn action_word_mid_sentence_is_not_an_intent() {
        let msg = ChatMessage::assistant("Taking Action: now is not a tool call");
        assert!(matches!(parse(&msg, 1), Intent::Answer(_)));
    }
}
