//! Message and session identity types.
//!
//! A [`Message`] is the unit the Session Store persists. Messages are
//! immutable once appended; the store assigns the session-scoped ordinal.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a session (conversation). Opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions (prompt only, never persisted)
    System,
    /// Tool execution result
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An image attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    /// Image bytes carried inline, base64-encoded.
    Inline { mime_type: String, data: String },
    /// Image reachable by URL.
    Url { url: String },
}

impl ImageRef {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::Inline {
            mime_type: mime_type.into(),
            data: BASE64.encode(bytes),
        }
    }

    /// The form vision models accept in an `image_url` content part.
    pub fn to_url(&self) -> String {
        match self {
            Self::Inline { mime_type, data } => format!("data:{mime_type};base64,{data}"),
            Self::Url { url } => url.clone(),
        }
    }

    /// Guess an image mime type from a file extension.
    pub fn mime_for_path(path: &str) -> Option<&'static str> {
        let ext = path.rsplit('.').next()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some("image/png"),
            "jpg" | "jpeg" => Some("image/jpeg"),
            "gif" => Some("image/gif"),
            "webp" => Some("image/webp"),
            _ => None,
        }
    }
}

/// One tool call made while producing an assistant message.
///
/// Recorded inside the message; never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
}

impl ToolInvocation {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// A single persisted message in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Position within the session. Assigned by the store on append.
    pub ordinal: u64,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Attached image, user turns only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageRef>,

    /// Tools called while producing this message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_invocations: Vec<ToolInvocation>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Set when generation was stopped before the answer completed
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            ordinal: 0,
            role,
            content: content.into(),
            image: None,
            tool_invocations: Vec::new(),
            timestamp: Utc::now(),
            truncated: false,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a tool message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn with_tool_invocations(mut self, invocations: Vec<ToolInvocation>) -> Self {
        self.tool_invocations = invocations;
        self
    }

    pub fn mark_truncated(mut self) -> Self {
        self.truncated = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_invocations.is_empty());
        assert!(!msg.truncated);
    }

    #[test]
    fn inline_image_becomes_data_url() {
        let image = ImageRef::from_bytes("image/png", b"abc");
        assert_eq!(image.to_url(), "data:image/png;base64,YWJj");
    }

    #[test]
    fn image_mime_from_extension() {
        assert_eq!(ImageRef::mime_for_path("cat.JPG"), Some("image/jpeg"));
        assert_eq!(ImageRef::mime_for_path("notes.txt"), None);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let json = serde_json::to_value(Message::assistant("4")).unwrap();
        assert!(json.get("image").is_none());
        assert!(json.get("tool_invocations").is_none());
        assert!(json.get("truncated").is_none());
        assert_eq!(json["role"], "assistant");
    }

    #[test]
    fn session_id_serializes_as_plain_string() {
        let id = SessionId::from("s1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"s1\"");
    }
}
