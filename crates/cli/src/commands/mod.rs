pub mod ask;
pub mod chat;
pub mod ingest;
pub mod onboard;
pub mod sessions;
pub mod status;
pub mod sync;

use anyhow::{Context, bail};
use parley_agent::{AgentStreamEvent, ChatService};
use parley_config::AppConfig;
use parley_core::message::{ImageRef, SessionId};
use std::path::Path;
use tracing::debug;

pub fn load_config() -> anyhow::Result<AppConfig> {
    AppConfig::load().context("Failed to load config")
}

/// Fail early with setup instructions when no key is configured.
pub fn require_api_key(config: &AppConfig) -> anyhow::Result<()> {
    if config.has_api_key() {
        return Ok(());
    }
    eprintln!();
    eprintln!("  ERROR: No API key configured!");
    eprintln!();
    eprintln!("  Set one of these environment variables:");
    eprintln!("    PARLEY_API_KEY     = 'sk-...'   (recommended)");
    eprintln!("    DASHSCOPE_API_KEY  = 'sk-...'   (DashScope compatible mode)");
    eprintln!("    OPENAI_API_KEY     = 'sk-...'   (any OpenAI-compatible endpoint)");
    eprintln!();
    eprintln!("  Or add it to your config file:");
    eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    eprintln!();
    bail!("No API key found. See above for setup instructions.")
}

/// Open the session store, knowledge base and history cache.
pub async fn open_service(config: &AppConfig) -> anyhow::Result<ChatService> {
    debug!(config_dir = %AppConfig::config_dir().display(), "Opening chat service");
    let provider = parley_providers::build_from_config(config);
    ChatService::from_config(config, provider)
        .await
        .with_context(|| format!("Failed to open data directory {}", config.data_dir().display()))
}

/// Load the configured knowledge folder into the global knowledge base.
///
/// A failed load is reported and the command carries on.
pub async fn load_knowledge(service: &ChatService, config: &AppConfig) {
    if !config.ingest.load_knowledge_dir {
        return;
    }
    let dir = config.knowledge_dir();
    match service.load_knowledge_dir(&dir).await {
        Ok(load) => {
            for path in &load.skipped {
                eprintln!("  [Warning] Skipped knowledge file {}", path.display());
            }
            debug!(documents = load.documents, chunks = load.chunks, "Knowledge folder ready");
        }
        Err(e) => eprintln!("  [Warning] Knowledge folder {} not loaded: {e}", dir.display()),
    }
}

/// Find a session by full id or unique id prefix.
pub async fn resolve_session(service: &ChatService, needle: &str) -> anyhow::Result<SessionId> {
    let needle = needle.trim();
    let sessions = service.list_sessions().await;
    if let Some(exact) = sessions.iter().find(|s| s.id.as_str() == needle) {
        return Ok(exact.id.clone());
    }
    let matches: Vec<_> = sessions
        .iter()
        .filter(|s| !needle.is_empty() && s.id.as_str().starts_with(needle))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => bail!("No session matches '{needle}'. Run `parley sessions list`."),
        _ => bail!("'{needle}' matches {} sessions; use more characters", matches.len()),
    }
}

pub fn load_image(path: &Path) -> anyhow::Result<ImageRef> {
    let mime = ImageRef::mime_for_path(&path.to_string_lossy())
        .with_context(|| format!("Unsupported image type: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(ImageRef::from_bytes(mime, &bytes))
}

pub fn short_id(id: &SessionId) -> &str {
    let s = id.as_str();
    s.get(..8).unwrap_or(s)
}

/// Print the intermediate steps of a turn as they happen.
pub fn render_event(event: &AgentStreamEvent) {
    match event {
        AgentStreamEvent::Thought { content, .. } => {
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                eprintln!("  · {line}");
            }
        }
        AgentStreamEvent::ToolCall { name, input, .. } => {
            eprintln!("  → {name} {input}");
        }
        AgentStreamEvent::ToolResult {
            name,
            output,
            success,
            ..
        } => {
            let mark = if *success { "←" } else { "✗" };
            let first = output.lines().next().unwrap_or_default();
            eprintln!("  {mark} {name}: {first}");
        }
        AgentStreamEvent::Retrieval { hits, sources } => {
            eprintln!("  📚 {hits} passages from {}", sources.join(", "));
        }
        AgentStreamEvent::Error { message, .. } => {
            eprintln!("  [Error] {message}");
        }
        AgentStreamEvent::Answer { .. } | AgentStreamEvent::Done { .. } => {}
    }
}
