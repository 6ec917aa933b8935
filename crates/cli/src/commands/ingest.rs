//! `parley ingest` — Add a document to a knowledge base.

use anyhow::Context;
use std::path::PathBuf;

pub async fn run(file: PathBuf, session: Option<String>, global: bool) -> anyhow::Result<()> {
    let config = super::load_config()?;
    if config.embedding.provider == "remote" {
        super::require_api_key(&config)?;
    }
    let service = super::open_service(&config).await?;

    let bytes = std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let (chunks, target) = if global {
        let chunks = service.upload_global(&name, &bytes, None).await;
        (chunks, "the global knowledge base".to_string())
    } else {
        let needle = session.context("Choose --session <id> or --global")?;
        let session_id = super::resolve_session(&service, &needle).await?;
        let chunks = service.upload(&session_id, &name, &bytes, None).await;
        (chunks, format!("session {}", super::short_id(&session_id)))
    };
    let chunks = chunks.map_err(|e| anyhow::anyhow!(e.user_facing().message))?;

    println!("📄 Ingested {name}: {chunks} chunks into {target}");
    Ok(())
}
