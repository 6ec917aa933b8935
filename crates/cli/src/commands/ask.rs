//! `parley ask` — Single-message mode.

use std::path::PathBuf;
use tokio::sync::mpsc;

pub async fn run(message: String, session: Option<String>, image: Option<PathBuf>) -> anyhow::Result<()> {
    let config = super::load_config()?;
    super::require_api_key(&config)?;
    let service = super::open_service(&config).await?;
    super::load_knowledge(&service, &config).await;

    let session_id = match session {
        Some(needle) => super::resolve_session(&service, &needle).await?,
        None => service.new_session().await?.id,
    };
    let image = image.as_deref().map(super::load_image).transpose()?;

    let (tx, mut rx) = mpsc::channel(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            super::render_event(&event);
        }
    });

    let result = service.send_turn(&session_id, &message, image, Some(tx)).await;
    let _ = printer.await;
    let reply = result.map_err(|e| anyhow::anyhow!(e.user_facing().message))?;

    println!("{}", reply.answer());
    eprintln!("\n  session {} · {}", super::short_id(&session_id), reply.title);
    Ok(())
}
