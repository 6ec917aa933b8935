//! `parley sessions` — Session management commands.

use parley_core::message::Role;

pub async fn list() -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::open_service(&config).await?;
    let sessions = service.list_sessions().await;

    if sessions.is_empty() {
        println!("   No sessions yet. Run `parley chat` to start one.");
        return Ok(());
    }
    println!("💬 Sessions ({})", sessions.len());
    for s in sessions {
        println!(
            "  {}  {:<24} {:>4} msgs  {}",
            super::short_id(&s.id),
            s.title,
            s.message_count,
            s.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}

pub async fn show(needle: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::open_service(&config).await?;
    let id = super::resolve_session(&service, needle).await?;
    let messages = service.switch_to(&id).await?;

    if let Some(meta) = service.meta(&id).await? {
        println!("💬 {} ({})", meta.title, meta.id);
        println!(
            "   tools {}, knowledge base {}",
            if meta.flags.tools_enabled { "on" } else { "off" },
            if meta.flags.rag_enabled { "on" } else { "off" }
        );
        if !meta.documents.is_empty() {
            println!("   documents: {}", meta.documents.join(", "));
        }
        println!();
    }
    for m in &messages {
        let who = match m.role {
            Role::User => "You",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool",
            Role::System => "System",
        };
        let image = if m.image.is_some() { " [image]" } else { "" };
        println!("  #{:<3} {who}{image} > {}", m.ordinal, m.content);
        for call in &m.tool_invocations {
            println!("        ↳ {} {}", call.tool_name, call.input);
        }
    }
    Ok(())
}

pub async fn rename(needle: &str, title: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::open_service(&config).await?;
    let id = super::resolve_session(&service, needle).await?;
    let meta = service.rename(&id, title).await?;
    println!("✏️  Session {} is now \"{}\"", super::short_id(&id), meta.title);
    Ok(())
}

pub async fn delete(needle: &str) -> anyhow::Result<()> {
    let config = super::load_config()?;
    let service = super::open_service(&config).await?;
    let id = super::resolve_session(&service, needle).await?;
    service.delete(&id).await?;
    println!("🗑️  Deleted session {}", super::short_id(&id));
    Ok(())
}
