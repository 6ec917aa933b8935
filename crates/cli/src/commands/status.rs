//! `parley status` — Show configuration and storage status.

use parley_config::AppConfig;

pub async fn run() -> anyhow::Result<()> {
    let config = super::load_config()?;

    println!("💬 Parley Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Data dir:     {}", config.data_dir().display());
    println!(
        "  Knowledge:    {}{}",
        config.knowledge_dir().display(),
        if config.ingest.load_knowledge_dir { "" } else { " (not loaded)" }
    );
    println!("  Endpoint:     {}", config.api_base_url());
    println!("  Model:        {}", config.model);
    println!("  API key:      {}", if config.has_api_key() { "set" } else { "missing" });
    println!("  Max steps:    {}", config.agent.max_steps);
    println!("  Sessions:     {} backend", config.storage.session_backend);
    println!(
        "  Embeddings:   {} ({} dims)",
        config.embedding.provider, config.embedding.dimensions
    );
    println!(
        "  New sessions: tools {}, knowledge base {}",
        on_off(config.sessions.tools_enabled),
        on_off(config.sessions.rag_enabled)
    );

    if config.has_api_key() {
        let reachable = match parley_providers::build_from_config(&config).health_check().await {
            Ok(true) => "reachable".to_string(),
            Ok(false) => "responded with an error status".to_string(),
            Err(e) => format!("unreachable ({e})"),
        };
        println!("  Model API:    {reachable}");
    }

    let service = super::open_service(&config).await?;
    println!("\n  Stored sessions: {}", service.list_sessions().await.len());
    let stats = service.knowledge_stats().await?;
    if stats.is_empty() {
        println!("  Knowledge base:  empty");
    } else {
        println!("  Knowledge base:");
        for ns in stats {
            println!(
                "    {:<40} {:>3} docs {:>5} chunks  [{}]",
                ns.namespace, ns.documents, ns.chunks, ns.version
            );
        }
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `parley onboard` first");
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}
