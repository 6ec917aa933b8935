//! Parley CLI — the main entry point.
//!
//! Commands:
//! - `onboard`  — Write a default config and create the data directory
//! - `chat`     — Interactive multimodal chat with session history
//! - `ask`      — Send one message and print the answer
//! - `ingest`   — Add a document to a session's or the global knowledge base
//! - `sessions` — List, inspect, rename or delete stored sessions
//! - `sync`     — Reconcile the local history cache with the session store
//! - `status`   — Show configuration and storage status

use clap::{ArgGroup, Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley — multimodal chat agent with tools, documents and memory",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration and data directory
    Onboard,

    /// Chat interactively
    Chat {
        /// Resume this session (id or id prefix)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Send a single message and print the answer
    Ask {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// Continue this session instead of starting a new one
        #[arg(short, long)]
        session: Option<String>,

        /// Attach an image (png, jpg, gif, webp)
        #[arg(short, long)]
        image: Option<PathBuf>,
    },

    /// Add a document to a knowledge base
    #[command(group(ArgGroup::new("target").required(true).args(["session", "global"])))]
    Ingest {
        /// PDF, text or markdown file
        file: PathBuf,

        /// Session whose knowledge base receives the document
        #[arg(short, long)]
        session: Option<String>,

        /// Add to the knowledge base shared by all sessions
        #[arg(short, long)]
        global: bool,
    },

    /// Manage stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Reconcile the local history cache with the session store
    Sync,

    /// Show system status
    Status,
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, newest first
    List,
    /// Print a session's messages
    Show { id: String },
    /// Retitle a session
    Rename { id: String, title: String },
    /// Delete a session and its knowledge base
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat { session } => commands::chat::run(session).await?,
        Commands::Ask {
            message,
            session,
            image,
        } => commands::ask::run(message, session, image).await?,
        Commands::Ingest {
            file,
            session,
            global,
        } => commands::ingest::run(file, session, global).await?,
        Commands::Sessions { action } => match action {
            SessionsAction::List => commands::sessions::list().await?,
            SessionsAction::Show { id } => commands::sessions::show(&id).await?,
            SessionsAction::Rename { id, title } => commands::sessions::rename(&id, &title).await?,
            SessionsAction::Delete { id } => commands::sessions::delete(&id).await?,
        },
        Commands::Sync => commands::sync::run().await?,
        Commands::Status => commands::status::run().await?,
    }

    Ok(())
}
