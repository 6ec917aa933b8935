//! `parley chat` — Interactive chat with session history.
//!
//! Plain lines are sent as messages; lines starting with `/` are commands.
//! Ctrl+C during a reply stops it; Ctrl+C at the prompt quits.

use anyhow::{Context, bail};
use parley_agent::ChatService;
use parley_core::message::{ImageRef, Message, Role, SessionId};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "\
  /new                 start a new session
  /sessions            list sessions
  /switch <id>         resume a session (id prefix is enough)
  /rename <title>      retitle the current session
  /delete [id]         delete a session (default: current)
  /upload <file>       add a PDF, text or markdown file to this session
  /image <file>        attach an image to your next message
  /tools on|off        enable or disable tools for this session
  /rag on|off          enable or disable the knowledge base for this session
  /help                show this help
  /exit                quit";

enum Flow {
    Continue,
    Exit,
}

struct ChatState {
    current: SessionId,
    pending_image: Option<ImageRef>,
}

pub async fn run(session: Option<String>) -> anyhow::Result<()> {
    let config = super::load_config()?;
    super::require_api_key(&config)?;
    let service = super::open_service(&config).await?;
    super::load_knowledge(&service, &config).await;

    let current = match session {
        Some(needle) => {
            let id = super::resolve_session(&service, &needle).await?;
            let messages = service.switch_to(&id).await?;
            print_transcript(&messages);
            id
        }
        None => service.new_session().await?.id,
    };
    let mut state = ChatState {
        current,
        pending_image: None,
    };

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          Parley — Interactive Chat           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Model:     {}", config.model);
    println!("  Session:   {}", super::short_id(&state.current));
    println!("  Data:      {}", config.data_dir().display());
    println!();
    println!("  Type your message and press Enter. /help lists commands.");
    println!("  Ctrl+C stops a reply; /exit quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            match handle_command(&service, &mut state, command).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => break,
                Err(e) => eprintln!("  [Error] {e:#}"),
            }
            println!();
            continue;
        }

        let image = state.pending_image.take();
        run_turn(&service, &state.current, line, image).await;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}

async fn run_turn(service: &ChatService, session_id: &SessionId, text: &str, image: Option<ImageRef>) {
    let (tx, mut rx) = mpsc::channel(32);
    let turn = service.send_turn(session_id, text, image, Some(tx));
    tokio::pin!(turn);

    let result = loop {
        tokio::select! {
            result = &mut turn => break result,
            Some(event) = rx.recv() => super::render_event(&event),
            _ = tokio::signal::ctrl_c() => {
                if service.stop(session_id) {
                    eprintln!("  [Stopping after the current step...]");
                }
            }
        }
    };
    while let Ok(event) = rx.try_recv() {
        super::render_event(&event);
    }

    println!();
    match result {
        Ok(reply) => match &reply.assistant {
            Some(message) => print_assistant(&message.content),
            None => println!("  [Stopped before any answer]"),
        },
        Err(e) => eprintln!("  [Error] {}", e.user_facing().message),
    }
    println!();
}

async fn handle_command(service: &ChatService, state: &mut ChatState, command: &str) -> anyhow::Result<Flow> {
    let (name, arg) = match command.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (command, ""),
    };

    match name {
        "exit" | "quit" => return Ok(Flow::Exit),
        "help" => println!("{HELP}"),
        "new" => {
            state.current = service.new_session().await?.id;
            println!("  Started session {}", super::short_id(&state.current));
        }
        "sessions" => {
            for s in service.list_sessions().await {
                let marker = if s.id == state.current { "*" } else { " " };
                println!(
                    "  {marker} {}  {:<24} {:>4} msgs",
                    super::short_id(&s.id),
                    s.title,
                    s.message_count
                );
            }
        }
        "switch" => {
            let id = super::resolve_session(service, arg).await?;
            let messages = service.switch_to(&id).await?;
            state.current = id;
            print_transcript(&messages);
        }
        "rename" => {
            if arg.is_empty() {
                bail!("Usage: /rename <title>");
            }
            let meta = service.rename(&state.current, arg).await?;
            println!("  Renamed to \"{}\"", meta.title);
        }
        "delete" => {
            let target = if arg.is_empty() {
                state.current.clone()
            } else {
                super::resolve_session(service, arg).await?
            };
            service.delete(&target).await?;
            println!("  Deleted session {}", super::short_id(&target));
            if target == state.current {
                state.current = service.new_session().await?.id;
                println!("  Started session {}", super::short_id(&state.current));
            }
        }
        "upload" => {
            if arg.is_empty() {
                bail!("Usage: /upload <file>");
            }
            let path = Path::new(arg);
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {arg}"))?;
            let file_name = path
                .file_name()
                .map_or_else(|| arg.to_string(), |n| n.to_string_lossy().into_owned());
            let chunks = service
                .upload(&state.current, &file_name, &bytes, None)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_facing().message))?;
            println!("  📄 {file_name}: {chunks} chunks added to this session");
        }
        "image" => {
            if arg.is_empty() {
                bail!("Usage: /image <file>");
            }
            state.pending_image = Some(super::load_image(Path::new(arg))?);
            println!("  🖼️  Image attached to your next message");
        }
        "tools" | "rag" => {
            let enabled = match arg {
                "on" => true,
                "off" => false,
                _ => bail!("Usage: /{name} on|off"),
            };
            let mut flags = service
                .meta(&state.current)
                .await?
                .context("Current session no longer exists")?
                .flags;
            if name == "tools" {
                flags.tools_enabled = enabled;
            } else {
                flags.rag_enabled = enabled;
            }
            service.set_flags(&state.current, flags).await?;
            println!("  {name} {arg} for this session");
        }
        other => bail!("Unknown command /{other}. Type /help."),
    }
    Ok(Flow::Continue)
}

fn print_assistant(text: &str) {
    for line in text.lines() {
        println!("  Assistant > {line}");
    }
}

fn print_transcript(messages: &[Message]) {
    for m in messages {
        match m.role {
            Role::User => {
                let image = if m.image.is_some() { " [image]" } else { "" };
                println!("  You{image} > {}", m.content);
            }
            Role::Assistant => print_assistant(&m.content),
            Role::Tool | Role::System => {}
        }
    }
    println!();
}
