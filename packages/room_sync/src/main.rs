use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use room_sync::{
    ApiClient, ClientConfig, ConnectionPhase, ControlAction, FileConfig, HistoryState, RoomChange,
    RoomId, RoomStore, SessionContext, load_config,
};

#[derive(Parser)]
#[command(name = "room-watch")]
#[command(about = "Follow and control multi-agent conversation rooms")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (ROOM_SYNC_* env vars override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a room and print its live state until Ctrl-C
    Watch(RoomArgs),

    /// Show a room's simulation status
    Status(StatusArgs),

    /// Start the room's simulation
    Start(RoomArgs),

    /// Pause a running simulation
    Pause(RoomArgs),

    /// Resume a paused simulation
    Resume(RoomArgs),

    /// Stop the simulation
    Stop(RoomArgs),

    /// Inject a user message into the conversation
    Inject(InjectArgs),
}

#[derive(Args)]
struct RoomArgs {
    /// Room ID
    room: String,
}

#[derive(Args)]
struct StatusArgs {
    /// Room ID
    room: String,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct InjectArgs {
    /// Room ID
    room: String,

    /// Message text
    content: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.debug);

    let file_config: FileConfig = load_config(cli.config.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let config = ClientConfig::from_file(&file_config);

    match cli.command {
        Commands::Watch(args) => watch_command(&config, RoomId::new(args.room)).await,
        Commands::Status(args) => status_command(&config, RoomId::new(args.room), args.json).await,
        Commands::Start(args) => {
            control_command(&config, RoomId::new(args.room), ControlAction::Start).await
        }
        Commands::Pause(args) => {
            control_command(&config, RoomId::new(args.room), ControlAction::Pause).await
        }
        Commands::Resume(args) => {
            control_command(&config, RoomId::new(args.room), ControlAction::Resume).await
        }
        Commands::Stop(args) => {
            control_command(&config, RoomId::new(args.room), ControlAction::Stop).await
        }
        Commands::Inject(args) => {
            inject_command(&config, RoomId::new(args.room), &args.content).await
        }
    }
}

fn init_logging(debug: bool) {
    let default_directive = if debug {
        "room_sync=debug,room_watch=debug,info"
    } else {
        "room_sync=info,room_watch=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    // Logs go to stderr so they don't interleave with rendered room output.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

async fn status_command(config: &ClientConfig, room: RoomId, json: bool) -> Result<()> {
    let api = ApiClient::new(config.endpoints.clone());
    let status = api
        .simulation_status(&room)
        .await
        .with_context(|| format!("Failed to fetch status for room {room}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{:<38} {:<8} {}", "ROOM", "STATUS", "TURN");
        println!("{}", "-".repeat(60));
        println!(
            "{:<38} {:<8} {}/{}",
            status.room_id, status.status, status.current_turn_index, status.max_turns
        );
    }
    Ok(())
}

async fn control_command(config: &ClientConfig, room: RoomId, action: ControlAction) -> Result<()> {
    let api = ApiClient::new(config.endpoints.clone());
    let ack = api
        .control(&room, action)
        .await
        .with_context(|| format!("Failed to {} room {room}", action.as_str()))?;
    if ack.status.is_empty() {
        println!("{}: ok", action.as_str());
    } else {
        println!("{}: {}", action.as_str(), ack.status);
    }
    Ok(())
}

async fn inject_command(config: &ClientConfig, room: RoomId, content: &str) -> Result<()> {
    let content = content.trim();
    anyhow::ensure!(!content.is_empty(), "Refusing to inject an empty message");
    let api = ApiClient::new(config.endpoints.clone());
    api.inject(&room, content)
        .await
        .with_context(|| format!("Failed to inject into room {room}"))?;
    println!("Injected.");
    Ok(())
}

async fn watch_command(config: &ClientConfig, room: RoomId) -> Result<()> {
    let api = ApiClient::new(config.endpoints.clone());
    let summary = api
        .get_room(&room)
        .await
        .with_context(|| format!("Failed to load room {room}"))?;

    println!(
        "Watching {} ({}) - {} turn {}/{}",
        summary.name, summary.id, summary.status, summary.current_turn_index, summary.max_turns
    );

    let store = Arc::new(RoomStore::new());
    let ctx = SessionContext::from_config(config, store.clone());
    let mut changes = store.subscribe(&room);
    let mut session = ctx.mount(&summary);
    let mut phase = session.phase();
    let mut history = session.history();
    let mut history_done = false;
    let mut printed: HashSet<String> = HashSet::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, unmounting room");
                break Ok(());
            }
            changed = phase.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let current = phase.borrow_and_update().clone();
                match current {
                    ConnectionPhase::Open => println!("-- connected"),
                    ConnectionPhase::RetryScheduled { attempt, delay } => {
                        println!("-- disconnected, retry {attempt} in {}ms", delay.as_millis());
                    }
                    ConnectionPhase::GivenUp => {
                        break Err(anyhow::anyhow!(
                            "Live connection to room {room} lost; retries exhausted"
                        ));
                    }
                    ConnectionPhase::Connecting | ConnectionPhase::TornDown => {}
                }
            }
            changed = history.changed(), if !history_done => {
                if changed.is_err() {
                    history_done = true;
                    continue;
                }
                match history.borrow_and_update().clone() {
                    HistoryState::Loaded { count, total } => {
                        history_done = true;
                        println!("-- loaded {count} of {total} messages");
                    }
                    HistoryState::Failed(reason) => {
                        history_done = true;
                        warn!(room = %room, "history unavailable: {reason}");
                    }
                    HistoryState::Pending => {}
                }
            }
            change = changes.recv() => match change {
                Ok(RoomChange::Messages) | Ok(RoomChange::Cleared) => {
                    print_new_messages(&store, &room, &mut printed)
                }
                Ok(RoomChange::Status) => println!("-- status: {}", store.status(&room)),
                Ok(RoomChange::Turns) => {
                    let turns = store.turn_info(&room);
                    println!("-- turn {}/{}", turns.current, turns.max);
                }
                Ok(RoomChange::Typing) => {
                    if let Some(agent) = store.typing(&room) {
                        println!("-- {} is typing...", agent.agent_name);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "render fell behind, re-reading room state");
                    print_new_messages(&store, &room, &mut printed);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    session.unmount();
    outcome
}

/// Print messages not shown yet. History may slot in ahead of live messages,
/// so this tracks ids rather than a position.
fn print_new_messages(store: &RoomStore, room: &RoomId, printed: &mut HashSet<String>) {
    for message in store.messages(room) {
        if !printed.insert(message.id.clone()) {
            continue;
        }
        let speaker = match (&message.agent_name, message.is_injected()) {
            (_, true) => "user",
            (Some(name), false) => name.as_str(),
            (None, false) => message.role.as_str(),
        };
        println!(
            "[{}] #{} {}: {}",
            message.created_at.format("%H:%M:%S"),
            message.turn_number,
            speaker,
            message.content
        );
    }
}
