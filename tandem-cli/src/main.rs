//! Tandem command line client.
//!
//! `tandem join` attaches a terminal to a room: every stdin line replaces
//! the shared document, and every change to the session view is printed.
//! `tandem relay` runs the reference relay.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};

use tandem_collab::{
    driver, FileStore, LocalIdentity, RelayConfig, RelayServer, SessionConfig, SessionController,
    SessionView, TransportConfig, WsTransport,
};

#[derive(Parser, Debug)]
#[command(name = "tandem")]
#[command(about = "Collaborative document session client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join a room and edit its document from stdin
    Join {
        /// Relay URL
        #[arg(long, default_value = "ws://127.0.0.1:9191")]
        url: String,

        #[arg(short, long)]
        room: String,

        /// Durable user id, used to recognise our own echoes
        #[arg(long)]
        user_id: String,

        #[arg(long, default_value = "anonymous")]
        username: String,

        /// File remembering participant ids per room
        #[arg(long, value_name = "PATH", default_value = "tandem-participants.json")]
        store: PathBuf,

        /// Give up after this many failed connection attempts
        #[arg(long)]
        max_attempts: Option<u32>,
    },
    /// Run the reference relay
    Relay {
        #[arg(short, long, default_value = "127.0.0.1:9191")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Join {
            url,
            room,
            user_id,
            username,
            store,
            max_attempts,
        } => {
            let transport_config = TransportConfig {
                max_attempts,
                ..TransportConfig::new(url)
            };
            let session_config = SessionConfig::new(room, LocalIdentity::new(user_id, username));
            join(session_config, transport_config, store).await
        }
        Command::Relay { bind } => {
            let relay = RelayServer::new(RelayConfig {
                bind_addr: bind,
                ..RelayConfig::default()
            });
            tokio::select! {
                result = relay.run() => result?,
                _ = tokio::signal::ctrl_c() => info!("Relay shutting down"),
            }
            Ok(())
        }
    }
}

async fn join(
    session_config: SessionConfig,
    transport_config: TransportConfig,
    store: PathBuf,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Joining room {} at {}", session_config.room_id, transport_config.url);

    let (transport, events) = WsTransport::new(transport_config);
    let controller = SessionController::new(session_config, transport, FileStore::new(store));
    let handle = driver::spawn(controller, events);
    let mut view = handle.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    handle.edit(line);
                }
                None => break,
            },
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = view.borrow_and_update().clone();
                render(&snapshot);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let last = handle.join().await?;
    if last.pending > 0 {
        log::warn!("{} edits were never delivered", last.pending);
    }
    Ok(())
}

fn render(view: &SessionView) {
    let names: Vec<&str> = view.participants.iter().map(|p| p.username.as_str()).collect();
    println!(
        "[{:?}/{:?}] pending={}{} participants=[{}]",
        view.status,
        view.phase,
        view.pending,
        if view.unsynced { " (unsynced)" } else { "" },
        names.join(", ")
    );
    if let Some(cursor) = view.local_cursor {
        println!("  you at {}:{}", cursor.line, cursor.column);
    }
    for cursor in &view.remote_cursors {
        println!(
            "  {} {} at {}:{}",
            cursor.color, cursor.username, cursor.cursor.line, cursor.cursor.column
        );
    }
    println!("{}", view.content);
}
