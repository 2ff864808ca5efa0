//! Relaysync Headless Client
//!
//! Connects to a relay and drives one player from stdin:
//! - `/move <strafe> <forward>` holds a movement direction
//! - `/turn <axis>` holds a turn rate (-1 to 1)
//! - `/stop` releases both
//! - `/who` lists known players
//! - `/quit` leaves
//!
//! Any other line is sent as chat.

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use relaysync::client::{GameClient, InputCommand};
use relaysync::config::ClientConfig;
use relaysync::VERSION;

/// A parsed stdin line
#[derive(Debug)]
enum Command {
    Move { strafe: f32, forward: f32 },
    Turn(f32),
    Stop,
    Who,
    Quit,
    Chat(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let axis = |word: Option<&str>| -> Option<f32> {
        word.and_then(|w| w.parse::<f32>().ok())
            .map(|v| v.clamp(-1.0, 1.0))
    };

    match words.next() {
        Some("/move") => {
            let strafe = axis(words.next())?;
            let forward = axis(words.next())?;
            Some(Command::Move { strafe, forward })
        }
        Some("/turn") => axis(words.next()).map(Command::Turn),
        Some("/stop") => Some(Command::Stop),
        Some("/who") => Some(Command::Who),
        Some("/quit") => Some(Command::Quit),
        Some(word) if word.starts_with('/') => None,
        _ => Some(Command::Chat(line.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();
    info!("Starting Relaysync Client v{}", VERSION);

    // Load configuration
    let mut config = ClientConfig::load().await?;
    if let Some(server_ip) = std::env::args().nth(1) {
        config.server_ip = server_ip;
        config.validate()?;
    }

    let mut client = GameClient::connect(&config).await?;
    info!(identity = client.identity(), "Joined relay at {}", config.server_ip);

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    let tick = Duration::from_secs_f32(config.tick_seconds());
    let dt = tick.as_secs_f32();
    let mut interval = time::interval(tick);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

    let mut held_move: Option<(f32, f32)> = None;
    let mut held_turn: Option<f32> = None;
    let mut chat_seen = 0u64;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Some((strafe, forward)) = held_move {
                    client.state_mut().push_input(InputCommand::Move { strafe, forward });
                }
                if let Some(axis) = held_turn {
                    client.state_mut().push_input(InputCommand::Rotate(axis));
                }

                if client.tick(dt).disconnected {
                    break;
                }

                let chat = client.state().chat();
                for line in chat.since(chat_seen) {
                    println!("{}", line);
                }
                chat_seen = chat.received();
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match parse_command(&line) {
                    Some(Command::Move { strafe, forward }) => held_move = Some((strafe, forward)),
                    Some(Command::Turn(axis)) => held_turn = Some(axis),
                    Some(Command::Stop) => {
                        held_move = None;
                        held_turn = None;
                    }
                    Some(Command::Who) => {
                        for entity in client.state().entities().entities() {
                            println!(
                                "Player {}{}: {:?} yaw {:.1}",
                                entity.identity,
                                if entity.is_local { " (you)" } else { "" },
                                entity.transform.position,
                                entity.transform.yaw
                            );
                        }
                    }
                    Some(Command::Quit) => break,
                    Some(Command::Chat(text)) => {
                        if let Err(e) = client.send_chat(&text) {
                            warn!("Chat not sent: {}", e);
                        }
                    }
                    None => println!("Unknown command: {}", line),
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    stdin_task.abort();
    client.disconnect().await;
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,relaysync=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}
