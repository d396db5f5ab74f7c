//! Surface lifecycle events
//!
//! The Rust rendition of the browser inputs the client consumes:
//! document-ready/page-load, visibility changes, history restore, and
//! before-unload. The binary drives them from startup, stdin commands, and
//! Ctrl-C; an embedding frontend would feed the same enum from its own
//! windowing events.

use crate::connection::VoiceClient;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Lifecycle transitions of the hosting surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    /// Initial startup; the surface exists and wants a connection
    Ready,
    /// Surface became visible again
    Shown,
    /// Surface was hidden
    Hidden,
    /// Surface restored from a cached/background state
    Restored,
    /// Surface is going away for good
    Shutdown,
}

/// Map one console command to an action
enum Command {
    Toggle,
    Lifecycle(LifecycleEvent),
    Help,
    Quit,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    match line.trim().to_ascii_lowercase().as_str() {
        "" | "t" | "toggle" => Command::Toggle,
        "hide" => Command::Lifecycle(LifecycleEvent::Hidden),
        "show" => Command::Lifecycle(LifecycleEvent::Shown),
        "r" | "reload" => Command::Lifecycle(LifecycleEvent::Restored),
        "h" | "help" | "?" => Command::Help,
        "q" | "quit" | "exit" => Command::Quit,
        _ => Command::Unknown,
    }
}

fn print_help() {
    println!("commands: <enter> toggle listening | hide | show | r reload | q quit");
}

/// Drive the client from stdin commands and Ctrl-C until shutdown
pub(crate) async fn run_driver(client: VoiceClient) -> std::io::Result<()> {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => match parse_command(&line) {
                        Command::Toggle => client.handle_user_toggle().await,
                        Command::Lifecycle(event) => client.handle_lifecycle(event).await,
                        Command::Help => print_help(),
                        Command::Quit => break,
                        Command::Unknown => {
                            warn!(command = %line.trim(), "Unknown command");
                            print_help();
                        }
                    },
                    // stdin closed; keep serving until Ctrl-C
                    None => {
                        tokio::signal::ctrl_c().await?;
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    client.handle_lifecycle(LifecycleEvent::Shutdown).await;
    Ok(())
}
