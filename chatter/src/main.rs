//! Chatter terminal client.
//!
//! Joins a membership server under a screen name, sends every stdin line as
//! a chat message and prints what the room says. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/chatter/config.toml`).
//!
//! ```bash
//! cargo run --bin chatter -- alice 127.0.0.1 9000
//!
//! # Shorter handshakes, verbose log
//! cargo run --bin chatter -- bob chat.example 9000 \
//!     --join-timeout-ms 2000 --leave-timeout-ms 1000 --log-level debug
//! ```
//!
//! Commands: `/leave`, `/join`, `/who`, `/quit`. EOF or Ctrl-C also quits.

use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use chatter::config::{CliArgs, ClientConfig};
use chatter::console::{Console, Input};
use chatter::session::{
    SessionClosed, SessionCommand, SessionEvent, SessionHandle, SubmitError, spawn_session,
};
use chatter_proto::transport::udp::UdpConnector;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Logs go to a file; stdout belongs to the chat.
    let log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(screen_name = %config.screen_name, "chatter starting");

    let code = run(&config).await;
    drop(log_guard);
    // A pending stdin read would otherwise hold up runtime shutdown.
    std::process::exit(code);
}

/// Runs the session and the terminal loop. Returns the process exit code.
async fn run(config: &ClientConfig) -> i32 {
    let connector = UdpConnector::new(config.bind_addr());
    let (handle, mut events, task) = spawn_session(connector, config.to_session_config());
    let mut console = Console::new(std::io::stdout());

    if handle.try_submit(connect_command(config)).is_err() {
        return 1;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Err(e) = console.render(&event) {
                    tracing::warn!(error = %e, "failed to write to terminal");
                }
                if matches!(event, SessionEvent::Stopped) {
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => {
                let input = match line {
                    Ok(Some(line)) => Input::parse(&line),
                    Ok(None) => {
                        stdin_open = false;
                        Input::Quit
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read stdin");
                        stdin_open = false;
                        Input::Quit
                    }
                };
                if dispatch(input, &handle, config, &mut console).is_err() {
                    break;
                }
            }
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = result {
                    tracing::warn!(error = %e, "failed to install Ctrl-C handler");
                    continue;
                }
                tracing::info!("interrupted");
                if submit(&handle, SessionCommand::Stop, &mut console).is_err() {
                    break;
                }
            }
        }
    }

    drop(handle);
    match task.await {
        Ok(()) => {
            tracing::info!("chatter exiting");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "session task failed");
            1
        }
    }
}

/// Acts on one line of user input. Never waits on the session, so events
/// keep being drained while the user types.
fn dispatch(
    input: Input,
    handle: &SessionHandle,
    config: &ClientConfig,
    console: &mut Console<std::io::Stdout>,
) -> Result<(), SessionClosed> {
    match input {
        Input::Chat(body) => submit(handle, SessionCommand::SendChat { body }, console),
        Input::Leave => submit(handle, SessionCommand::Disconnect, console),
        Input::Join => submit(handle, connect_command(config), console),
        Input::Quit => submit(handle, SessionCommand::Stop, console),
        Input::Who => {
            let _ = console.print_roster();
            Ok(())
        }
        Input::Unknown(command) => {
            let _ = console.notice(&format!("unknown command /{command}"));
            Ok(())
        }
        Input::Empty => Ok(()),
    }
}

/// Queues a command; a full queue drops it with a notice.
fn submit(
    handle: &SessionHandle,
    command: SessionCommand,
    console: &mut Console<std::io::Stdout>,
) -> Result<(), SessionClosed> {
    match handle.try_submit(command) {
        Ok(()) => Ok(()),
        Err(SubmitError::Busy) => {
            let _ = console.notice("busy, input dropped");
            Ok(())
        }
        Err(SubmitError::Closed(closed)) => Err(closed),
    }
}

fn connect_command(config: &ClientConfig) -> SessionCommand {
    SessionCommand::Connect {
        screen_name: config.screen_name.clone(),
        host: config.server_host.clone(),
        port: config.server_port,
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("chatter.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
