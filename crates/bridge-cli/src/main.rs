//! rvoip-phone: a terminal softphone for the WebSocket SIP gateway
//!
//! Connects on start, prints every state change and reads commands from
//! stdin. Type `help` for the command list.

mod commands;
mod config;
mod console;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rvoip_bridge_client::{
    BridgeClient, BridgeError, BroadcastRenderSink, Collaborators, ConnectionState, JsonFileSettingsStore,
    RenderSnapshot, WebSocketConnector,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::commands::{HELP, Input};
use crate::config::{CliConfig, default_config_path};

const AUTO_REGISTER_WAIT: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "RVOIP_PHONE_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway WebSocket URL, overrides the config file
    #[arg(short, long)]
    server: Option<String>,

    /// Tracing filter, e.g. `debug` or `rvoip_bridge_client=trace`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Echo every raw log line, not just state changes
    #[arg(short, long)]
    verbose: bool,

    /// Register with the saved credentials once connected
    #[arg(long)]
    auto_register: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = CliConfig::load(&config_path)?;
    if let Some(server) = &args.server {
        config.bridge = config.bridge.with_server_url(server.clone());
        config.bridge.validate()?;
    }

    init_logging(args.log_level.as_deref(), &config.log_level);
    info!("Using config {}", config_path.display());

    let sink = Arc::new(BroadcastRenderSink::new(config.bridge.event_capacity));
    let settings = Arc::new(JsonFileSettingsStore::new(config.settings_path(&config_path)));
    let collaborators = Collaborators::new()
        .with_render_sink(sink.clone())
        .with_tone_player(Arc::new(console::TerminalBell))
        .with_settings_store(settings);

    let render = tokio::spawn(console::render_loop(sink.subscribe(), args.verbose));

    let client = BridgeClient::start(config.bridge.clone(), Arc::new(WebSocketConnector::new()), collaborators)
        .context("Failed to start bridge client")?;
    client.connect().await?;

    if args.auto_register {
        auto_register(&client).await;
    }

    println!("{}", "Type 'help' for commands.".dimmed());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match commands::parse(&line) {
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(input)) => handle(&client, input).await,
                    Ok(None) => {}
                    Err(e) => println!("{}", e.yellow()),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await?;
    drop(client);
    render.abort();
    Ok(())
}

async fn auto_register(client: &BridgeClient) {
    if wait_connected(client.watch(), AUTO_REGISTER_WAIT).await {
        report(client.register_saved().await);
    } else {
        println!("{}", "Gateway not reachable yet; type 'register' once connected.".yellow());
    }
}

/// Wait until the session reports `Connected`, giving up after `limit`
async fn wait_connected(mut snapshots: watch::Receiver<RenderSnapshot>, limit: Duration) -> bool {
    let connected = async move {
        match snapshots.wait_for(|s| s.connection == ConnectionState::Connected).await {
            Ok(_) => true,
            Err(_) => {
                warn!("Bridge client stopped before connecting");
                false
            }
        }
    };
    tokio::time::timeout(limit, connected).await.unwrap_or(false)
}

async fn handle(client: &BridgeClient, input: Input) {
    let result = match input {
        Input::Connect => client.connect().await,
        Input::Register(credentials) => client.register(credentials).await,
        Input::RegisterSaved => client.register_saved().await,
        Input::Unregister => client.unregister().await,
        Input::Call(number) => client.make_call(number).await,
        Input::Answer => client.answer_call().await,
        Input::Hangup => client.hangup_call().await,
        Input::Dtmf(digit) => client.send_dtmf(digit).await,
        Input::Message { to, text } => client.send_message(to, text).await,
        Input::Status => client.request_status().await,
        Input::Ping => client.ping().await,
        Input::Show => {
            println!("{}", console::status_line(&client.snapshot()));
            Ok(())
        }
        Input::Log(count) => {
            let entries = client.log_entries();
            for entry in entries.iter().skip(entries.len().saturating_sub(count)) {
                console::print_entry(entry);
            }
            Ok(())
        }
        Input::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Input::Quit => Ok(()),
    };
    report(result);
}

fn report(result: Result<(), BridgeError>) {
    if let Err(e) = result {
        let hint = if e.is_recoverable() { " (try again)" } else { "" };
        println!("{}{}", e.to_string().red(), hint.dimmed());
    }
}

// --log-level beats RUST_LOG, which beats the config file.
fn init_logging(cli_filter: Option<&str>, config_filter: &str) {
    let filter = match cli_filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config_filter)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_connected_gives_up_when_gateway_is_down() {
        let (_tx, rx) = watch::channel(RenderSnapshot::default());
        assert!(!wait_connected(rx, AUTO_REGISTER_WAIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_connected_returns_once_connected() {
        let (tx, rx) = watch::channel(RenderSnapshot::default());
        let waiter = tokio::spawn(wait_connected(rx, AUTO_REGISTER_WAIT));
        tx.send_modify(|s| s.connection = ConnectionState::Connected);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_connected_stops_when_client_is_gone() {
        let (tx, rx) = watch::channel(RenderSnapshot::default());
        drop(tx);
        assert!(!wait_connected(rx, AUTO_REGISTER_WAIT).await);
    }
}
