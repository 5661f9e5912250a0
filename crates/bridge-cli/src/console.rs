//! Terminal rendering and ringtone

use std::io::Write;

use colored::Colorize;
use rvoip_bridge_client::collaborators::RenderStream;
use rvoip_bridge_client::{
    CallState, ConnectionState, LogEntry, LogLevel, RegistrationState, RenderNotification, RenderSnapshot,
    TonePlayer,
};
use tokio_stream::StreamExt;
use tracing::debug;

/// Rings the terminal bell once per pulse
pub struct TerminalBell;

impl TonePlayer for TerminalBell {
    fn pulse(&self) {
        print!("\x07");
        let _ = std::io::stdout().flush();
    }

    fn silence(&self) {}
}

/// One-line summary of a snapshot
pub fn status_line(snapshot: &RenderSnapshot) -> String {
    let connection = match snapshot.connection {
        ConnectionState::Connected => "connected".green(),
        ConnectionState::Connecting => "connecting".yellow(),
        ConnectionState::Disconnected => "disconnected".red(),
    };
    let registration = match snapshot.registration {
        RegistrationState::Registered => "registered".green(),
        RegistrationState::Registering => "registering".yellow(),
        RegistrationState::Unregistered => "unregistered".normal(),
    };
    let number = &snapshot.call_info.remote_party_number;
    let call = match snapshot.call {
        CallState::Idle => "idle".normal(),
        CallState::Dialing => format!("dialing {}", number).yellow(),
        CallState::ConnectingOutbound => format!("connecting {}", number).yellow(),
        CallState::IncomingRinging => format!("incoming call from {}", number).bold().cyan(),
        CallState::Active => format!("in call with {}", number).green().bold(),
        CallState::Ending => "ending".yellow(),
    };
    format!("[{} | {} | {}]", connection, registration, call)
}

pub fn print_entry(entry: &LogEntry) {
    let line = entry.to_string();
    let line = match entry.level {
        LogLevel::Error => line.red(),
        LogLevel::Warn => line.yellow(),
        LogLevel::Info => line.normal(),
        LogLevel::Debug => line.dimmed(),
    };
    println!("{}", line);
}

/// Print notifications until the sink goes away
pub async fn render_loop(mut notifications: RenderStream, verbose: bool) {
    let mut last: Option<RenderSnapshot> = None;
    while let Some(notification) = notifications.next().await {
        match notification {
            Ok(RenderNotification::Snapshot(snapshot)) => {
                if last.as_ref() != Some(&snapshot) {
                    println!("{}", status_line(&snapshot));
                    last = Some(snapshot);
                }
            }
            Ok(RenderNotification::LogLine(line)) => {
                if verbose {
                    println!("{}", line.dimmed());
                }
            }
            Ok(RenderNotification::CallDuration(Some(display))) => {
                print!("\r{} {} ", "call".green(), display);
                let _ = std::io::stdout().flush();
            }
            Ok(RenderNotification::CallDuration(None)) => println!(),
            Err(e) => debug!("Render stream lagged: {}", e),
        }
    }
}
