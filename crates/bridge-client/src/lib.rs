//! # Bridge Client - Call Control over a WebSocket SIP Gateway
//!
//! This crate keeps a local view of SIP registration and call state consistent
//! with a gateway that does the actual SIP and media work. The gateway is
//! reached over a single WebSocket carrying a small JSON event vocabulary.
//!
//! ## Components
//!
//! - **Transport Manager** ([`transport`]): the persistent connection, fixed
//!   delay reconnects and the status query on every (re)connect
//! - **Message Codec** ([`protocol`]): typed commands and events
//! - **Session State Machine** ([`session`]): the single writer of
//!   registration and call state
//! - **Side-Effect Coordinator** ([`effects`]): ringtone, call timer, settings
//!   persistence and render notifications
//!
//! Data flows one way: command → codec → transport → gateway → transport →
//! codec → state machine → coordinator.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rvoip_bridge_client::{BridgeClient, BridgeConfig, Collaborators, Credentials, WebSocketConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BridgeConfig::new().with_server_url("ws://localhost:8765");
//!     let client = BridgeClient::start(config, Arc::new(WebSocketConnector::new()), Collaborators::new())?;
//!
//!     client.connect().await?;
//!     let mut snapshots = client.watch();
//!     snapshots.changed().await?;
//!
//!     client
//!         .register(Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001"))
//!         .await?;
//!     client.make_call("1002").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Nothing in the session is fatal. Commands fail fast with a [`BridgeError`]
//! (not connected, rejected by a guard, invalid arguments); bad inbound
//! messages are logged and dropped; only the connection itself is retried.

pub mod call;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod effects;
pub mod error;
pub mod protocol;
pub mod registration;
pub mod session;
pub mod transport;

// Re-export main types
pub use call::{CallDirection, CallInfo, CallState};
pub use client::BridgeClient;
pub use collaborators::{
    BoundedLogStore, BroadcastRenderSink, Collaborators, JsonFileSettingsStore, LogDirection, LogEntry,
    LogLevel, LogStore, MemorySettingsStore, RenderNotification, RenderSink, RenderSnapshot, SettingsStore,
    TonePlayer,
};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ErrorCategory, GuardReason};
pub use protocol::{Command, ServerEvent, StatusSnapshot};
pub use registration::{Credentials, RegistrationState};
pub use session::{SessionSnapshot, SessionStateMachine, Transition};
pub use transport::{ConnectionState, Connector, MemoryConnector, Transport, WebSocketConnector};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
