//! Transport manager for the persistent signaling connection
//!
//! The [`TransportManager`] owns the one connection to the gateway, its
//! [`ConnectionState`] and the single outstanding [`PendingReconnect`].
//!
//! # Reconnection policy
//!
//! Any closure of the session (clean close, read error, or a failed open)
//! schedules exactly one reconnect attempt after the fixed delay. There is no
//! backoff growth and no retry limit. A manual [`TransportManager::connect`] or
//! an explicit [`TransportManager::close`] cancels the pending attempt.
//!
//! On reaching `Connected` the manager immediately sends `get_status`, so the
//! first message of every session asks the gateway for an authoritative
//! snapshot.
//!
//! # Event delivery
//!
//! State changes and inbound text are delivered as [`TransportEvent`]s from
//! [`TransportManager::next_event`], which has exactly one caller: the
//! dispatcher. `next_event` is cancel-safe so it can sit in a `select!` next to
//! command and timer branches.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{self, Command};

pub mod memory;
pub mod ws;

pub use memory::{MemoryConnector, MemorySession};
pub use ws::WebSocketConnector;

/// State of the signaling connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    /// No session and no open attempt in flight
    #[default]
    Disconnected,
    /// Opening a session
    Connecting,
    /// Session open
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
        }
    }
}

/// An open text-message session with the gateway
#[async_trait]
pub trait Transport: Send {
    /// Queue a text message for transmission
    fn send(&mut self, text: String) -> BridgeResult<()>;

    /// Receive the next text message
    ///
    /// `None` means the session closed cleanly. Must be cancel-safe.
    async fn recv(&mut self) -> Option<BridgeResult<String>>;

    /// Close the session; further sends fail
    fn close(&mut self);
}

/// Opens [`Transport`] sessions
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new session to `url`
    async fn connect(&self, url: &str) -> BridgeResult<Box<dyn Transport>>;
}

/// Something the dispatcher has to react to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection state changed
    StateChanged(ConnectionState),
    /// Raw inbound text
    Message(String),
}

/// The scheduled reconnect attempt
///
/// At most one exists at a time. Dropping it from the manager cancels it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect {
    token: u64,
    due: Instant,
}

impl PendingReconnect {
    /// Sequence number of this attempt
    pub fn token(&self) -> u64 {
        self.token
    }

    /// When the attempt fires
    pub fn due(&self) -> Instant {
        self.due
    }
}

enum Link {
    Down,
    Opening(JoinHandle<BridgeResult<Box<dyn Transport>>>),
    Open(Box<dyn Transport>),
}

enum Step {
    Received(Option<BridgeResult<String>>),
    Opened(BridgeResult<Box<dyn Transport>>),
    ReconnectDue(u64),
}

/// Owner of the signaling connection
pub struct TransportManager {
    connector: Arc<dyn Connector>,
    url: String,
    reconnect_delay: Duration,
    state: ConnectionState,
    link: Link,
    pending: Option<PendingReconnect>,
    next_token: u64,
    queued: VecDeque<TransportEvent>,
}

impl TransportManager {
    /// Create a manager; nothing is opened until [`connect`](Self::connect)
    pub fn new(connector: Arc<dyn Connector>, url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            connector,
            url: url.into(),
            reconnect_delay,
            state: ConnectionState::Disconnected,
            link: Link::Down,
            pending: None,
            next_token: 0,
            queued: VecDeque::new(),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The outstanding reconnect attempt, if any
    pub fn pending_reconnect(&self) -> Option<PendingReconnect> {
        self.pending
    }

    /// Open a new session, replacing the current one
    ///
    /// Cancels any pending reconnect attempt.
    pub fn connect(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Cancelled pending reconnect #{} for manual connect", pending.token);
        }
        self.drop_link();
        self.begin_connect();
    }

    /// Tear the session down without scheduling a reconnect
    pub fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Cancelled pending reconnect #{} on teardown", pending.token);
        }
        self.drop_link();
        info!("Signaling connection closed by client");
    }

    /// Send a command over the open session
    ///
    /// Fails with [`BridgeError::NotConnected`] unless the session is open. The
    /// command is dropped, never queued.
    pub fn send(&mut self, command: &Command) -> BridgeResult<()> {
        match (&self.state, &mut self.link) {
            (ConnectionState::Connected, Link::Open(transport)) => {
                let text = protocol::encode(command)?;
                transport.send(text)?;
                debug!("Sent {}", command.describe());
                Ok(())
            }
            _ => {
                warn!("Dropping {} while {}", command.command_type(), self.state);
                Err(BridgeError::NotConnected)
            }
        }
    }

    /// Wait for the next transport event
    pub async fn next_event(&mut self) -> TransportEvent {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return event;
            }

            let step = match &mut self.link {
                Link::Open(transport) => Step::Received(transport.recv().await),
                Link::Opening(task) => Step::Opened(match task.await {
                    Ok(result) => result,
                    Err(e) => Err(BridgeError::transport(format!("connect task failed: {}", e))),
                }),
                Link::Down => match self.pending {
                    Some(pending) => {
                        tokio::time::sleep_until(pending.due).await;
                        Step::ReconnectDue(pending.token)
                    }
                    None => std::future::pending().await,
                },
            };

            match step {
                Step::Received(Some(Ok(text))) => return TransportEvent::Message(text),
                Step::Received(Some(Err(e))) => {
                    error!("Signaling connection error: {}", e);
                    self.on_closed();
                }
                Step::Received(None) => {
                    info!("Signaling connection closed by server");
                    self.on_closed();
                }
                Step::Opened(Ok(transport)) => self.on_opened(transport),
                Step::Opened(Err(e)) => {
                    error!("Failed to open signaling connection to {}: {}", self.url, e);
                    self.on_closed();
                }
                Step::ReconnectDue(token) => {
                    self.pending = None;
                    info!("Reconnect attempt #{} to {}", token, self.url);
                    self.begin_connect();
                }
            }
        }
    }

    fn begin_connect(&mut self) {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        debug!("Opening signaling connection to {}", url);
        self.link = Link::Opening(tokio::spawn(async move { connector.connect(&url).await }));
        self.set_state(ConnectionState::Connecting);
    }

    fn on_opened(&mut self, transport: Box<dyn Transport>) {
        self.link = Link::Open(transport);
        self.set_state(ConnectionState::Connected);
        info!("Signaling connection established to {}", self.url);
        // Resynchronize with the gateway before anything else goes out.
        if let Err(e) = self.send(&Command::GetStatus) {
            warn!("Status query after connect failed: {}", e);
        }
    }

    fn on_closed(&mut self) {
        self.drop_link();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.pending.is_some() {
            return;
        }
        self.next_token += 1;
        let pending = PendingReconnect {
            token: self.next_token,
            due: Instant::now() + self.reconnect_delay,
        };
        self.pending = Some(pending);
        info!("Reconnect #{} scheduled in {:?}", pending.token, self.reconnect_delay);
    }

    fn drop_link(&mut self) {
        match std::mem::replace(&mut self.link, Link::Down) {
            Link::Open(mut transport) => transport.close(),
            Link::Opening(task) => task.abort(),
            Link::Down => {}
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {} -> {}", self.state, state);
            self.state = state;
            self.queued.push_back(TransportEvent::StateChanged(state));
        }
    }
}

impl Drop for TransportManager {
    fn drop(&mut self) {
        if let Link::Opening(task) = &self.link {
            task.abort();
        }
    }
}
