//! In-process connector
//!
//! [`MemoryConnector`] hands out loopback sessions whose gateway side is driven
//! through a [`MemorySession`] handle: push inbound text, fail or close the
//! session, and inspect what the client sent. Test suites use it to script a
//! gateway without opening a socket.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connector, Transport};
use crate::error::{BridgeError, BridgeResult};

enum Frame {
    Text(String),
    Error(String),
    Close,
}

#[derive(Default)]
struct SessionState {
    sent: Vec<String>,
    closed_by_client: bool,
}

/// Gateway side of one in-memory session
#[derive(Clone)]
pub struct MemorySession {
    inbound: mpsc::UnboundedSender<Frame>,
    state: Arc<Mutex<SessionState>>,
}

impl MemorySession {
    /// Deliver raw text to the client
    pub fn push(&self, raw: impl Into<String>) {
        let _ = self.inbound.send(Frame::Text(raw.into()));
    }

    /// Deliver an event envelope to the client
    pub fn push_event(&self, event_type: &str, payload: Value) {
        self.push(serde_json::json!({ "type": event_type, "payload": payload }).to_string());
    }

    /// Break the session with a read error
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.inbound.send(Frame::Error(reason.into()));
    }

    /// Close the session from the gateway side
    pub fn close(&self) {
        let _ = self.inbound.send(Frame::Close);
    }

    /// Every message the client sent, in order
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// The `type` of every message the client sent, in order
    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|raw| {
                serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(str::to_owned))
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Whether the client closed this session
    pub fn closed_by_client(&self) -> bool {
        self.state.lock().closed_by_client
    }
}

#[derive(Default)]
struct ConnectorState {
    attempts: usize,
    refuse: usize,
    sessions: Vec<MemorySession>,
}

/// Connector producing in-memory sessions
#[derive(Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MemoryConnector {
    /// Create a connector that accepts every attempt
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts
    pub fn refuse_next(&self, count: usize) {
        self.state.lock().refuse = count;
    }

    /// Number of connection attempts so far, refused ones included
    pub fn attempts(&self) -> usize {
        self.state.lock().attempts
    }

    /// All accepted sessions, oldest first
    pub fn sessions(&self) -> Vec<MemorySession> {
        self.state.lock().sessions.clone()
    }

    /// The most recently accepted session
    pub fn latest(&self) -> Option<MemorySession> {
        self.state.lock().sessions.last().cloned()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> BridgeResult<Box<dyn Transport>> {
        let transport = {
            let mut state = self.state.lock();
            state.attempts += 1;
            if state.refuse > 0 {
                state.refuse -= 1;
                debug!("Refusing in-memory connection to {}", url);
                return Err(BridgeError::transport("connection refused"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let shared = Arc::new(Mutex::new(SessionState::default()));
            state.sessions.push(MemorySession {
                inbound: tx,
                state: Arc::clone(&shared),
            });
            MemoryTransport { inbound: rx, state: shared }
        };
        debug!("Accepted in-memory connection to {}", url);
        Ok(Box::new(transport))
    }
}

struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    state: Arc<Mutex<SessionState>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn send(&mut self, text: String) -> BridgeResult<()> {
        let mut state = self.state.lock();
        if state.closed_by_client {
            return Err(BridgeError::transport("session closed"));
        }
        state.sent.push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<BridgeResult<String>> {
        match self.inbound.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::Error(reason)) => Some(Err(BridgeError::transport(reason))),
            Some(Frame::Close) | None => None,
        }
    }

    fn close(&mut self) {
        self.state.lock().closed_by_client = true;
        self.inbound.close();
    }
}
