//! Bridge client: dispatcher task and public handle
//!
//! [`BridgeClient::start`] spawns one dispatcher task that exclusively owns the
//! [`TransportManager`], the [`SessionStateMachine`] and the
//! [`SideEffectCoordinator`]. Everything that can change state arrives on that
//! one task and is handled to completion before the next input is looked at:
//!
//! - requests from [`BridgeClient`] handles (mpsc, answered over oneshot)
//! - transport events, in arrival order
//! - ringtone and call-duration timer ticks
//!
//! No locks guard session state; it simply has a single writer.
//!
//! # Command path
//!
//! 1. argument validation and state guards (nothing is sent on rejection)
//! 2. [`TransportManager::send`], failing with
//!    [`BridgeError::NotConnected`] while the link is down
//! 3. the optimistic local transition, if the command has one
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rvoip_bridge_client::{BridgeClient, BridgeConfig, BridgeError, Collaborators, MemoryConnector};
//!
//! # tokio_test::block_on(async {
//! let connector = MemoryConnector::new();
//! let client = BridgeClient::start(
//!     BridgeConfig::default(),
//!     Arc::new(connector.clone()),
//!     Collaborators::new(),
//! ).unwrap();
//!
//! // DTMF needs an active call; the guard rejects it locally.
//! let err = client.send_dtmf('5').await.unwrap_err();
//! assert!(matches!(err, BridgeError::GuardRejected(_)));
//! assert_eq!(connector.attempts(), 0);
//!
//! client.shutdown().await.unwrap();
//! # })
//! ```

use std::ops::ControlFlow;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::collaborators::{Collaborators, LogEntry, LogStore, RenderSnapshot};
use crate::config::BridgeConfig;
use crate::effects::SideEffectCoordinator;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::{self, Command};
use crate::registration::Credentials;
use crate::session::{SessionStateMachine, Transition};
use crate::transport::{Connector, TransportEvent, TransportManager};

type Reply = oneshot::Sender<BridgeResult<()>>;

enum Request {
    Connect(Reply),
    Execute(Command, Reply),
    RegisterSaved(Reply),
    Shutdown(Reply),
}

/// Handle to a running bridge session
///
/// Cheap to clone. The session is torn down when [`shutdown`](Self::shutdown)
/// is called or the last handle is dropped.
#[derive(Clone)]
pub struct BridgeClient {
    requests: mpsc::Sender<Request>,
    snapshot: watch::Receiver<RenderSnapshot>,
    log: Arc<dyn LogStore>,
}

impl BridgeClient {
    /// Validate the configuration and spawn the dispatcher
    ///
    /// Must be called from within a tokio runtime. Nothing is opened until
    /// [`connect`](Self::connect).
    pub fn start(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
        mut collaborators: Collaborators,
    ) -> BridgeResult<Self> {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::channel(config.event_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(RenderSnapshot::default());
        let log = collaborators.log_store_or_bounded(config.log_capacity);

        let dispatcher = Dispatcher::new(&config, connector, collaborators, snapshot_tx);
        tokio::spawn(dispatcher.run(request_rx));
        info!("Bridge client started for {}", config.server_url);

        Ok(Self {
            requests: request_tx,
            snapshot: snapshot_rx,
            log,
        })
    }

    /// Open the signaling connection, replacing any current one
    pub async fn connect(&self) -> BridgeResult<()> {
        self.request(Request::Connect).await
    }

    /// Register the SIP account; the credentials are saved once confirmed
    pub async fn register(&self, credentials: Credentials) -> BridgeResult<()> {
        self.execute(Command::Register(credentials)).await
    }

    /// Register with the credentials of the last confirmed registration
    pub async fn register_saved(&self) -> BridgeResult<()> {
        self.request(Request::RegisterSaved).await
    }

    pub async fn unregister(&self) -> BridgeResult<()> {
        self.execute(Command::Unregister).await
    }

    /// Place an outgoing call
    pub async fn make_call(&self, number: impl Into<String>) -> BridgeResult<()> {
        self.execute(Command::MakeCall { number: number.into() }).await
    }

    /// Answer the ringing call; the call becomes active on confirmation only
    pub async fn answer_call(&self) -> BridgeResult<()> {
        self.execute(Command::AnswerCall).await
    }

    /// Hang up; the local state returns to idle immediately
    pub async fn hangup_call(&self) -> BridgeResult<()> {
        self.execute(Command::HangupCall).await
    }

    pub async fn send_dtmf(&self, digit: char) -> BridgeResult<()> {
        self.execute(Command::SendDtmf { digit }).await
    }

    pub async fn send_message(&self, to_number: impl Into<String>, content: impl Into<String>) -> BridgeResult<()> {
        self.execute(Command::SendMessage {
            to_number: to_number.into(),
            content: content.into(),
        })
        .await
    }

    /// Ask the gateway for a full status snapshot
    pub async fn request_status(&self) -> BridgeResult<()> {
        self.execute(Command::GetStatus).await
    }

    pub async fn ping(&self) -> BridgeResult<()> {
        self.execute(Command::Ping {
            timestamp: Utc::now().timestamp_millis(),
        })
        .await
    }

    /// Tear the session down: close the connection, cancel the pending
    /// reconnect and stop both timers
    pub async fn shutdown(&self) -> BridgeResult<()> {
        self.request(Request::Shutdown).await
    }

    /// Current read-only view of the session
    pub fn snapshot(&self) -> RenderSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified on every snapshot change
    pub fn watch(&self) -> watch::Receiver<RenderSnapshot> {
        self.snapshot.clone()
    }

    /// Retained log entries, oldest first
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log.entries()
    }

    async fn execute(&self, command: Command) -> BridgeResult<()> {
        self.request(|reply| Request::Execute(command, reply)).await
    }

    async fn request(&self, build: impl FnOnce(Reply) -> Request) -> BridgeResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(build(reply_tx))
            .await
            .map_err(|_| BridgeError::Closed)?;
        reply_rx.await.map_err(|_| BridgeError::Closed)?
    }
}

struct Dispatcher {
    transport: TransportManager,
    session: SessionStateMachine,
    effects: SideEffectCoordinator,
    snapshot: watch::Sender<RenderSnapshot>,
}

impl Dispatcher {
    fn new(
        config: &BridgeConfig,
        connector: Arc<dyn Connector>,
        collaborators: Collaborators,
        snapshot: watch::Sender<RenderSnapshot>,
    ) -> Self {
        Self {
            transport: TransportManager::new(connector, config.server_url.clone(), config.reconnect_delay()),
            session: SessionStateMachine::new(),
            effects: SideEffectCoordinator::new(collaborators, config.ringtone_pulse(), config.duration_tick()),
            snapshot,
        }
    }

    async fn run(mut self, mut requests: mpsc::Receiver<Request>) {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        if self.handle_request(request).is_break() {
                            break;
                        }
                    }
                    None => {
                        debug!("All client handles dropped");
                        self.teardown();
                        break;
                    }
                },
                event = self.transport.next_event() => self.handle_transport_event(event),
                tick = self.effects.next_tick() => self.effects.on_tick(tick, Utc::now()),
            }
        }
        info!("Bridge client stopped");
    }

    fn handle_request(&mut self, request: Request) -> ControlFlow<()> {
        match request {
            Request::Connect(reply) => {
                self.transport.connect();
                let _ = reply.send(Ok(()));
            }
            Request::Execute(command, reply) => {
                let _ = reply.send(self.execute(command));
            }
            Request::RegisterSaved(reply) => {
                let result = match self.effects.saved_credentials() {
                    Ok(Some(credentials)) => self.execute(Command::Register(credentials)),
                    Ok(None) => Err(BridgeError::config("no saved credentials")),
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            Request::Shutdown(reply) => {
                self.teardown();
                let _ = reply.send(Ok(()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn execute(&mut self, command: Command) -> BridgeResult<()> {
        let sent = self
            .session
            .check(&command)
            .and_then(|()| self.transport.send(&command));
        if let Err(e) = sent {
            warn!("{} not sent: {}", command.describe(), e);
            self.effects.on_command_rejected(&command, &e);
            return Err(e);
        }

        self.effects.on_command_sent(&command);
        let transitions = self.session.issue(&command, Utc::now());
        self.publish(&transitions);
        Ok(())
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                let snapshot = self.render_snapshot();
                self.effects.on_connection_state(state, &snapshot);
                self.snapshot.send_replace(snapshot);
            }
            TransportEvent::Message(raw) => self.handle_message(&raw),
        }
    }

    fn handle_message(&mut self, raw: &str) {
        self.effects.on_raw_event(raw);
        match protocol::decode(raw) {
            Ok(event) => {
                debug!("Received {}", event.event_type());
                let transitions = self.session.apply(&event, Utc::now());
                self.publish(&transitions);
            }
            Err(e @ BridgeError::UnknownEventType { .. }) => {
                warn!("Dropping event: {}", e);
                self.effects.on_decode_error(&e);
            }
            Err(e) => {
                error!("Discarding malformed message: {}", e);
                self.effects.on_decode_error(&e);
            }
        }
    }

    fn publish(&mut self, transitions: &[Transition]) {
        let snapshot = self.render_snapshot();
        self.effects.on_transitions(transitions, &snapshot);
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    fn teardown(&mut self) {
        self.transport.close();
        self.effects.teardown();
        let snapshot = self.render_snapshot();
        self.effects.on_connection_state(self.transport.state(), &snapshot);
        self.snapshot.send_replace(snapshot);
    }

    fn render_snapshot(&self) -> RenderSnapshot {
        RenderSnapshot::new(self.transport.state(), self.session.snapshot())
    }
}
