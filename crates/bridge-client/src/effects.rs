//! Side-effect coordinator
//!
//! Strictly downstream of the state machine: it reads snapshots and
//! transitions and drives the collaborators, but never changes session state.
//!
//! It owns the two periodic timers. The ringtone pulses while a call is
//! `IncomingRinging`; the call timer refreshes the `mm:ss` display while a call
//! is `Active`. Both are [`tokio::time::Interval`]s polled by the dispatcher
//! through [`SideEffectCoordinator::next_tick`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::call::{CallInfo, CallState, format_duration};
use crate::collaborators::{Collaborators, LogDirection, LogEntry, LogLevel, LogStore, RenderSnapshot};
use crate::config::DEFAULT_LOG_CAPACITY;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::Command;
use crate::registration::{Credentials, RegistrationState};
use crate::session::Transition;
use crate::transport::ConnectionState;

/// Which periodic timer fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Ringtone,
    CallDuration,
}

/// Drives render, audio, timers and persistence from state transitions
pub struct SideEffectCoordinator {
    collaborators: Collaborators,
    log: Arc<dyn LogStore>,
    ringtone_pulse: Duration,
    duration_tick: Duration,
    ringtone: Option<Interval>,
    call_timer: Option<Interval>,
    active_call: Option<CallInfo>,
    pending_credentials: Option<Credentials>,
}

impl SideEffectCoordinator {
    pub fn new(mut collaborators: Collaborators, ringtone_pulse: Duration, duration_tick: Duration) -> Self {
        let log = collaborators.log_store_or_bounded(DEFAULT_LOG_CAPACITY);
        Self {
            collaborators,
            log,
            ringtone_pulse,
            duration_tick,
            ringtone: None,
            call_timer: None,
            active_call: None,
            pending_credentials: None,
        }
    }

    pub fn ringtone_running(&self) -> bool {
        self.ringtone.is_some()
    }

    pub fn call_timer_running(&self) -> bool {
        self.call_timer.is_some()
    }

    /// Credentials saved by the last confirmed registration
    pub fn saved_credentials(&self) -> BridgeResult<Option<Credentials>> {
        self.collaborators.settings.load()
    }

    /// React to the transitions of one command or event
    pub fn on_transitions(&mut self, transitions: &[Transition], snapshot: &RenderSnapshot) {
        for transition in transitions {
            match transition {
                Transition::Call { from, to } => {
                    if *from == CallState::IncomingRinging {
                        self.stop_ringtone();
                    }
                    if *from == CallState::Active {
                        self.stop_call_timer();
                    }
                    if *to == CallState::IncomingRinging {
                        self.start_ringtone();
                    }
                    if *to == CallState::Active {
                        self.start_call_timer(&snapshot.call_info);
                    }
                }
                Transition::CallUpdated => {
                    if let Some(call) = self.active_call.as_mut() {
                        *call = snapshot.call_info.clone();
                    }
                }
                Transition::Registration { to, .. } => match to {
                    RegistrationState::Registered => self.persist_credentials(),
                    RegistrationState::Unregistered => {
                        if self.pending_credentials.take().is_some() {
                            debug!("Discarding unconfirmed credentials");
                        }
                    }
                    RegistrationState::Registering => {}
                },
                Transition::CallFailed { reason } => {
                    // Safety stop, even if nothing was ringing.
                    self.collaborators.tones.silence();
                    self.record(LogLevel::Error, LogDirection::Incoming, format!("Call failed: {}", reason));
                }
                Transition::RemoteError { message } => {
                    let err = BridgeError::remote(message.clone());
                    self.record(LogLevel::Error, LogDirection::Incoming, err.to_string());
                }
                Transition::Progress(text) | Transition::Notice(text) => {
                    self.record(LogLevel::Info, LogDirection::Local, text.clone());
                }
            }
        }
        if !transitions.is_empty() {
            self.collaborators.render.render(snapshot);
        }
    }

    pub fn on_connection_state(&mut self, state: ConnectionState, snapshot: &RenderSnapshot) {
        let level = match state {
            ConnectionState::Disconnected => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.record(level, LogDirection::Local, format!("Connection {}", state));
        self.collaborators.render.render(snapshot);
    }

    /// Forward a raw inbound message before it is decoded
    pub fn on_raw_event(&mut self, raw: &str) {
        self.record(LogLevel::Debug, LogDirection::Incoming, raw);
    }

    /// Record an inbound message that was dropped
    pub fn on_decode_error(&mut self, err: &BridgeError) {
        let level = match err {
            BridgeError::UnknownEventType { .. } => LogLevel::Warn,
            _ => LogLevel::Error,
        };
        self.record(level, LogDirection::Local, err.to_string());
    }

    pub fn on_command_sent(&mut self, command: &Command) {
        if let Command::Register(credentials) = command {
            self.pending_credentials = Some(credentials.clone());
        }
        self.record(LogLevel::Info, LogDirection::Outgoing, command.describe());
    }

    pub fn on_command_rejected(&mut self, command: &Command, err: &BridgeError) {
        self.record(
            LogLevel::Warn,
            LogDirection::Local,
            format!("{} not sent: {}", command.command_type(), err),
        );
    }

    /// Wait for the next timer tick
    ///
    /// Pends forever while no timer runs. Cancel-safe.
    pub async fn next_tick(&mut self) -> Tick {
        match (self.ringtone.as_mut(), self.call_timer.as_mut()) {
            (Some(ringtone), Some(call_timer)) => tokio::select! {
                _ = ringtone.tick() => Tick::Ringtone,
                _ = call_timer.tick() => Tick::CallDuration,
            },
            (Some(ringtone), None) => {
                ringtone.tick().await;
                Tick::Ringtone
            }
            (None, Some(call_timer)) => {
                call_timer.tick().await;
                Tick::CallDuration
            }
            (None, None) => std::future::pending().await,
        }
    }

    pub fn on_tick(&mut self, tick: Tick, now: DateTime<Utc>) {
        match tick {
            Tick::Ringtone if self.ringtone.is_some() => self.collaborators.tones.pulse(),
            Tick::CallDuration if self.call_timer.is_some() => self.show_duration(now),
            _ => {}
        }
    }

    /// Stop both timers and any tone
    pub fn teardown(&mut self) {
        self.stop_ringtone();
        self.stop_call_timer();
        self.pending_credentials = None;
    }

    fn start_ringtone(&mut self) {
        self.collaborators.tones.pulse();
        self.ringtone = Some(periodic(self.ringtone_pulse));
        debug!("Ringtone started");
    }

    fn stop_ringtone(&mut self) {
        if self.ringtone.take().is_some() {
            debug!("Ringtone stopped");
        }
        self.collaborators.tones.silence();
    }

    fn start_call_timer(&mut self, call: &CallInfo) {
        self.active_call = Some(call.clone());
        self.call_timer = Some(periodic(self.duration_tick));
        self.show_duration(Utc::now());
    }

    fn stop_call_timer(&mut self) {
        let had_timer = self.call_timer.take().is_some();
        if self.active_call.take().is_some() || had_timer {
            self.collaborators.render.call_duration(None);
        }
    }

    fn show_duration(&self, now: DateTime<Utc>) {
        if let Some(elapsed) = self.active_call.as_ref().and_then(|call| call.elapsed(now)) {
            let display = format_duration(elapsed);
            self.collaborators.render.call_duration(Some(&display));
        }
    }

    fn persist_credentials(&mut self) {
        let Some(credentials) = self.pending_credentials.take() else {
            return;
        };
        match self.collaborators.settings.save(&credentials) {
            Ok(()) => self.record(
                LogLevel::Info,
                LogDirection::Local,
                format!("Saved settings for {}", credentials.server_address()),
            ),
            Err(e) => {
                warn!("Failed to save settings: {}", e);
                self.record(LogLevel::Error, LogDirection::Local, format!("Failed to save settings: {}", e));
            }
        }
    }

    fn record(&self, level: LogLevel, direction: LogDirection, message: impl Into<String>) {
        let entry = LogEntry::new(level, direction, message);
        self.collaborators.render.log_line(&entry.to_string());
        self.log.append(entry);
    }
}

// First tick one period from now; the entry action covers the immediate one.
fn periodic(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{BoundedLogStore, LogStore, MemorySettingsStore, RenderSink, TonePlayer};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTones {
        pulses: AtomicUsize,
        silences: AtomicUsize,
    }

    impl TonePlayer for CountingTones {
        fn pulse(&self) {
            self.pulses.fetch_add(1, Ordering::SeqCst);
        }
        fn silence(&self) {
            self.silences.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        renders: AtomicUsize,
        durations: Mutex<Vec<Option<String>>>,
    }

    impl RenderSink for RecordingSink {
        fn render(&self, _snapshot: &RenderSnapshot) {
            self.renders.fetch_add(1, Ordering::SeqCst);
        }
        fn log_line(&self, _line: &str) {}
        fn call_duration(&self, display: Option<&str>) {
            self.durations.lock().push(display.map(str::to_string));
        }
    }

    struct Fixture {
        tones: Arc<CountingTones>,
        sink: Arc<RecordingSink>,
        settings: Arc<MemorySettingsStore>,
        log: Arc<BoundedLogStore>,
        coordinator: SideEffectCoordinator,
    }

    fn fixture() -> Fixture {
        let tones = Arc::new(CountingTones::default());
        let sink = Arc::new(RecordingSink::default());
        let settings = Arc::new(MemorySettingsStore::new());
        let log = Arc::new(BoundedLogStore::new(100));
        let collaborators = Collaborators::new()
            .with_tone_player(tones.clone())
            .with_render_sink(sink.clone())
            .with_settings_store(settings.clone())
            .with_log_store(log.clone());
        Fixture {
            tones,
            sink,
            settings,
            log,
            coordinator: SideEffectCoordinator::new(
                collaborators,
                Duration::from_secs(1),
                Duration::from_secs(1),
            ),
        }
    }

    fn snapshot(call: CallState, started_at: Option<DateTime<Utc>>) -> RenderSnapshot {
        RenderSnapshot {
            call,
            call_info: CallInfo {
                started_at,
                ..CallInfo::default()
            },
            ..RenderSnapshot::default()
        }
    }

    fn call(from: CallState, to: CallState) -> Transition {
        Transition::Call { from, to }
    }

    fn registered() -> Transition {
        Transition::Registration {
            from: RegistrationState::Registering,
            to: RegistrationState::Registered,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ringtone_follows_incoming_ringing() {
        let mut f = fixture();
        let ringing = snapshot(CallState::IncomingRinging, None);
        f.coordinator.on_transitions(&[call(CallState::Idle, CallState::IncomingRinging)], &ringing);
        assert!(f.coordinator.ringtone_running());
        assert_eq!(f.tones.pulses.load(Ordering::SeqCst), 1);

        for _ in 0..3 {
            let tick = f.coordinator.next_tick().await;
            assert_eq!(tick, Tick::Ringtone);
            f.coordinator.on_tick(tick, Utc::now());
        }
        assert_eq!(f.tones.pulses.load(Ordering::SeqCst), 4);

        f.coordinator.on_transitions(&[call(CallState::IncomingRinging, CallState::Idle)], &snapshot(CallState::Idle, None));
        assert!(!f.coordinator.ringtone_running());
        assert_eq!(f.tones.silences.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_failed_silences_even_when_not_ringing() {
        let mut f = fixture();
        let failed = Transition::CallFailed { reason: "486 Busy".to_string() };
        f.coordinator.on_transitions(&[failed], &snapshot(CallState::Idle, None));
        assert_eq!(f.tones.silences.load(Ordering::SeqCst), 1);

        let errors = f.log.entries().into_iter().filter(|e| e.level == LogLevel::Error).count();
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timer_shows_and_clears_duration() {
        let mut f = fixture();
        let started_at = Utc::now();
        let active = snapshot(CallState::Active, Some(started_at));
        f.coordinator.on_transitions(&[call(CallState::Dialing, CallState::Active)], &active);
        assert!(f.coordinator.call_timer_running());

        let tick = f.coordinator.next_tick().await;
        assert_eq!(tick, Tick::CallDuration);
        f.coordinator.on_tick(tick, started_at + chrono::Duration::seconds(65));

        f.coordinator.on_transitions(&[call(CallState::Active, CallState::Idle)], &snapshot(CallState::Idle, None));
        assert!(!f.coordinator.call_timer_running());

        let durations = f.sink.durations.lock().clone();
        assert_eq!(durations.len(), 3);
        assert!(durations[0].is_some());
        assert_eq!(durations[1].as_deref(), Some("01:05"));
        assert_eq!(durations[2], None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_saved_once_after_confirmation() {
        let mut f = fixture();
        let credentials = Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001");
        f.coordinator.on_command_sent(&Command::Register(credentials.clone()));
        assert_eq!(f.settings.save_count(), 0);

        let snap = RenderSnapshot::default();
        f.coordinator.on_transitions(&[registered()], &snap);
        f.coordinator.on_transitions(&[registered()], &snap);
        assert_eq!(f.settings.save_count(), 1);
        assert_eq!(f.coordinator.saved_credentials().unwrap(), Some(credentials));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_registration_is_not_saved() {
        let mut f = fixture();
        let credentials = Credentials::new("pbx.example.com", 5060, "alice", "wrong", "1001");
        f.coordinator.on_command_sent(&Command::Register(credentials));

        let reverted = Transition::Registration {
            from: RegistrationState::Registering,
            to: RegistrationState::Unregistered,
        };
        let snap = RenderSnapshot::default();
        f.coordinator.on_transitions(&[reverted], &snap);
        f.coordinator.on_transitions(&[registered()], &snap);
        assert_eq!(f.settings.save_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_transition_batch_is_rendered() {
        let mut f = fixture();
        f.coordinator.on_transitions(&[Transition::Notice("hello".to_string())], &RenderSnapshot::default());
        f.coordinator.on_transitions(&[], &RenderSnapshot::default());
        f.coordinator.on_connection_state(ConnectionState::Connecting, &RenderSnapshot::default());
        assert_eq!(f.sink.renders.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_detail_update_is_rendered() {
        let mut f = fixture();
        f.coordinator.on_transitions(&[Transition::CallUpdated], &snapshot(CallState::IncomingRinging, None));
        assert_eq!(f.sink.renders.load(Ordering::SeqCst), 1);
        assert!(!f.coordinator.ringtone_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gateway_error_is_logged_as_remote_failure() {
        let mut f = fixture();
        let error = Transition::RemoteError { message: "Not registered".to_string() };
        f.coordinator.on_transitions(&[error], &RenderSnapshot::default());

        let entries = f.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[0].message, "Remote failure: Not registered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_timers() {
        let mut f = fixture();
        f.coordinator.on_transitions(
            &[call(CallState::Idle, CallState::IncomingRinging)],
            &snapshot(CallState::IncomingRinging, None),
        );
        f.coordinator.teardown();
        assert!(!f.coordinator.ringtone_running());
        assert!(!f.coordinator.call_timer_running());

        let idle = tokio::time::timeout(Duration::from_secs(10), f.coordinator.next_tick()).await;
        assert!(idle.is_err());
    }
}
