//! External collaborators driven by the side-effect coordinator
//!
//! The session core never renders, plays audio or touches storage itself. It
//! talks to four narrow interfaces instead:
//!
//! - [`RenderSink`] - receives state snapshots, log lines and the call timer
//! - [`TonePlayer`] - ringtone pulses and silence
//! - [`SettingsStore`] - saved credentials
//! - [`LogStore`] - bounded structured log
//!
//! Stock implementations cover headless use and tests: [`BroadcastRenderSink`]
//! fans notifications out to any number of subscribers, [`BoundedLogStore`]
//! keeps the newest entries, and [`JsonFileSettingsStore`] /
//! [`MemorySettingsStore`] persist credentials.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::call::{CallInfo, CallState};
use crate::config::DEFAULT_LOG_CAPACITY;
use crate::error::{BridgeError, BridgeResult};
use crate::registration::{Credentials, RegistrationState};
use crate::session::SessionSnapshot;
use crate::transport::ConnectionState;

/// Everything a front-end needs to draw the session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RenderSnapshot {
    pub connection: ConnectionState,
    pub registration: RegistrationState,
    pub call: CallState,
    pub call_info: CallInfo,
}

impl RenderSnapshot {
    /// Combine the connection state with a session snapshot
    pub fn new(connection: ConnectionState, session: SessionSnapshot) -> Self {
        Self {
            connection,
            registration: session.registration,
            call: session.call,
            call_info: session.call_info,
        }
    }
}

/// Receives opaque render notifications
pub trait RenderSink: Send + Sync {
    /// Redraw from a fresh snapshot
    fn render(&self, snapshot: &RenderSnapshot);

    /// Append a line to the visible log
    fn log_line(&self, line: &str);

    /// Show (`Some("mm:ss")`) or clear (`None`) the call timer
    fn call_duration(&self, display: Option<&str>);
}

/// Produces the ringtone
pub trait TonePlayer: Send + Sync {
    /// Play one ringtone pulse
    fn pulse(&self);

    /// Stop any tone; a no-op when nothing plays
    fn silence(&self);
}

/// Persists the credentials of the last confirmed registration
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> BridgeResult<Option<Credentials>>;
    fn save(&self, credentials: &Credentials) -> BridgeResult<()>;
}

/// Append-only structured log with bounded retention
pub trait LogStore: Send + Sync {
    fn append(&self, entry: LogEntry);

    /// Retained entries, oldest first
    fn entries(&self) -> Vec<LogEntry>;
}

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Where a logged message came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogDirection {
    /// Received from the gateway
    Incoming,
    /// Sent to the gateway
    Outgoing,
    /// Produced by the client
    Local,
}

/// One structured log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub direction: LogDirection,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, direction: LogDirection, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            direction,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let arrow = match self.direction {
            LogDirection::Incoming => "<-",
            LogDirection::Outgoing => "->",
            LogDirection::Local => "--",
        };
        write!(
            f,
            "[{}] {:5} {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            arrow,
            self.message
        )
    }
}

/// Log store that drops the oldest entries beyond a fixed cap
pub struct BoundedLogStore {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl BoundedLogStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for BoundedLogStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl LogStore for BoundedLogStore {
    fn append(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

/// Settings store keeping credentials in a pretty-printed JSON file
///
/// A missing file reads as "nothing saved"; the file and its parent
/// directories are created on the first save.
#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct SettingsFile {
    credentials: Option<Credentials>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileSettingsStore {
    fn load(&self) -> BridgeResult<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: SettingsFile = serde_json::from_str(&content).map_err(|e| {
            BridgeError::storage(format!("invalid settings file {}: {}", self.path.display(), e))
        })?;
        Ok(file.credentials)
    }

    fn save(&self, credentials: &Credentials) -> BridgeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = SettingsFile {
            credentials: Some(credentials.clone()),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|e| BridgeError::storage(e.to_string()))?;
        std::fs::write(&self.path, content)?;
        Ok(())
    }
}

/// Settings store held in memory
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    inner: Mutex<(Option<Credentials>, usize)>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with credentials already saved
    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            inner: Mutex::new((Some(credentials), 0)),
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.inner.lock().1
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> BridgeResult<Option<Credentials>> {
        Ok(self.inner.lock().0.clone())
    }

    fn save(&self, credentials: &Credentials) -> BridgeResult<()> {
        let mut inner = self.inner.lock();
        inner.0 = Some(credentials.clone());
        inner.1 += 1;
        Ok(())
    }
}

/// Notification published by [`BroadcastRenderSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderNotification {
    Snapshot(RenderSnapshot),
    LogLine(String),
    CallDuration(Option<String>),
}

/// Stream of render notifications
pub type RenderStream = BroadcastStream<RenderNotification>;

/// Render sink fanning notifications out over a broadcast channel
///
/// Slow subscribers lag and miss notifications; they never block the session.
#[derive(Debug, Clone)]
pub struct BroadcastRenderSink {
    sender: broadcast::Sender<RenderNotification>,
}

impl BroadcastRenderSink {
    /// Create a sink with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> RenderStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Get the number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn emit(&self, notification: RenderNotification) {
        // Ignore send errors (no receivers)
        let _ = self.sender.send(notification);
    }
}

impl RenderSink for BroadcastRenderSink {
    fn render(&self, snapshot: &RenderSnapshot) {
        self.emit(RenderNotification::Snapshot(snapshot.clone()));
    }

    fn log_line(&self, line: &str) {
        self.emit(RenderNotification::LogLine(line.to_string()));
    }

    fn call_duration(&self, display: Option<&str>) {
        self.emit(RenderNotification::CallDuration(display.map(str::to_string)));
    }
}

/// Render sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderSink;

impl RenderSink for NullRenderSink {
    fn render(&self, _snapshot: &RenderSnapshot) {}
    fn log_line(&self, _line: &str) {}
    fn call_duration(&self, _display: Option<&str>) {}
}

/// Tone player that never makes a sound
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentTonePlayer;

impl TonePlayer for SilentTonePlayer {
    fn pulse(&self) {}
    fn silence(&self) {}
}

/// The set of collaborators handed to the client
#[derive(Clone)]
pub struct Collaborators {
    pub render: Arc<dyn RenderSink>,
    pub tones: Arc<dyn TonePlayer>,
    pub settings: Arc<dyn SettingsStore>,
    /// `None` until [`BridgeClient::start`](crate::BridgeClient::start) fills
    /// in a [`BoundedLogStore`] sized by `BridgeConfig::log_capacity`
    pub log: Option<Arc<dyn LogStore>>,
}

impl Collaborators {
    /// Headless defaults: nothing rendered, no sound, credentials in memory
    /// and a log store sized when the client starts
    pub fn new() -> Self {
        Self {
            render: Arc::new(NullRenderSink),
            tones: Arc::new(SilentTonePlayer),
            settings: Arc::new(MemorySettingsStore::new()),
            log: None,
        }
    }

    pub fn with_render_sink(mut self, render: Arc<dyn RenderSink>) -> Self {
        self.render = render;
        self
    }

    pub fn with_tone_player(mut self, tones: Arc<dyn TonePlayer>) -> Self {
        self.tones = tones;
        self
    }

    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_log_store(mut self, log: Arc<dyn LogStore>) -> Self {
        self.log = Some(log);
        self
    }

    /// The log store, creating a [`BoundedLogStore`] of `capacity` if none
    /// was supplied
    pub fn log_store_or_bounded(&mut self, capacity: usize) -> Arc<dyn LogStore> {
        let log = self.log.get_or_insert_with(|| {
            let store: Arc<dyn LogStore> = Arc::new(BoundedLogStore::new(capacity));
            store
        });
        Arc::clone(log)
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn credentials() -> Credentials {
        Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001")
    }

    #[test]
    fn test_bounded_log_store_drops_oldest() {
        let store = BoundedLogStore::new(3);
        for i in 0..5 {
            store.append(LogEntry::new(LogLevel::Info, LogDirection::Local, format!("entry {}", i)));
        }
        let messages: Vec<_> = store.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_log_entry_display() {
        let entry = LogEntry::new(LogLevel::Error, LogDirection::Incoming, "boom");
        let line = entry.to_string();
        assert!(line.contains("ERROR"));
        assert!(line.ends_with("<- boom"));
    }

    #[test]
    fn test_json_settings_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSettingsStore::new(dir.path().join("nested").join("settings.json"));

        assert_eq!(store.load().unwrap(), None);
        store.save(&credentials()).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), Some(credentials()));
    }

    #[test]
    fn test_json_settings_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileSettingsStore::new(path);
        assert!(matches!(store.load(), Err(BridgeError::Storage { .. })));
    }

    #[test]
    fn test_memory_settings_store_counts_saves() {
        let store = MemorySettingsStore::new();
        store.save(&credentials()).unwrap();
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load().unwrap(), Some(credentials()));
    }

    #[tokio::test]
    async fn test_broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastRenderSink::new(8);
        let mut stream = sink.subscribe();
        assert_eq!(sink.receiver_count(), 1);

        sink.log_line("hello");
        sink.call_duration(Some("00:01"));

        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RenderNotification::LogLine("hello".to_string())
        );
        assert_eq!(
            stream.next().await.unwrap().unwrap(),
            RenderNotification::CallDuration(Some("00:01".to_string()))
        );
    }

    #[test]
    fn test_missing_log_store_is_created_with_capacity() {
        let mut collaborators = Collaborators::new();
        assert!(collaborators.log.is_none());

        let log = collaborators.log_store_or_bounded(2);
        for i in 0..5 {
            log.append(LogEntry::new(LogLevel::Info, LogDirection::Local, format!("entry {}", i)));
        }
        let messages: Vec<String> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["entry 3", "entry 4"]);

        // Later calls hand out the same store.
        assert_eq!(collaborators.log_store_or_bounded(50).entries().len(), 2);
    }

    #[test]
    fn test_supplied_log_store_wins() {
        let supplied = Arc::new(BoundedLogStore::new(10));
        let mut collaborators = Collaborators::new().with_log_store(supplied.clone());
        collaborators
            .log_store_or_bounded(1)
            .append(LogEntry::new(LogLevel::Warn, LogDirection::Local, "kept"));
        assert_eq!(supplied.len(), 1);
        assert_eq!(supplied.capacity(), 10);
    }
}
