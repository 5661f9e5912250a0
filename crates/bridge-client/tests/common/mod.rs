//! Shared fixtures for the bridge client integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rvoip_bridge_client::{
    BoundedLogStore, BridgeClient, BridgeConfig, Collaborators, LogLevel, LogStore, MemoryConnector,
    MemorySettingsStore, RenderSink, RenderSnapshot, TonePlayer,
};

#[derive(Default)]
pub struct RecordingTones {
    pub pulses: AtomicUsize,
    pub silences: AtomicUsize,
}

impl RecordingTones {
    pub fn pulses(&self) -> usize {
        self.pulses.load(Ordering::SeqCst)
    }

    pub fn silences(&self) -> usize {
        self.silences.load(Ordering::SeqCst)
    }
}

impl TonePlayer for RecordingTones {
    fn pulse(&self) {
        self.pulses.fetch_add(1, Ordering::SeqCst);
    }

    fn silence(&self) {
        self.silences.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub snapshots: Mutex<Vec<RenderSnapshot>>,
    pub lines: Mutex<Vec<String>>,
    pub durations: Mutex<Vec<Option<String>>>,
}

impl RenderSink for RecordingSink {
    fn render(&self, snapshot: &RenderSnapshot) {
        self.snapshots.lock().push(snapshot.clone());
    }

    fn log_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }

    fn call_duration(&self, display: Option<&str>) {
        self.durations.lock().push(display.map(str::to_string));
    }
}

pub struct Harness {
    pub client: BridgeClient,
    pub connector: MemoryConnector,
    pub tones: Arc<RecordingTones>,
    pub sink: Arc<RecordingSink>,
    pub settings: Arc<MemorySettingsStore>,
    pub log: Arc<BoundedLogStore>,
}

impl Harness {
    pub fn start() -> Self {
        Self::start_with_settings(MemorySettingsStore::new())
    }

    pub fn start_with_settings(settings: MemorySettingsStore) -> Self {
        let connector = MemoryConnector::new();
        let tones = Arc::new(RecordingTones::default());
        let sink = Arc::new(RecordingSink::default());
        let settings = Arc::new(settings);
        let log = Arc::new(BoundedLogStore::new(200));
        let collaborators = Collaborators::new()
            .with_tone_player(tones.clone())
            .with_render_sink(sink.clone())
            .with_settings_store(settings.clone())
            .with_log_store(log.clone());
        let client = BridgeClient::start(
            BridgeConfig::new().with_server_url("ws://gateway.test:8765"),
            Arc::new(connector.clone()),
            collaborators,
        )
        .unwrap();
        Self {
            client,
            connector,
            tones,
            sink,
            settings,
            log,
        }
    }

    /// Start and connect, leaving the session open
    pub async fn connected() -> Self {
        let harness = Self::start();
        harness.client.connect().await.unwrap();
        settle().await;
        harness
    }

    pub fn session(&self) -> rvoip_bridge_client::transport::MemorySession {
        self.connector.latest().unwrap()
    }

    pub async fn push(&self, event_type: &str, payload: serde_json::Value) {
        self.session().push_event(event_type, payload);
        settle().await;
    }

    pub fn error_entries(&self) -> usize {
        self.log.entries().iter().filter(|e| e.level == LogLevel::Error).count()
    }
}

/// Let every ready task run; with paused time this returns once the runtime
/// is idle
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
