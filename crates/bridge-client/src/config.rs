//! Bridge client configuration
//!
//! The reconnect endpoint and the fixed reconnect delay are configuration
//! constants: nothing here is negotiated with the signaling service.
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_bridge_client::config::BridgeConfig;
//! use std::time::Duration;
//!
//! let config = BridgeConfig::new()
//!     .with_server_url("ws://gateway.local:8765")
//!     .with_reconnect_delay(Duration::from_secs(5))
//!     .with_log_capacity(200);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
//! ```
//!
//! Configuration is usually read from a `[bridge]` table:
//!
//! ```rust
//! use rvoip_bridge_client::config::BridgeConfig;
//!
//! let config: BridgeConfig = serde_json::from_str(r#"{"server_url": "wss://pbx.example.com/ws"}"#).unwrap();
//! assert_eq!(config.reconnect_delay_ms, 5000); // defaults fill the rest
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BridgeError, BridgeResult};

/// Default signaling endpoint (the gateway's default WebSocket host and port)
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:8765";

/// Fixed delay before every reconnect attempt
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Interval between ringtone pulses while an incoming call rings
pub const DEFAULT_RINGTONE_PULSE: Duration = Duration::from_millis(1000);

/// Interval between call duration display updates
pub const DEFAULT_DURATION_TICK: Duration = Duration::from_millis(1000);

/// Retention cap of the log store
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Capacity of the render notification broadcast channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Bridge client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket URL of the signaling service (`ws://` or `wss://`)
    pub server_url: String,
    /// Fixed reconnect delay in milliseconds
    pub reconnect_delay_ms: u64,
    /// Ringtone pulse interval in milliseconds
    pub ringtone_pulse_ms: u64,
    /// Call duration refresh interval in milliseconds
    pub duration_tick_ms: u64,
    /// Maximum number of entries kept by the log store
    pub log_capacity: usize,
    /// Capacity of the render notification channel
    pub event_capacity: usize,
}

impl BridgeConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            ringtone_pulse_ms: DEFAULT_RINGTONE_PULSE.as_millis() as u64,
            duration_tick_ms: DEFAULT_DURATION_TICK.as_millis() as u64,
            log_capacity: DEFAULT_LOG_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Set the signaling endpoint
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the fixed reconnect delay
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the ringtone pulse interval
    pub fn with_ringtone_pulse(mut self, pulse: Duration) -> Self {
        self.ringtone_pulse_ms = pulse.as_millis() as u64;
        self
    }

    /// Set the call duration refresh interval
    pub fn with_duration_tick(mut self, tick: Duration) -> Self {
        self.duration_tick_ms = tick.as_millis() as u64;
        self
    }

    /// Set the log store retention cap
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Fixed reconnect delay
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Ringtone pulse interval
    pub fn ringtone_pulse(&self) -> Duration {
        Duration::from_millis(self.ringtone_pulse_ms)
    }

    /// Call duration refresh interval
    pub fn duration_tick(&self) -> Duration {
        Duration::from_millis(self.duration_tick_ms)
    }

    /// Validate the configuration
    ///
    /// The URL must parse with a `ws` or `wss` scheme and every interval and
    /// capacity must be non-zero.
    pub fn validate(&self) -> BridgeResult<()> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| BridgeError::config(format!("invalid server_url {:?}: {}", self.server_url, e)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(BridgeError::config(format!(
                "server_url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(BridgeError::config("reconnect_delay_ms must be greater than zero"));
        }
        if self.ringtone_pulse_ms == 0 || self.duration_tick_ms == 0 {
            return Err(BridgeError::config("timer intervals must be greater than zero"));
        }
        if self.log_capacity == 0 || self.event_capacity == 0 {
            return Err(BridgeError::config("capacities must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect_delay(), Duration::from_secs(5));
        assert_eq!(config.server_url, "ws://localhost:8765");
    }

    #[test]
    fn test_rejects_non_websocket_scheme() {
        let config = BridgeConfig::new().with_server_url("http://localhost:8765");
        assert!(matches!(config.validate(), Err(BridgeError::Configuration { .. })));
    }

    #[test]
    fn test_rejects_unparseable_url() {
        let config = BridgeConfig::new().with_server_url("not a url");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let config = BridgeConfig::new().with_reconnect_delay(Duration::ZERO);
        assert!(config.validate().is_err());

        let config = BridgeConfig::new().with_log_capacity(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"reconnect_delay_ms": 250}"#).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
        assert_eq!(config.server_url, DEFAULT_SERVER_URL);
        assert_eq!(config.log_capacity, DEFAULT_LOG_CAPACITY);
    }
}
