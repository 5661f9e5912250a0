//! Call state and call information
//!
//! There is never more than one call. [`CallInfo`] carries the attributes that
//! travel with the current [`CallState`]: the remote party, the direction and
//! the time the call became active.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// State of the single call slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CallState {
    /// No call
    #[default]
    Idle,
    /// Outgoing call requested locally
    Dialing,
    /// Incoming call waiting to be answered
    IncomingRinging,
    /// Outgoing call being set up by the gateway
    ConnectingOutbound,
    /// Call established and media bridged
    Active,
    /// Call teardown in progress
    Ending,
}

impl CallState {
    /// Whether an outgoing call is being set up
    pub fn is_outbound_setup(&self) -> bool {
        matches!(self, CallState::Dialing | CallState::ConnectingOutbound)
    }

    /// Whether the call slot is occupied
    pub fn is_busy(&self) -> bool {
        !matches!(self, CallState::Idle)
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallState::Idle => write!(f, "Idle"),
            CallState::Dialing => write!(f, "Dialing"),
            CallState::IncomingRinging => write!(f, "IncomingRinging"),
            CallState::ConnectingOutbound => write!(f, "ConnectingOutbound"),
            CallState::Active => write!(f, "Active"),
            CallState::Ending => write!(f, "Ending"),
        }
    }
}

/// Direction of the current call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Call placed by this client
    Outbound,
    /// Call received from a remote party
    Inbound,
}

/// Attributes carried alongside the call state
///
/// Invariant: `started_at` is set if and only if the call is `Active`, and
/// `remote_party_number` is empty when the call is `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallInfo {
    /// Number of the remote party
    pub remote_party_number: String,
    /// Direction, `None` when idle
    pub direction: Option<CallDirection>,
    /// When the call became active
    pub started_at: Option<DateTime<Utc>>,
}

impl CallInfo {
    /// Elapsed call time at `now`, if the call is active
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|started| now.signed_duration_since(started))
    }
}

/// Format a call duration as `mm:ss`
///
/// Minutes keep counting past 59; negative durations (clock skew) read as zero.
///
/// ```rust
/// use rvoip_bridge_client::call::format_duration;
/// use chrono::Duration;
///
/// assert_eq!(format_duration(Duration::seconds(75)), "01:15");
/// assert_eq!(format_duration(Duration::seconds(3725)), "62:05");
/// ```
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.num_seconds().max(0);
    format!("{:02}:{:02}", total / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::zero()), "00:00");
        assert_eq!(format_duration(Duration::seconds(59)), "00:59");
        assert_eq!(format_duration(Duration::seconds(600)), "10:00");
        assert_eq!(format_duration(Duration::seconds(-3)), "00:00");
    }

    #[test]
    fn test_elapsed_only_when_started() {
        let now = Utc::now();
        let idle = CallInfo::default();
        assert!(idle.elapsed(now).is_none());

        let active = CallInfo {
            remote_party_number: "1002".to_string(),
            direction: Some(CallDirection::Outbound),
            started_at: Some(now - Duration::seconds(42)),
        };
        assert_eq!(active.elapsed(now), Some(Duration::seconds(42)));
    }

    #[test]
    fn test_state_predicates() {
        assert!(CallState::ConnectingOutbound.is_outbound_setup());
        assert!(!CallState::IncomingRinging.is_outbound_setup());
        assert!(CallState::Ending.is_busy());
        assert!(!CallState::Idle.is_busy());
    }
}
