//! Error types for the bridge client
//!
//! Nothing in the bridge is fatal: every error is logged by the component that
//! produced it and the session returns to a previously reachable state. The
//! [`ErrorCategory`] mirrors how each failure is handled.

use thiserror::Error;

/// Result type for bridge client operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Why a command was refused before any transport I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardReason {
    /// DTMF requires an active call
    NoActiveCall,
    /// Messaging requires a confirmed registration
    NotRegistered,
    /// Answering requires a ringing incoming call
    NoIncomingCall,
    /// Only one call exists at a time
    CallInProgress,
}

impl std::fmt::Display for GuardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardReason::NoActiveCall => write!(f, "no active call"),
            GuardReason::NotRegistered => write!(f, "not registered"),
            GuardReason::NoIncomingCall => write!(f, "no incoming call"),
            GuardReason::CallInProgress => write!(f, "a call is already in progress"),
        }
    }
}

/// Errors that can occur in the bridge client
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Command attempted while the signaling connection is not open
    #[error("Not connected to the signaling service")]
    NotConnected,

    /// Transport level failure (open, write or read)
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// Inbound message could not be decoded
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// Inbound event type outside the known vocabulary
    #[error("Unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    /// Command refused locally by a state guard
    #[error("Command rejected: {0}")]
    GuardRejected(GuardReason),

    /// Failure reported by the signaling service
    #[error("Remote failure: {message}")]
    RemoteFailure { message: String },

    /// Command arguments failed local validation
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Settings or log persistence failed
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// The dispatcher task is gone
    #[error("Bridge client has shut down")]
    Closed,
}

/// Error categories for classification and handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No open connection; the command was dropped
    TransportUnavailable,
    /// Undecodable inbound message; dropped
    MalformedMessage,
    /// Forward-compatible unknown event; dropped
    UnknownEventType,
    /// Refused locally before transport I/O
    GuardRejected,
    /// Reported by the signaling service
    RemoteFailure,
    /// Bad configuration or arguments
    Configuration,
    /// Settings/log persistence
    Storage,
    /// Client lifecycle
    Internal,
}

impl BridgeError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a malformed message error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Create an unknown event type error
    pub fn unknown_event(event_type: impl Into<String>) -> Self {
        Self::UnknownEventType {
            event_type: event_type.into(),
        }
    }

    /// Create a remote failure error
    pub fn remote(message: impl Into<String>) -> Self {
        Self::RemoteFailure {
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Get the handling category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::NotConnected | BridgeError::Transport { .. } => {
                ErrorCategory::TransportUnavailable
            }
            BridgeError::MalformedMessage { .. } => ErrorCategory::MalformedMessage,
            BridgeError::UnknownEventType { .. } => ErrorCategory::UnknownEventType,
            BridgeError::GuardRejected(_) => ErrorCategory::GuardRejected,
            BridgeError::RemoteFailure { .. } => ErrorCategory::RemoteFailure,
            BridgeError::InvalidArgument { .. } | BridgeError::Configuration { .. } => {
                ErrorCategory::Configuration
            }
            BridgeError::Storage { .. } => ErrorCategory::Storage,
            BridgeError::Closed => ErrorCategory::Internal,
        }
    }

    /// Check if reissuing the same command later may succeed
    ///
    /// Nothing is retried automatically; this only tells the caller whether
    /// asking the user to try again makes sense.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::NotConnected
                | BridgeError::Transport { .. }
                | BridgeError::GuardRejected(_)
                | BridgeError::RemoteFailure { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}
