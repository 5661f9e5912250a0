//! Registration state and credentials
//!
//! SIP registration itself happens on the gateway. The client only submits a
//! [`Credentials`] snapshot and tracks the [`RegistrationState`] reported back.
//!
//! # Registration Process
//!
//! 1. **Submission** - `sip_register` is sent, state becomes `Registering`
//! 2. **Confirmation** - `sip_registered` arrives, state becomes `Registered`
//! 3. **Revocation** - `sip_unregistered` (or a status snapshot) resets it
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_bridge_client::registration::Credentials;
//!
//! let credentials = Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001");
//! assert!(credentials.validate().is_ok());
//! assert_eq!(credentials.server_address(), "pbx.example.com:5060");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Registration state as seen by the client
///
/// # State Transitions
///
/// `Unregistered` → `Registering` (local, optimistic) → `Registered` (remote)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RegistrationState {
    /// Not registered with the SIP server
    #[default]
    Unregistered,
    /// `sip_register` issued, waiting for confirmation
    Registering,
    /// Gateway confirmed the registration
    Registered,
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "Unregistered"),
            RegistrationState::Registering => write!(f, "Registering"),
            RegistrationState::Registered => write!(f, "Registered"),
        }
    }
}

/// SIP account credentials submitted with a registration command
///
/// Immutable snapshot; the state machine does not keep it after submission.
/// Persisting it is the settings store's job.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// SIP server host
    pub server: String,
    /// SIP server port
    pub port: u16,
    /// Authentication login
    pub login: String,
    /// Authentication password
    pub password: String,
    /// Extension number
    pub number: String,
}

impl Credentials {
    /// Create a credentials snapshot
    pub fn new(
        server: impl Into<String>,
        port: u16,
        login: impl Into<String>,
        password: impl Into<String>,
        number: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            login: login.into(),
            password: password.into(),
            number: number.into(),
        }
    }

    /// `host:port` of the SIP server
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }

    /// Check that every field the gateway requires is present
    pub fn validate(&self) -> BridgeResult<()> {
        let required = [
            ("sip_server", &self.server),
            ("login", &self.login),
            ("password", &self.password),
            ("number", &self.number),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(BridgeError::invalid_argument(format!("missing required field: {}", field)));
            }
        }
        if self.port == 0 {
            return Err(BridgeError::invalid_argument("sip_port must be in 1..=65535"));
        }
        Ok(())
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("number", &self.number)
            .finish()
    }
}
