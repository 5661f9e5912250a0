//! Session state machine
//!
//! [`SessionStateMachine`] is the only writer of [`RegistrationState`],
//! [`CallState`] and [`CallInfo`]. Everything else reads a
//! [`SessionSnapshot`] or reacts to the [`Transition`]s it returns.
//!
//! Two inputs drive it:
//!
//! - **Local commands.** [`check`](SessionStateMachine::check) runs the guards
//!   before any transport I/O; [`issue`](SessionStateMachine::issue) applies
//!   the optimistic transition once the command went out.
//! - **Remote events.** [`apply`](SessionStateMachine::apply) folds one decoded
//!   [`ServerEvent`] into the state, in arrival order.
//!
//! # Call transitions
//!
//! | Current | Trigger | New |
//! |---|---|---|
//! | Idle | cmd `make_call` | Dialing |
//! | any | evt `incoming_call` | IncomingRinging |
//! | Dialing | evt `call_ringing` | Dialing (progress only) |
//! | IncomingRinging | cmd `answer_call` | IncomingRinging (awaits confirmation) |
//! | Dialing / IncomingRinging | evt `call_answered` | Active |
//! | any non-Idle | evt `call_ended` | Idle |
//! | any | evt `call_failed` | Idle |
//! | any | cmd `hangup_call` | Idle (optimistic) |
//!
//! Hangup is optimistic, answer is not: the gateway has to bridge media before
//! a call is really up. A `status_update` overwrites every optimistic guess.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use rvoip_bridge_client::call::CallState;
//! use rvoip_bridge_client::protocol::{Command, ServerEvent};
//! use rvoip_bridge_client::session::SessionStateMachine;
//!
//! let mut machine = SessionStateMachine::new();
//! let dial = Command::MakeCall { number: "1002".to_string() };
//! machine.check(&dial).unwrap();
//! machine.issue(&dial, Utc::now());
//! assert_eq!(machine.call_state(), CallState::Dialing);
//!
//! machine.apply(&ServerEvent::CallAnswered, Utc::now());
//! assert_eq!(machine.call_state(), CallState::Active);
//! assert!(machine.call_info().started_at.is_some());
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::call::{CallDirection, CallInfo, CallState};
use crate::error::{BridgeError, BridgeResult, GuardReason};
use crate::protocol::{Command, ServerEvent, StatusSnapshot};
use crate::registration::RegistrationState;

/// Read-only view of the session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Registration state
    pub registration: RegistrationState,
    /// Call state
    pub call: CallState,
    /// Attributes of the current call
    pub call_info: CallInfo,
}

/// A change produced by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Registration state changed
    Registration {
        from: RegistrationState,
        to: RegistrationState,
    },
    /// Call state changed
    Call { from: CallState, to: CallState },
    /// Same call state, new remote party or direction
    CallUpdated,
    /// Call progress without a state change
    Progress(String),
    /// The gateway reported a failed call
    CallFailed { reason: String },
    /// The gateway rejected a command
    RemoteError { message: String },
    /// Informational notice from the gateway or the machine itself
    Notice(String),
}

/// Local model of registration and call state
#[derive(Debug, Default)]
pub struct SessionStateMachine {
    registration: RegistrationState,
    call: CallState,
    info: CallInfo,
}

impl SessionStateMachine {
    /// Start `Unregistered` and `Idle`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registration_state(&self) -> RegistrationState {
        self.registration
    }

    pub fn call_state(&self) -> CallState {
        self.call
    }

    pub fn call_info(&self) -> &CallInfo {
        &self.info
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            registration: self.registration,
            call: self.call,
            call_info: self.info.clone(),
        }
    }

    /// Run argument validation and state guards for a command
    ///
    /// Pure: rejection never changes state.
    pub fn check(&self, command: &Command) -> BridgeResult<()> {
        command.validate()?;
        let refusal = match command {
            Command::MakeCall { .. } if self.call.is_busy() => Some(GuardReason::CallInProgress),
            Command::AnswerCall if self.call != CallState::IncomingRinging => Some(GuardReason::NoIncomingCall),
            Command::SendDtmf { .. } if self.call != CallState::Active => Some(GuardReason::NoActiveCall),
            Command::SendMessage { .. } if self.registration != RegistrationState::Registered => {
                Some(GuardReason::NotRegistered)
            }
            _ => None,
        };
        match refusal {
            Some(reason) => Err(BridgeError::GuardRejected(reason)),
            None => Ok(()),
        }
    }

    /// Apply the local side of a command that was just sent
    pub fn issue(&mut self, command: &Command, now: DateTime<Utc>) -> Vec<Transition> {
        let mut out = Vec::new();
        match command {
            Command::MakeCall { number } => {
                self.move_call(CallState::Dialing, number.clone(), Some(CallDirection::Outbound), now, &mut out);
                out.push(Transition::Progress(format!("Calling {}", number)));
            }
            Command::AnswerCall => {
                out.push(Transition::Progress(format!("Answering {}", self.info.remote_party_number)));
            }
            Command::HangupCall => {
                self.move_call(CallState::Idle, String::new(), None, now, &mut out);
            }
            Command::Register(_) => {
                self.set_registration(RegistrationState::Registering, &mut out);
            }
            Command::GetStatus
            | Command::Unregister
            | Command::SendDtmf { .. }
            | Command::SendMessage { .. }
            | Command::Ping { .. } => {}
        }
        out
    }

    /// Fold one remote event into the state
    pub fn apply(&mut self, event: &ServerEvent, now: DateTime<Utc>) -> Vec<Transition> {
        let mut out = Vec::new();
        match event {
            ServerEvent::StatusUpdate(status) => self.apply_status(status, now, &mut out),
            ServerEvent::SipRegistered { .. } => {
                self.set_registration(RegistrationState::Registered, &mut out);
            }
            ServerEvent::SipUnregistered { .. } => {
                self.set_registration(RegistrationState::Unregistered, &mut out);
                if self.call.is_busy() {
                    warn!("Registration dropped during {} call; keeping the call", self.call);
                    out.push(Transition::Notice("Registration lost during call".to_string()));
                }
            }
            ServerEvent::IncomingCall { caller_number } => {
                self.move_call(
                    CallState::IncomingRinging,
                    caller_number.clone(),
                    Some(CallDirection::Inbound),
                    now,
                    &mut out,
                );
            }
            ServerEvent::CallRinging => {
                if self.call.is_outbound_setup() {
                    out.push(Transition::Progress(format!("Ringing {}", self.info.remote_party_number)));
                } else {
                    debug!("Ignoring call_ringing while {}", self.call);
                }
            }
            ServerEvent::CallAnswered => {
                if self.call.is_outbound_setup() || self.call == CallState::IncomingRinging {
                    let remote = self.info.remote_party_number.clone();
                    let direction = self.info.direction;
                    self.move_call(CallState::Active, remote, direction, now, &mut out);
                } else {
                    debug!("Ignoring call_answered while {}", self.call);
                }
            }
            ServerEvent::CallEnded { reason } => {
                if self.call.is_busy() {
                    self.move_call(CallState::Idle, String::new(), None, now, &mut out);
                    if let Some(reason) = reason {
                        out.push(Transition::Progress(format!("Call ended: {}", reason)));
                    }
                }
            }
            ServerEvent::CallFailed { reason } => {
                self.move_call(CallState::Idle, String::new(), None, now, &mut out);
                out.push(Transition::CallFailed { reason: reason.clone() });
            }
            ServerEvent::Success { message } => {
                out.push(Transition::Notice(message.clone()));
            }
            ServerEvent::Error { message } => {
                if self.registration == RegistrationState::Registering {
                    self.set_registration(RegistrationState::Unregistered, &mut out);
                }
                if self.call.is_outbound_setup() {
                    self.move_call(CallState::Idle, String::new(), None, now, &mut out);
                }
                out.push(Transition::RemoteError { message: message.clone() });
            }
            ServerEvent::Pong => {}
        }
        out
    }

    fn apply_status(&mut self, status: &StatusSnapshot, now: DateTime<Utc>, out: &mut Vec<Transition>) {
        let registration = if status.registered {
            RegistrationState::Registered
        } else {
            RegistrationState::Unregistered
        };
        self.set_registration(registration, out);

        if status.active_call {
            let remote = if status.caller_number.is_empty() {
                self.info.remote_party_number.clone()
            } else {
                status.caller_number.clone()
            };
            let direction = self.info.direction.or(Some(if status.caller_number.is_empty() {
                CallDirection::Outbound
            } else {
                CallDirection::Inbound
            }));
            self.move_call(CallState::Active, remote, direction, now, out);
        } else if status.has_incoming {
            self.move_call(
                CallState::IncomingRinging,
                status.caller_number.clone(),
                Some(CallDirection::Inbound),
                now,
                out,
            );
        } else {
            self.move_call(CallState::Idle, String::new(), None, now, out);
        }
    }

    fn set_registration(&mut self, to: RegistrationState, out: &mut Vec<Transition>) {
        let from = self.registration;
        if from != to {
            self.registration = to;
            info!("Registration {} -> {}", from, to);
            out.push(Transition::Registration { from, to });
        }
    }

    // started_at is set exactly when the call is Active.
    fn move_call(
        &mut self,
        to: CallState,
        remote: String,
        direction: Option<CallDirection>,
        now: DateTime<Utc>,
        out: &mut Vec<Transition>,
    ) {
        let from = self.call;
        let updated = match to {
            CallState::Idle => CallInfo::default(),
            CallState::Active => CallInfo {
                remote_party_number: remote,
                direction,
                started_at: match from {
                    CallState::Active => self.info.started_at.or(Some(now)),
                    _ => Some(now),
                },
            },
            _ => CallInfo {
                remote_party_number: remote,
                direction,
                started_at: None,
            },
        };
        let previous = std::mem::replace(&mut self.info, updated);
        self.call = to;
        if from != to {
            info!("Call {} -> {}", from, to);
            out.push(Transition::Call { from, to });
        } else if self.info != previous {
            debug!("Call details updated while {}", to);
            out.push(Transition::CallUpdated);
        }
    }
}
