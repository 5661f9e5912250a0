//! Message codec for the gateway's JSON vocabulary
//!
//! Every message on the wire is an envelope `{"type": <name>, "payload": {...}}`.
//! Outbound [`Command`]s are encoded with [`encode`]; inbound text is decoded
//! into a typed [`ServerEvent`] with [`decode`].
//!
//! Decoding never panics. Text that is not an envelope, or whose payload does
//! not fit its event type, is [`BridgeError::MalformedMessage`]. A well-formed
//! envelope with an unrecognized type is [`BridgeError::UnknownEventType`] so
//! that newer gateways can add events without breaking older clients.
//!
//! # Usage Examples
//!
//! ```rust
//! use rvoip_bridge_client::protocol::{decode, encode, Command, ServerEvent};
//!
//! let wire = encode(&Command::MakeCall { number: "1002".to_string() }).unwrap();
//! assert_eq!(wire, r#"{"type":"sip_make_call","payload":{"number":"1002"}}"#);
//!
//! let event = decode(r#"{"type":"incoming_call","payload":{"caller_number":"1003"}}"#).unwrap();
//! assert_eq!(event, ServerEvent::IncomingCall { caller_number: "1003".to_string() });
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::registration::Credentials;

/// Outbound command types understood by the gateway
pub const COMMAND_TYPES: &[&str] = &[
    "get_status",
    "sip_register",
    "sip_unregister",
    "sip_make_call",
    "sip_answer_call",
    "sip_hangup_call",
    "sip_send_dtmf",
    "sip_send_message",
    "ping",
];

/// Inbound event types this client recognizes
pub const EVENT_TYPES: &[&str] = &[
    "status_update",
    "sip_registered",
    "sip_unregistered",
    "incoming_call",
    "call_ringing",
    "call_answered",
    "call_ended",
    "call_failed",
    "success",
    "error",
    "pong",
];

/// Digits accepted by `sip_send_dtmf`
const DTMF_DIGITS: &str = "0123456789*#ABCD";

/// Command sent to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Ask for a full status snapshot
    GetStatus,
    /// Register the SIP account
    Register(Credentials),
    /// Drop the SIP registration
    Unregister,
    /// Place an outgoing call
    MakeCall {
        /// Number to dial
        number: String,
    },
    /// Answer the ringing incoming call
    AnswerCall,
    /// Hang up the current call
    HangupCall,
    /// Send an in-call DTMF digit
    SendDtmf {
        /// Digit from `0-9 * # A-D`
        digit: char,
    },
    /// Send a SIP MESSAGE
    SendMessage {
        /// Destination number
        to_number: String,
        /// Message body
        content: String,
    },
    /// Keep-alive answered with `pong`
    Ping {
        /// Client timestamp in milliseconds, echoed back by the gateway
        timestamp: i64,
    },
}

impl Command {
    /// Wire name of this command
    pub fn command_type(&self) -> &'static str {
        match self {
            Command::GetStatus => "get_status",
            Command::Register(_) => "sip_register",
            Command::Unregister => "sip_unregister",
            Command::MakeCall { .. } => "sip_make_call",
            Command::AnswerCall => "sip_answer_call",
            Command::HangupCall => "sip_hangup_call",
            Command::SendDtmf { .. } => "sip_send_dtmf",
            Command::SendMessage { .. } => "sip_send_message",
            Command::Ping { .. } => "ping",
        }
    }

    /// Validate the command arguments before anything is sent
    pub fn validate(&self) -> BridgeResult<()> {
        match self {
            Command::Register(credentials) => credentials.validate(),
            Command::MakeCall { number } if number.trim().is_empty() => {
                Err(BridgeError::invalid_argument("number to call is empty"))
            }
            Command::SendDtmf { digit } if !DTMF_DIGITS.contains(*digit) => {
                Err(BridgeError::invalid_argument(format!("invalid DTMF digit {:?}", digit)))
            }
            Command::SendMessage { to_number, content }
                if to_number.trim().is_empty() || content.is_empty() =>
            {
                Err(BridgeError::invalid_argument("message requires a number and content"))
            }
            _ => Ok(()),
        }
    }

    /// Short human readable description, safe to log (no secrets)
    pub fn describe(&self) -> String {
        match self {
            Command::Register(credentials) => format!(
                "{} {}@{}",
                self.command_type(),
                credentials.login,
                credentials.server_address()
            ),
            Command::MakeCall { number } => format!("{} {}", self.command_type(), number),
            Command::SendDtmf { digit } => format!("{} {}", self.command_type(), digit),
            Command::SendMessage { to_number, .. } => format!("{} {}", self.command_type(), to_number),
            _ => self.command_type().to_string(),
        }
    }

    fn payload(&self) -> BridgeResult<Value> {
        let payload = match self {
            Command::Register(credentials) => serde_json::to_value(RegisterPayload {
                sip_server: &credentials.server,
                sip_port: credentials.port,
                login: &credentials.login,
                password: &credentials.password,
                number: &credentials.number,
            })?,
            Command::MakeCall { number } => serde_json::json!({ "number": number }),
            Command::SendDtmf { digit } => serde_json::json!({ "digit": digit.to_string() }),
            Command::SendMessage { to_number, content } => {
                serde_json::json!({ "to_number": to_number, "content": content })
            }
            Command::Ping { timestamp } => serde_json::json!({ "timestamp": timestamp }),
            Command::GetStatus
            | Command::Unregister
            | Command::AnswerCall
            | Command::HangupCall => Value::Object(serde_json::Map::new()),
        };
        Ok(payload)
    }
}

#[derive(Serialize)]
struct RegisterPayload<'a> {
    sip_server: &'a str,
    sip_port: u16,
    login: &'a str,
    password: &'a str,
    number: &'a str,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    payload: Value,
}

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "type")]
    message_type: String,
    #[serde(default)]
    payload: Value,
}

/// Authoritative snapshot carried by `status_update`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusSnapshot {
    /// Whether the SIP account is registered
    #[serde(rename = "sip_registered")]
    pub registered: bool,
    /// Whether a call is established
    pub active_call: bool,
    /// Whether an incoming call is ringing
    pub has_incoming: bool,
    /// Number of the calling party, empty if none
    #[serde(default)]
    pub caller_number: String,
}

#[derive(Deserialize)]
struct NoticePayload {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct IncomingCallPayload {
    #[serde(default)]
    caller_number: String,
}

#[derive(Deserialize)]
struct CallEndedPayload {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct CallFailedPayload {
    #[serde(default)]
    reason: String,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    message: String,
}

/// Event pushed by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Full state snapshot
    StatusUpdate(StatusSnapshot),
    /// Registration confirmed
    SipRegistered {
        /// Gateway notice
        message: Option<String>,
    },
    /// Registration dropped
    SipUnregistered {
        /// Gateway notice
        message: Option<String>,
    },
    /// Incoming call offered
    IncomingCall {
        /// Number of the caller
        caller_number: String,
    },
    /// Remote party is ringing (180 Ringing)
    CallRinging,
    /// Call established
    CallAnswered,
    /// Call finished
    CallEnded {
        /// Termination reason, if any
        reason: Option<String>,
    },
    /// Call could not be set up or was torn down by an error
    CallFailed {
        /// Failure reason
        reason: String,
    },
    /// Acknowledgement of the last command
    Success {
        /// Gateway notice
        message: String,
    },
    /// Gateway rejected the last command
    Error {
        /// Gateway error text
        message: String,
    },
    /// Answer to `ping`
    Pong,
}

impl ServerEvent {
    /// Wire name of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::StatusUpdate(_) => "status_update",
            ServerEvent::SipRegistered { .. } => "sip_registered",
            ServerEvent::SipUnregistered { .. } => "sip_unregistered",
            ServerEvent::IncomingCall { .. } => "incoming_call",
            ServerEvent::CallRinging => "call_ringing",
            ServerEvent::CallAnswered => "call_answered",
            ServerEvent::CallEnded { .. } => "call_ended",
            ServerEvent::CallFailed { .. } => "call_failed",
            ServerEvent::Success { .. } => "success",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Pong => "pong",
        }
    }
}

/// Encode a command into its wire form
pub fn encode(command: &Command) -> BridgeResult<String> {
    let envelope = OutboundEnvelope {
        message_type: command.command_type(),
        payload: command.payload()?,
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode and validate an inbound message
pub fn decode(raw: &str) -> BridgeResult<ServerEvent> {
    let envelope: InboundEnvelope = serde_json::from_str(raw)
        .map_err(|e| BridgeError::malformed(format!("invalid envelope: {}", e)))?;
    let payload = match envelope.payload {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    };

    let event = match envelope.message_type.as_str() {
        "status_update" => ServerEvent::StatusUpdate(payload_as(&envelope.message_type, payload)?),
        "sip_registered" => {
            let notice: NoticePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::SipRegistered { message: notice.message }
        }
        "sip_unregistered" => {
            let notice: NoticePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::SipUnregistered { message: notice.message }
        }
        "incoming_call" => {
            let incoming: IncomingCallPayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::IncomingCall { caller_number: incoming.caller_number }
        }
        "call_ringing" => {
            let _: NoticePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::CallRinging
        }
        "call_answered" => {
            let _: NoticePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::CallAnswered
        }
        "call_ended" => {
            let ended: CallEndedPayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::CallEnded {
                reason: ended.reason.filter(|r| !r.is_empty()),
            }
        }
        "call_failed" => {
            let failed: CallFailedPayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::CallFailed { reason: failed.reason }
        }
        "success" => {
            let msg: MessagePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::Success { message: msg.message }
        }
        "error" => {
            let msg: MessagePayload = payload_as(&envelope.message_type, payload)?;
            ServerEvent::Error { message: msg.message }
        }
        "pong" => ServerEvent::Pong,
        other => return Err(BridgeError::unknown_event(other)),
    };
    Ok(event)
}

fn payload_as<T: serde::de::DeserializeOwned>(event_type: &str, payload: Value) -> BridgeResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| BridgeError::malformed(format!("invalid {} payload: {}", event_type, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(wire: &str) -> Value {
        serde_json::from_str(wire).unwrap()
    }

    #[test]
    fn test_encode_register_uses_gateway_field_names() {
        let credentials = Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001");
        let wire = encode(&Command::Register(credentials)).unwrap();
        assert_eq!(
            parse(&wire),
            serde_json::json!({
                "type": "sip_register",
                "payload": {
                    "sip_server": "pbx.example.com",
                    "sip_port": 5060,
                    "login": "alice",
                    "password": "secret",
                    "number": "1001"
                }
            })
        );
    }

    #[test]
    fn test_encode_commands_without_arguments_carry_empty_payload() {
        for command in [Command::GetStatus, Command::Unregister, Command::AnswerCall, Command::HangupCall] {
            let wire = parse(&encode(&command).unwrap());
            assert_eq!(wire["type"], command.command_type());
            assert_eq!(wire["payload"], serde_json::json!({}));
        }
    }

    #[test]
    fn test_encode_dtmf_and_message() {
        let dtmf = parse(&encode(&Command::SendDtmf { digit: '#' }).unwrap());
        assert_eq!(dtmf["payload"]["digit"], "#");

        let message = parse(
            &encode(&Command::SendMessage {
                to_number: "1002".to_string(),
                content: "hello".to_string(),
            })
            .unwrap(),
        );
        assert_eq!(message["type"], "sip_send_message");
        assert_eq!(message["payload"]["to_number"], "1002");
        assert_eq!(message["payload"]["content"], "hello");
    }

    #[test]
    fn test_every_command_type_is_listed() {
        let commands = [
            Command::GetStatus,
            Command::Unregister,
            Command::MakeCall { number: "1".to_string() },
            Command::AnswerCall,
            Command::HangupCall,
            Command::SendDtmf { digit: '1' },
            Command::Ping { timestamp: 0 },
        ];
        for command in commands {
            assert!(COMMAND_TYPES.contains(&command.command_type()));
        }
    }

    #[test]
    fn test_validate_rejects_bad_arguments() {
        assert!(Command::MakeCall { number: "  ".to_string() }.validate().is_err());
        assert!(Command::SendDtmf { digit: 'x' }.validate().is_err());
        assert!(Command::SendDtmf { digit: '5' }.validate().is_ok());
        assert!(
            Command::SendMessage { to_number: "1002".to_string(), content: String::new() }
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_describe_never_contains_password() {
        let credentials = Credentials::new("pbx.example.com", 5060, "alice", "secret", "1001");
        let description = Command::Register(credentials).describe();
        assert_eq!(description, "sip_register alice@pbx.example.com:5060");
    }

    #[test]
    fn test_decode_status_update_ignores_extra_gateway_fields() {
        let raw = r#"{"type":"status_update","payload":{
            "websocket_connected":true,"sip_connected":true,"sip_registered":true,
            "active_call":false,"has_incoming":true,"caller_number":"1003",
            "connected_clients":2,"timestamp":12.5}}"#;
        let event = decode(raw).unwrap();
        assert_eq!(
            event,
            ServerEvent::StatusUpdate(StatusSnapshot {
                registered: true,
                active_call: false,
                has_incoming: true,
                caller_number: "1003".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_status_update_requires_flags() {
        let raw = r#"{"type":"status_update","payload":{"sip_registered":true}}"#;
        assert!(matches!(decode(raw), Err(BridgeError::MalformedMessage { .. })));
    }

    #[test]
    fn test_decode_missing_payload_is_empty_object() {
        assert_eq!(decode(r#"{"type":"call_answered"}"#).unwrap(), ServerEvent::CallAnswered);
        assert_eq!(
            decode(r#"{"type":"sip_registered","payload":null}"#).unwrap(),
            ServerEvent::SipRegistered { message: None }
        );
    }

    #[test]
    fn test_decode_call_failed_and_errors() {
        assert_eq!(
            decode(r#"{"type":"call_failed","payload":{"message":"x","reason":"486 Busy"}}"#).unwrap(),
            ServerEvent::CallFailed { reason: "486 Busy".to_string() }
        );
        assert_eq!(
            decode(r#"{"type":"error","payload":{"message":"not registered"}}"#).unwrap(),
            ServerEvent::Error { message: "not registered".to_string() }
        );
        assert_eq!(
            decode(r#"{"type":"call_ended","payload":{"reason":""}}"#).unwrap(),
            ServerEvent::CallEnded { reason: None }
        );
    }

    #[test]
    fn test_decode_unknown_type_is_not_malformed() {
        let err = decode(r#"{"type":"call_transferred","payload":{}}"#).unwrap_err();
        assert_eq!(err, BridgeError::unknown_event("call_transferred"));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        for raw in ["", "not json", "[1,2,3]", r#"{"payload":{}}"#, r#"{"type":42}"#] {
            assert!(
                matches!(decode(raw), Err(BridgeError::MalformedMessage { .. })),
                "expected malformed for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_decode_wrong_payload_shape_is_malformed() {
        let raw = r#"{"type":"incoming_call","payload":"1003"}"#;
        assert!(matches!(decode(raw), Err(BridgeError::MalformedMessage { .. })));
    }

    #[test]
    fn test_every_decoded_event_type_is_listed() {
        let event = decode(r#"{"type":"pong","payload":{"timestamp":1}}"#).unwrap();
        assert!(EVENT_TYPES.contains(&event.event_type()));
    }
}
