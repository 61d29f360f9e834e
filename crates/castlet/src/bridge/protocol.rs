//! Wire protocol types for owner-worker communication.
//!
//! One JSON object per line in each direction. Outgoing frames carry a
//! closed command set tagged with `cmd` plus a `requestId`; incoming frames
//! are loosely shaped (`requestId` is optional — a legacy worker may not
//! echo it) with result fields flattened alongside `success`.

use serde::{Deserialize, Serialize};

use crate::error::DaemonError;

/// Result fields of a successful response, minus the envelope keys.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Commands the owner can issue to the worker.
///
/// The worker's interpretation of each command is its own business; this
/// enum fixes the wire shape only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum WorkerCommand {
    SetVolume { target: String, level: f64 },
    GetVolume { target: String },
    Ping { target: String },
    Connect { target: String },
    Disconnect { target: String },
    Status,
    /// Graceful shutdown request; the worker acknowledges and exits.
    Quit,
}

impl WorkerCommand {
    /// Wire name of the command, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetVolume { .. } => "set_volume",
            Self::GetVolume { .. } => "get_volume",
            Self::Ping { .. } => "ping",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Status => "status",
            Self::Quit => "quit",
        }
    }
}

/// Outgoing frame: a command plus its correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    #[serde(flatten)]
    pub command: WorkerCommand,
    #[serde(rename = "requestId")]
    pub request_id: u64,
}

/// Incoming frame. `request_id` is absent when the worker does not echo
/// correlation ids (FIFO legacy mode); unrecognized fields land in
/// `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl ResponseFrame {
    /// Collapse the frame into the caller-visible result. A `success: false`
    /// frame becomes [`DaemonError::Command`] with the worker's message
    /// verbatim.
    pub fn into_result(self) -> Result<Payload, DaemonError> {
        if self.success {
            Ok(self.payload)
        } else {
            Err(DaemonError::Command(
                self.error.unwrap_or_else(|| "unspecified worker error".to_string()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_volume_wire_shape() {
        let frame = RequestFrame {
            command: WorkerCommand::SetVolume {
                target: "living-room".to_string(),
                level: 0.35,
            },
            request_id: 5,
        };
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"cmd": "set_volume", "target": "living-room", "level": 0.35, "requestId": 5})
        );
    }

    #[test]
    fn unit_commands_wire_shape() {
        let status = RequestFrame {
            command: WorkerCommand::Status,
            request_id: 1,
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"cmd": "status", "requestId": 1})
        );

        let quit = RequestFrame {
            command: WorkerCommand::Quit,
            request_id: 2,
        };
        assert_eq!(
            serde_json::to_value(&quit).unwrap(),
            json!({"cmd": "quit", "requestId": 2})
        );
    }

    #[test]
    fn request_frame_roundtrips() {
        let frame = RequestFrame {
            command: WorkerCommand::Ping {
                target: "kitchen".to_string(),
            },
            request_id: 42,
        };
        let json = serde_json::to_string(&frame).unwrap();
        let parsed: RequestFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.request_id, 42);
        assert_eq!(parsed.command, frame.command);
    }

    #[test]
    fn response_with_id_and_payload() {
        let frame: ResponseFrame =
            serde_json::from_str(r#"{"requestId":5,"success":true,"volume":0.5}"#).unwrap();
        assert_eq!(frame.request_id, Some(5));
        assert!(frame.success);
        assert_eq!(frame.payload.get("volume"), Some(&json!(0.5)));

        let payload = frame.into_result().unwrap();
        assert_eq!(payload.get("volume"), Some(&json!(0.5)));
    }

    #[test]
    fn response_without_id_parses() {
        let frame: ResponseFrame = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(frame.request_id, None);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn failed_response_becomes_command_error() {
        let frame: ResponseFrame =
            serde_json::from_str(r#"{"requestId":9,"success":false,"error":"no such speaker"}"#)
                .unwrap();
        match frame.into_result() {
            Err(DaemonError::Command(msg)) => assert_eq!(msg, "no such speaker"),
            other => panic!("expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn failed_response_without_message_gets_placeholder() {
        let frame: ResponseFrame = serde_json::from_str(r#"{"success":false}"#).unwrap();
        match frame.into_result() {
            Err(DaemonError::Command(msg)) => assert_eq!(msg, "unspecified worker error"),
            other => panic!("expected Command error, got {:?}", other),
        }
    }

    #[test]
    fn envelope_keys_stay_out_of_payload() {
        let frame: ResponseFrame = serde_json::from_str(
            r#"{"requestId":3,"success":true,"latencyMs":12.5,"target":"kitchen"}"#,
        )
        .unwrap();
        assert_eq!(frame.payload.len(), 2);
        assert!(!frame.payload.contains_key("requestId"));
        assert!(!frame.payload.contains_key("success"));
    }
}
