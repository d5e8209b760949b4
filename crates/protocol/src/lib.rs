//! Wire types shared by the gateway and its clients.
//!
//! Everything here is plain data: the phase names reported over HTTP, the
//! status events fanned out to WebSocket subscribers, and the request and
//! response bodies of the HTTP surface.

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Service name reported by `/status` and `/health`.
pub const SERVICE_NAME: &str = "whatsapp_business_api";

/// Interval between WebSocket pings sent to status subscribers.
pub const PING_INTERVAL_MS: u64 = 30_000;

/// Default bounded outbox size per status subscriber.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 64;

// ── Session phase ────────────────────────────────────────────────────────────

/// Observable phase of the single messaging session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Disconnected,
    Pairing,
    Connected,
    Errored,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
            Self::Errored => "errored",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status events ────────────────────────────────────────────────────────────

/// Immutable description of a session state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_artifact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A status event as delivered to one subscriber.
///
/// `seq` is assigned by the hub at publish time. The first frame a subscriber
/// receives is a snapshot of the latest publish and repeats its `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "status")]
pub struct StatusFrame {
    pub seq: u64,
    #[serde(default)]
    pub snapshot: bool,
    #[serde(flatten)]
    pub event: StatusEvent,
}

// ── HTTP bodies ──────────────────────────────────────────────────────────────

/// Body of `POST /send`. Missing fields decode as empty strings so that they
/// are rejected by validation rather than by the decoder.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SendBody {
    pub to: String,
    pub message: String,
}

/// `data` member of a successful `POST /send` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentData {
    pub to: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

/// Response body shared by the command endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T = serde_json::Value> {
    pub status: ApiStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
    Success,
    Error,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: ApiStatus::Success,
            message: message.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ApiStatus::Error,
            message: message.into(),
            data: None,
        }
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub connected: bool,
    pub status: Phase,
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub backend: String,
    pub configured: bool,
    pub has_token: bool,
    pub has_phone_id: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `GET|POST /connect`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReport {
    pub status: ApiStatus,
    pub connected: bool,
    pub phase: Phase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(phase: Phase) -> StatusEvent {
        StatusEvent {
            phase,
            pairing_artifact: None,
            error_detail: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn frame_is_tagged_and_flattened() {
        let mut ev = event(Phase::Pairing);
        ev.pairing_artifact = Some("ABCD-1234".into());
        let frame = StatusFrame {
            seq: 7,
            snapshot: true,
            event: ev,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["snapshot"], true);
        assert_eq!(json["phase"], "pairing");
        assert_eq!(json["pairing_artifact"], "ABCD-1234");
        assert!(json.get("error_detail").is_none());
    }

    #[test]
    fn frame_parses_back() {
        let frame = StatusFrame {
            seq: 1,
            snapshot: false,
            event: event(Phase::Connected),
        };
        let raw = serde_json::to_string(&frame).unwrap();
        let parsed: StatusFrame = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn send_body_missing_fields_default_to_empty() {
        let body: SendBody = serde_json::from_str(r#"{"to":"155"}"#).unwrap();
        assert_eq!(body.to, "155");
        assert!(body.message.is_empty());
    }

    #[test]
    fn error_response_omits_data() {
        let resp = ApiResponse::<SentData>::error("WhatsApp is not connected");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "WhatsApp is not connected");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn send_reply_decodes_with_and_without_data() {
        let ok: ApiResponse<SentData> = serde_json::from_str(
            r#"{"status":"success","message":"Message sent successfully",
                "data":{"to":"15551234567","message":"hi",
                        "timestamp":"2026-01-01T00:00:00Z","message_id":"sim-1"}}"#,
        )
        .unwrap();
        assert_eq!(ok.status, ApiStatus::Success);
        let data = ok.data.unwrap();
        assert_eq!(data.to, "15551234567");
        assert_eq!(data.message_id.as_deref(), Some("sim-1"));

        let err: ApiResponse<SentData> =
            serde_json::from_str(r#"{"status":"error","message":"WhatsApp is not connected"}"#)
                .unwrap();
        assert_eq!(err.status, ApiStatus::Error);
        assert!(err.data.is_none());
    }

    #[test]
    fn phase_names() {
        assert_eq!(Phase::Disconnected.to_string(), "disconnected");
        assert_eq!(serde_json::to_value(Phase::Errored).unwrap(), "errored");
        assert!(Phase::Connected.is_connected());
        assert!(!Phase::Pairing.is_connected());
    }
}
