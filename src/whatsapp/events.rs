//! Realtime events pushed by the backend

use serde::Deserialize;
use serde_json::Value;

/// Timestamps above this are milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Events received on a number's room
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// Pairing QR for a number (`qr-code`)
    QrIssued { number_id: String, qr: String },
    /// Session paired and usable (`whatsapp-ready`)
    Ready { number_id: String },
    /// Session lost or pairing failed (`whatsapp-disconnected`)
    Disconnected {
        number_id: String,
        reason: Option<String>,
    },
    /// Backend dropped every session (`numbers-updated`)
    NumbersInvalidated,
    /// Inbound message (`chat-history`)
    ChatHistory(ChatHistoryUpdate),
    /// Unsynced senders changed server-side (`unsynced-contacts-updated`)
    UnsyncedUpdated { number_id: Option<String> },
    /// Synced contacts/groups changed server-side (`synced-contacts-updated`)
    SyncedUpdated,
}

/// Payload of a `chat-history` event
#[derive(Debug, Clone, PartialEq)]
pub struct ChatHistoryUpdate {
    /// Chat the message belongs to
    pub to: String,
    /// Unix seconds
    pub last_message_timestamp: i64,
    pub preview: Option<String>,
}

/// Connection lifecycle input
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionEvent {
    pub number_id: String,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEventKind {
    QrIssued(String),
    Ready,
    Failure(Option<String>),
}

impl RealtimeEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            Self::QrIssued { .. } => "qr-code",
            Self::Ready { .. } => "whatsapp-ready",
            Self::Disconnected { .. } => "whatsapp-disconnected",
            Self::NumbersInvalidated => "numbers-updated",
            Self::ChatHistory(_) => "chat-history",
            Self::UnsyncedUpdated { .. } => "unsynced-contacts-updated",
            Self::SyncedUpdated => "synced-contacts-updated",
        }
    }

    /// Lifecycle view of the event, if it is one
    pub fn connection_event(&self) -> Option<ConnectionEvent> {
        let (number_id, kind) = match self {
            Self::QrIssued { number_id, qr } => {
                (number_id, ConnectionEventKind::QrIssued(qr.clone()))
            }
            Self::Ready { number_id } => (number_id, ConnectionEventKind::Ready),
            Self::Disconnected { number_id, reason } => {
                (number_id, ConnectionEventKind::Failure(reason.clone()))
            }
            _ => return None,
        };
        Some(ConnectionEvent {
            number_id: number_id.clone(),
            kind,
        })
    }

    /// Decode a `{ "event": ..., "data": ... }` text frame.
    ///
    /// Returns `Ok(None)` for event names this client doesn't consume.
    pub fn from_frame(text: &str) -> Result<Option<Self>, serde_json::Error> {
        let frame: Frame = serde_json::from_str(text)?;
        Self::from_parts(&frame.event, frame.data)
    }

    pub fn from_parts(event: &str, data: Value) -> Result<Option<Self>, serde_json::Error> {
        let event = match event {
            "qr-code" => {
                let payload: QrPayload = serde_json::from_value(data)?;
                Self::QrIssued {
                    number_id: payload.number_id,
                    qr: payload.qr,
                }
            }
            "whatsapp-ready" => {
                let payload: NumberPayload = serde_json::from_value(data)?;
                Self::Ready {
                    number_id: payload.number_id,
                }
            }
            "whatsapp-disconnected" => {
                let payload: DisconnectedPayload = serde_json::from_value(data)?;
                Self::Disconnected {
                    number_id: payload.number_id,
                    reason: payload.reason,
                }
            }
            "numbers-updated" => Self::NumbersInvalidated,
            "chat-history" => {
                let payload: ChatHistoryPayload = serde_json::from_value(data)?;
                Self::ChatHistory(payload.into())
            }
            "unsynced-contacts-updated" => {
                let payload: UnsyncedPayload = if data.is_null() {
                    UnsyncedPayload::default()
                } else {
                    serde_json::from_value(data)?
                };
                Self::UnsyncedUpdated {
                    number_id: payload.number_id,
                }
            }
            "synced-contacts-updated" => Self::SyncedUpdated,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrPayload {
    number_id: String,
    qr: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NumberPayload {
    number_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectedPayload {
    number_id: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct UnsyncedPayload {
    #[serde(default, rename = "numberid", alias = "numberId")]
    number_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatHistoryPayload {
    to: String,
    #[serde(default)]
    last_message_timestamp: Option<i64>,
    #[serde(default)]
    chat_history: Vec<Value>,
}

impl From<ChatHistoryPayload> for ChatHistoryUpdate {
    fn from(payload: ChatHistoryPayload) -> Self {
        let preview = payload.chat_history.iter().rev().find_map(message_text);
        let timestamp = payload
            .last_message_timestamp
            .or_else(|| payload.chat_history.iter().rev().find_map(message_timestamp))
            .unwrap_or(0);

        Self {
            to: payload.to,
            last_message_timestamp: to_unix_seconds(timestamp),
            preview,
        }
    }
}

fn message_text(message: &Value) -> Option<String> {
    ["body", "message", "text", "content"]
        .iter()
        .find_map(|key| message.get(key).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn message_timestamp(message: &Value) -> Option<i64> {
    message.get("timestamp").and_then(Value::as_i64)
}

/// Normalize a seconds-or-milliseconds timestamp to seconds
pub fn to_unix_seconds(timestamp: i64) -> i64 {
    if timestamp > MILLIS_THRESHOLD {
        timestamp / 1000
    } else {
        timestamp
    }
}
