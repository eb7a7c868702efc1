//! JSON envelope protocol spoken over `/ws`.
//!
//! Every frame is `{"type": "<kind>", "payload": {...}}`. Server events are a
//! closed enum with one payload shape per kind. Client frames are parsed
//! discriminant-first so that kinds this server does not know are skipped
//! instead of failing the connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Unix timestamp in seconds, the resolution every payload uses.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

// --- Server -> client ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected(Connected),
    NewMessage(NewMessage),
    ChatCreated(ChatCreated),
    MessageRead(MessageRead),
    TypingStart(Typing),
    TypingEnd(Typing),
    Subscribed(Subscribed),
    ChatSubscribed(ChatSubscribed),
    Pong(Pong),
}

impl ServerEvent {
    /// Wire discriminant, used for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::NewMessage(_) => "new_message",
            Self::ChatCreated(_) => "chat_created",
            Self::MessageRead(_) => "message_read",
            Self::TypingStart(_) => "typing_start",
            Self::TypingEnd(_) => "typing_end",
            Self::Subscribed(_) => "subscribed",
            Self::ChatSubscribed(_) => "chat_subscribed",
            Self::Pong(_) => "pong",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Welcome frame sent once, right after registration.
    pub fn connected(user_id: &str) -> Self {
        Self::Connected(Connected {
            user_id: user_id.to_string(),
            message: "WebSocket connected successfully".to_string(),
            time: unix_now(),
        })
    }

    pub fn pong() -> Self {
        Self::Pong(Pong { time: unix_now() })
    }

    pub fn subscribed(channel: &str, user_id: &str) -> Self {
        Self::Subscribed(Subscribed {
            channel: channel.to_string(),
            user_id: user_id.to_string(),
            time: unix_now(),
        })
    }

    pub fn chat_subscribed(chat_id: &str, user_id: &str) -> Self {
        Self::ChatSubscribed(ChatSubscribed {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub user_id: String,
    pub message: String,
    pub time: i64,
}

/// Public profile fragment embedded in `new_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    pub avatar: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub sender: Sender,
    pub content: String,
    /// text, image or voice
    #[serde(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCreated {
    pub id: String,
    pub last_message_at: i64,
    pub partner: Partner,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRead {
    pub chat_id: String,
    pub user_id: String,
    pub message_ids: Vec<String>,
    pub timestamp: i64,
}

/// Payload shared by `typing_start` and `typing_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub chat_id: String,
    pub user_id: String,
    pub timestamp: i64,
}

impl Typing {
    pub fn now(chat_id: &str, user_id: &str) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: unix_now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscribed {
    pub channel: String,
    pub user_id: String,
    pub time: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSubscribed {
    pub chat_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pong {
    pub time: i64,
}

// --- Client -> server ---

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Subscribe { channel: String },
    SubscribeChat { chat_id: String },
    TypingStart { chat_id: String },
    TypingEnd { chat_id: String },
    MessageRead { chat_id: String, message_ids: Vec<String> },
    Ping,
    /// A kind this server does not handle. Ignored by the reader.
    Unknown(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("{kind} frame is missing `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

/// Outer shape of every client frame. `channel` sits beside `type` for
/// `subscribe`; every other kind nests its fields under `payload`.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    /// Only meaningful for `subscribe`; typed once the kind is known.
    #[serde(default)]
    channel: Option<Value>,
    #[serde(default)]
    payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRef {
    chat_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadReceipt {
    chat_id: String,
    #[serde(default)]
    message_ids: Vec<String>,
}

/// Decode one inbound text frame.
pub fn decode_client_frame(text: &str) -> Result<ClientEvent, ProtocolError> {
    let raw: RawFrame = serde_json::from_str(text)?;

    let event = match raw.kind.as_str() {
        "subscribe" => {
            let channel = raw.channel.ok_or(ProtocolError::MissingField {
                kind: "subscribe",
                field: "channel",
            })?;
            ClientEvent::Subscribe {
                channel: serde_json::from_value(channel)?,
            }
        }
        "subscribe_chat" => ClientEvent::SubscribeChat {
            chat_id: chat_ref("subscribe_chat", raw.payload)?.chat_id,
        },
        "typing_start" => ClientEvent::TypingStart {
            chat_id: chat_ref("typing_start", raw.payload)?.chat_id,
        },
        "typing_end" => ClientEvent::TypingEnd {
            chat_id: chat_ref("typing_end", raw.payload)?.chat_id,
        },
        "message_read" => {
            let payload = raw.payload.ok_or(ProtocolError::MissingField {
                kind: "message_read",
                field: "payload",
            })?;
            let receipt: ReadReceipt = serde_json::from_value(payload)?;
            ClientEvent::MessageRead {
                chat_id: receipt.chat_id,
                message_ids: receipt.message_ids,
            }
        }
        "ping" => ClientEvent::Ping,
        _ => ClientEvent::Unknown(raw.kind),
    };

    Ok(event)
}

fn chat_ref(kind: &'static str, payload: Option<Value>) -> Result<ChatRef, ProtocolError> {
    let payload = payload.ok_or(ProtocolError::MissingField {
        kind,
        field: "payload",
    })?;
    Ok(serde_json::from_value(payload)?)
}
