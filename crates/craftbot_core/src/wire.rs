//! Wire format spoken with the game server.
//!
//! Every frame is a JSON text message shaped as an envelope:
//!
//! ```json
//! { "type": "keep_alive", "data": { "id": 42 } }
//! ```
//!
//! Inbound frames are decoded into the closed [`InboundMessage`] enum. Two wire
//! generations exist for presence updates (`player_info` and the older
//! `player_list_item`); both decode into the same [`PresenceUpdate`] so nothing
//! past this module needs to know which one the server speaks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum chat line length accepted by the server, in characters.
pub const CHAT_LIMIT: usize = 256;

/// Errors decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Invalid frame: {0}")]
    InvalidFrame(#[from] serde_json::Error),

    #[error("Malformed '{tag}' payload: {reason}")]
    Payload { tag: String, reason: String },
}

/// Raw envelope as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub data: Value,
}

/// Frames the agent sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    Login {
        username: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Chat {
        message: String,
    },
    KeepAlive {
        id: u64,
    },
}

impl OutboundMessage {
    /// Serializes the message into its text frame.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Dispatch key for inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    LoginSuccess,
    LoginRejected,
    KeepAlive,
    Chat,
    Presence,
    Disconnect,
    Unknown,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::LoginSuccess => "login_success",
            MessageKind::LoginRejected => "login_failure",
            MessageKind::KeepAlive => "keep_alive",
            MessageKind::Chat => "chat",
            MessageKind::Presence => "presence",
            MessageKind::Disconnect => "disconnect",
            MessageKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Chat payload, kept undecoded so the chat engine can degrade gracefully.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatPayload {
    /// Structured chat component, serialized as JSON text
    pub json_data: Option<String>,
    /// Plain-text rendition, sent by older servers
    pub message: Option<String>,
    /// The whole `data` value, stringified
    pub raw: String,
}

impl ChatPayload {
    /// Payload carrying only a structured component.
    pub fn structured(json_data: impl Into<String>) -> Self {
        let json_data = json_data.into();
        Self {
            raw: json_data.clone(),
            json_data: Some(json_data),
            message: None,
        }
    }

    /// Payload carrying only a plain string.
    pub fn plain(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            raw: message.clone(),
            json_data: None,
            message: Some(message),
        }
    }
}

/// One presence change.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceAction {
    Add(Vec<String>),
    Remove(Vec<String>),
}

/// All presence changes carried by a single frame, in wire order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PresenceUpdate {
    pub actions: Vec<PresenceAction>,
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    LoginSuccess { username: Option<String> },
    LoginRejected { reason: String },
    KeepAlive { id: u64 },
    Chat(ChatPayload),
    Presence(PresenceUpdate),
    Disconnect { reason: String },
    Unknown { tag: String },
}

#[derive(Deserialize)]
struct LoginSuccessData {
    #[serde(default)]
    username: Option<String>,
}

#[derive(Deserialize)]
struct ReasonData {
    #[serde(default)]
    reason: Value,
}

#[derive(Deserialize)]
struct KeepAliveData {
    id: u64,
}

#[derive(Deserialize)]
struct PlayerEntry {
    name: String,
}

#[derive(Deserialize)]
struct PlayerInfoData {
    action: String,
    #[serde(default)]
    players: Vec<PlayerEntry>,
}

#[derive(Deserialize)]
struct PlayerListItemData {
    #[serde(default)]
    actions: Vec<String>,
    #[serde(default)]
    player_infos: Vec<PlayerEntry>,
}

impl InboundMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            InboundMessage::LoginSuccess { .. } => MessageKind::LoginSuccess,
            InboundMessage::LoginRejected { .. } => MessageKind::LoginRejected,
            InboundMessage::KeepAlive { .. } => MessageKind::KeepAlive,
            InboundMessage::Chat(_) => MessageKind::Chat,
            InboundMessage::Presence(_) => MessageKind::Presence,
            InboundMessage::Disconnect { .. } => MessageKind::Disconnect,
            InboundMessage::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// Decodes one text frame.
    pub fn decode(text: &str) -> Result<Self, WireError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: Envelope) -> Result<Self, WireError> {
        let Envelope { tag, data } = envelope;
        let message = match tag.as_str() {
            "login_success" => {
                let data: LoginSuccessData = payload(&tag, data)?;
                InboundMessage::LoginSuccess {
                    username: data.username,
                }
            }
            "login_failure" => {
                let data: ReasonData = payload(&tag, data)?;
                InboundMessage::LoginRejected {
                    reason: reason_text(data.reason),
                }
            }
            "keep_alive" => {
                let data: KeepAliveData = payload(&tag, data)?;
                InboundMessage::KeepAlive { id: data.id }
            }
            "chat" => InboundMessage::Chat(chat_payload(data)),
            "player_info" => {
                let data: PlayerInfoData = payload(&tag, data)?;
                let names = data.players.into_iter().map(|p| p.name).collect();
                let action = match data.action.to_ascii_lowercase().as_str() {
                    "add" | "add_player" => PresenceAction::Add(names),
                    "remove" | "remove_player" => PresenceAction::Remove(names),
                    other => {
                        return Err(WireError::Payload {
                            tag: tag.clone(),
                            reason: format!("unknown presence action '{other}'"),
                        })
                    }
                };
                InboundMessage::Presence(PresenceUpdate {
                    actions: vec![action],
                })
            }
            "player_list_item" => {
                let data: PlayerListItemData = payload(&tag, data)?;
                let names: Vec<String> = data.player_infos.into_iter().map(|p| p.name).collect();
                // Other legacy actions (game mode, latency, display name) carry no presence change.
                let actions = data
                    .actions
                    .iter()
                    .filter_map(|action| match action.as_str() {
                        "ADD_PLAYER" => Some(PresenceAction::Add(names.clone())),
                        "REMOVE_PLAYER" => Some(PresenceAction::Remove(names.clone())),
                        _ => None,
                    })
                    .collect();
                InboundMessage::Presence(PresenceUpdate { actions })
            }
            "disconnect" => {
                let data: ReasonData = payload(&tag, data)?;
                InboundMessage::Disconnect {
                    reason: reason_text(data.reason),
                }
            }
            _ => InboundMessage::Unknown { tag: tag.clone() },
        };
        Ok(message)
    }
}

/// Truncates a chat line to [`CHAT_LIMIT`] characters.
pub fn truncate_chat(text: &str) -> &str {
    match text.char_indices().nth(CHAT_LIMIT) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn payload<T: serde::de::DeserializeOwned>(tag: &str, data: Value) -> Result<T, WireError> {
    serde_json::from_value(data).map_err(|e| WireError::Payload {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

fn reason_text(reason: Value) -> String {
    match reason {
        Value::String(text) => text,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn chat_payload(data: Value) -> ChatPayload {
    let json_data = match data.get("json_data") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => Some(other.to_string()),
    };
    let message = data
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    let raw = match &data {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    ChatPayload {
        json_data,
        message,
        raw,
    }
}
