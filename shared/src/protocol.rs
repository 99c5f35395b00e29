//! Message envelope and payload types exchanged between clients and the server.
//!
//! Every frame carries `{"type": ..., "data": ..., "timestamp": ...}`. The
//! enums below serialize only their payload (`data`); the `type` string comes
//! from [`WireMessage::kind`] and is matched back in [`WireMessage::from_parts`].

use crate::codec::CodecError;
use crate::{CarColor, ChatMessage, RaceState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message that can travel inside an [`Envelope`].
pub trait WireMessage: Serialize + Sized {
    /// Value of the envelope's `type` field.
    fn kind(&self) -> &'static str;

    /// Rebuilds a message from the envelope's `type` and `data` fields.
    fn from_parts(kind: &str, data: Value) -> Result<Self, CodecError>;
}

/// A message together with the time it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<M> {
    pub message: M,
    /// ISO-8601 local time of creation.
    pub timestamp: String,
}

impl<M> Envelope<M> {
    pub fn new(message: M) -> Self {
        Self {
            message,
            timestamp: timestamp_now(),
        }
    }
}

/// Current local time in ISO-8601 with microseconds.
pub fn timestamp_now() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct JoinRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default)]
    pub car_color: CarColor,
}

/// Key state for one control message plus the client's own collision report.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct ControlInput {
    #[serde(default)]
    pub up: bool,
    #[serde(default)]
    pub down: bool,
    #[serde(default)]
    pub left: bool,
    #[serde(default)]
    pub right: bool,
    #[serde(default)]
    pub collision: bool,
    #[serde(default)]
    pub finish_collision: bool,
    /// Vertical offset of the finish-line overlap; `0` means a side hit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_y: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatText {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct ReadyStatus {
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ClientMessage {
    Init(JoinRequest),
    Control(ControlInput),
    Chat(ChatText),
    Ready(ReadyStatus),
}

impl WireMessage for ClientMessage {
    fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Init(_) => "init",
            ClientMessage::Control(_) => "control",
            ClientMessage::Chat(_) => "chat",
            ClientMessage::Ready(_) => "ready",
        }
    }

    fn from_parts(kind: &str, data: Value) -> Result<Self, CodecError> {
        Ok(match kind {
            "init" => ClientMessage::Init(serde_json::from_value(data)?),
            "control" => ClientMessage::Control(serde_json::from_value(data)?),
            "chat" => ClientMessage::Chat(serde_json::from_value(data)?),
            "ready" => ClientMessage::Ready(serde_json::from_value(data)?),
            other => return Err(CodecError::UnknownType(other.to_string())),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Welcome {
    pub player_id: u32,
    pub game_state: RaceState,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorNotice {
    pub message: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServerMessage {
    InitConfirm(Welcome),
    /// Sent right before the server closes the connection.
    Error(ErrorNotice),
    State(RaceState),
    Chat(ChatMessage),
}

impl WireMessage for ServerMessage {
    fn kind(&self) -> &'static str {
        match self {
            ServerMessage::InitConfirm(_) => "init_confirm",
            ServerMessage::Error(_) => "error",
            ServerMessage::State(_) => "state",
            ServerMessage::Chat(_) => "chat",
        }
    }

    fn from_parts(kind: &str, data: Value) -> Result<Self, CodecError> {
        Ok(match kind {
            "init_confirm" => ServerMessage::InitConfirm(serde_json::from_value(data)?),
            "error" => ServerMessage::Error(serde_json::from_value(data)?),
            "state" => ServerMessage::State(serde_json::from_value(data)?),
            "chat" => ServerMessage::Chat(serde_json::from_value(data)?),
            other => return Err(CodecError::UnknownType(other.to_string())),
        })
    }
}
