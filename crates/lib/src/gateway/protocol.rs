//! Gateway WebSocket protocol types (join, peer_joined, existing_peers, peer_left).
//!
//! Every frame is one JSON text message: `{ "type": "event", "event", "payload" }`.

use crate::registry::{PeerId, PeerInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope `type` of every frame.
pub const EVENT_TYPE: &str = "event";

/// Wire frame: `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub typ: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: EVENT_TYPE.to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Payload of an inbound `join`. Both fields may be missing; the registry decides what that means.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinParams {
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Events a peer sends to the server.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Join(JoinParams),
}

/// Why an inbound frame was not turned into a [`ClientEvent`].
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected frame type {0:?}")]
    NotAnEvent(String),

    #[error("unknown event {0:?}")]
    UnknownEvent(String),

    #[error("invalid {event} payload: {source}")]
    InvalidPayload {
        event: &'static str,
        source: serde_json::Error,
    },
}

impl ClientEvent {
    /// Decode one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let frame: EventFrame = serde_json::from_str(text)?;
        if frame.typ != EVENT_TYPE {
            return Err(FrameError::NotAnEvent(frame.typ));
        }
        match frame.event.as_str() {
            "join" => {
                let payload = if frame.payload.is_null() {
                    serde_json::Value::Object(Default::default())
                } else {
                    frame.payload
                };
                let params = serde_json::from_value(payload).map_err(|source| {
                    FrameError::InvalidPayload {
                        event: "join",
                        source,
                    }
                })?;
                Ok(ClientEvent::Join(params))
            }
            _ => Err(FrameError::UnknownEvent(frame.event)),
        }
    }
}

/// Events the server sends to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Broadcast to a room when a peer joins it (never to the joiner).
    PeerJoined(PeerInfo),
    /// Sent to the joiner only: the other members of its room.
    ExistingPeers(Vec<PeerInfo>),
    /// Broadcast to the remaining members of a room.
    PeerLeft { peer_id: PeerId },
    /// Sent to every connection when the server begins shutting down.
    Shutdown,
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::PeerJoined(_) => "peer_joined",
            ServerEvent::ExistingPeers(_) => "existing_peers",
            ServerEvent::PeerLeft { .. } => "peer_left",
            ServerEvent::Shutdown => "shutdown",
        }
    }

    pub fn to_frame(&self) -> EventFrame {
        let payload = match self {
            ServerEvent::PeerJoined(info) => serde_json::json!(info),
            ServerEvent::ExistingPeers(peers) => serde_json::json!(peers),
            ServerEvent::PeerLeft { peer_id } => serde_json::json!({ "peer_id": peer_id }),
            ServerEvent::Shutdown => serde_json::json!({}),
        };
        EventFrame::new(self.name(), payload)
    }

    /// Serialized frame, ready to put on the wire.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_frame()).unwrap_or_else(|_| {
            format!(r#"{{"type":"event","event":"{}","payload":{{}}}}"#, self.name())
        })
    }
}
