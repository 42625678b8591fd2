//! JSON wire protocol for the presence relay.
//!
//! Frames are UTF-8 JSON text objects discriminated by a `type` field:
//! ```text
//! client → relay   {"type":"waypoint","x":12.5,"y":40}
//! relay → joiner   {"type":"init","aliens":[{"id":"…","country":"DE"}]}
//! relay → others   {"type":"new_alien","id":"…","country":"DE"}
//! relay → others   {"type":"waypoint","alienId":"…","x":12.5,"y":40}
//! relay → others   {"type":"remove","alienId":"…"}
//! ```
//!
//! The alternate "tank" room speaks the same four messages with fish names
//! (`fish`, `new_fish`, `fish_move`, `fishId`). Which names a room uses is a
//! [`RoomVocabulary`] fixed when the room is built.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Number;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::region::RegionTag;

/// An encoded text frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Inbound payload is not JSON, lacks `type`, or lacks a required field.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    /// Outbound message could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Transport-assigned connection identity. Opaque, trusted implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// A fresh random id, unique within this process.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One joined connection and its region. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub id: ConnectionId,
    pub country: RegionTag,
}

impl PresenceRecord {
    pub fn new(id: ConnectionId, country: RegionTag) -> Self {
        Self { id, country }
    }
}

/// Per-room names for the four message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomVocabulary {
    /// Array key of the `init` snapshot.
    pub snapshot_key: &'static str,
    /// `type` of the join notice.
    pub join_event: &'static str,
    /// `type` of positional messages, inbound and relayed.
    pub move_event: &'static str,
    /// Key carrying the originating connection id in relay and leave frames.
    pub id_key: &'static str,
}

impl RoomVocabulary {
    /// Homepage solar system.
    pub const ALIENS: RoomVocabulary = RoomVocabulary {
        snapshot_key: "aliens",
        join_event: "new_alien",
        move_event: "waypoint",
        id_key: "alienId",
    };

    /// Fish tank playground.
    pub const FISH: RoomVocabulary = RoomVocabulary {
        snapshot_key: "fish",
        join_event: "new_fish",
        move_event: "fish_move",
        id_key: "fishId",
    };

    /// Pick the vocabulary for a room id. Resolved once per room.
    pub fn for_room(room_id: &str, fish_rooms: &[String]) -> Self {
        if fish_rooms.iter().any(|r| r == room_id) {
            Self::FISH
        } else {
            Self::ALIENS
        }
    }
}

impl Default for RoomVocabulary {
    fn default() -> Self {
        Self::ALIENS
    }
}

/// Percentage coordinates.
///
/// Integers and plain decimals are relayed unchanged. Other spellings are
/// normalised: `1e2` goes out as `100.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: Number,
    pub y: Number,
}

impl Position {
    pub fn new(x: impl Into<Number>, y: impl Into<Number>) -> Self {
        Self { x: x.into(), y: y.into() }
    }
}

/// Inbound client message.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Waypoint(Position),
    FishMove(Position),
    /// Any other `type`. Ignored by the relay.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }

    /// The wire `type` and coordinates of a positional message.
    pub fn movement(&self) -> Option<(&'static str, &Position)> {
        match self {
            ClientMessage::Waypoint(pos) => Some((RoomVocabulary::ALIENS.move_event, pos)),
            ClientMessage::FishMove(pos) => Some((RoomVocabulary::FISH.move_event, pos)),
            ClientMessage::Unknown => None,
        }
    }
}

/// Outbound relay message, encoded against a room's vocabulary.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Private snapshot for a joining connection.
    Init { participants: Vec<PresenceRecord> },
    /// Someone else joined.
    Joined(PresenceRecord),
    /// Relayed positional intent.
    Moved { id: ConnectionId, position: Position },
    /// Someone left.
    Removed { id: ConnectionId },
}

impl ServerMessage {
    pub fn encode(&self, vocabulary: &RoomVocabulary) -> Result<Frame, ProtocolError> {
        let json = serde_json::to_string(&Encoded { message: self, vocabulary })?;
        Ok(Frame::from(json))
    }
}

/// Serializes a message with `type` first and room-specific key names.
struct Encoded<'a> {
    message: &'a ServerMessage,
    vocabulary: &'a RoomVocabulary,
}

impl Serialize for Encoded<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let vocab = self.vocabulary;
        match self.message {
            ServerMessage::Init { participants } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "init")?;
                map.serialize_entry(vocab.snapshot_key, participants)?;
                map.end()
            }
            ServerMessage::Joined(record) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("type", vocab.join_event)?;
                map.serialize_entry("id", &record.id)?;
                map.serialize_entry("country", &record.country)?;
                map.end()
            }
            ServerMessage::Moved { id, position } => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("type", vocab.move_event)?;
                map.serialize_entry(vocab.id_key, id)?;
                map.serialize_entry("x", &position.x)?;
                map.serialize_entry("y", &position.y)?;
                map.end()
            }
            ServerMessage::Removed { id } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("type", "remove")?;
                map.serialize_entry(vocab.id_key, id)?;
                map.end()
            }
        }
    }
}
