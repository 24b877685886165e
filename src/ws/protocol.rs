//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use serde::{Deserialize, Serialize};

use crate::game::actions::Action;
use crate::game::physics::{normalize_heading, Direction};

/// Largest accepted |degrees| for a TURN
pub const MAX_TURN_DEGREES: i64 = 360;

/// Role requested in the `clientType` query parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    Player,
    Spectator,
}

impl std::str::FromStr for ClientType {
    type Err = ProtocolError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "PLAYER" => Ok(ClientType::Player),
            "SPECTATOR" => Ok(ClientType::Spectator),
            other => Err(ProtocolError::UnknownClientType(other.to_string())),
        }
    }
}

/// Entity tag carried by every snapshot entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Player,
    Projectile,
}

/// Wire-level decoding failures; the frame is dropped, the connection stays
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("tick '{0}' is not a non-negative integer")]
    BadTick(String),

    #[error("TURN requires 'degrees'")]
    MissingDegrees,

    #[error("degrees {0} out of range")]
    DegreesOutOfRange(i64),

    #[error("'{0}' is not a valid client type")]
    UnknownClientType(String),
}

// ============================================================================
// Client -> server
// ============================================================================

/// Action names accepted in the `action` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActionKind {
    Up,
    Down,
    Left,
    Right,
    Shoot,
    Turn,
}

/// Clients echo the snapshot tick, which is a string on the wire
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTick {
    Number(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawActionMessage {
    tick: WireTick,
    action: ActionKind,
    #[serde(default)]
    degrees: Option<i64>,
}

/// A decoded, validated action bound to a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionMessage {
    pub tick: u64,
    pub action: Action,
}

impl TryFrom<RawActionMessage> for ActionMessage {
    type Error = ProtocolError;

    fn try_from(raw: RawActionMessage) -> Result<Self, Self::Error> {
        let tick = match raw.tick {
            WireTick::Number(n) => n,
            WireTick::Text(text) => text
                .trim()
                .parse::<u64>()
                .map_err(|_| ProtocolError::BadTick(text))?,
        };

        let action = match raw.action {
            ActionKind::Up => Action::Move(Direction::Up),
            ActionKind::Down => Action::Move(Direction::Down),
            ActionKind::Left => Action::Move(Direction::Left),
            ActionKind::Right => Action::Move(Direction::Right),
            ActionKind::Shoot => Action::Shoot,
            ActionKind::Turn => {
                let degrees = raw.degrees.ok_or(ProtocolError::MissingDegrees)?;
                if !(-MAX_TURN_DEGREES..=MAX_TURN_DEGREES).contains(&degrees) {
                    return Err(ProtocolError::DegreesOutOfRange(degrees));
                }
                Action::Turn {
                    degrees: normalize_heading(degrees),
                }
            }
        };

        Ok(Self { tick, action })
    }
}

/// Decode one inbound text frame
pub fn decode_action(text: &str) -> Result<ActionMessage, ProtocolError> {
    let raw: RawActionMessage = serde_json::from_str(text)?;
    ActionMessage::try_from(raw)
}

// ============================================================================
// Server -> client
// ============================================================================

/// Sent once to a player right after admission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerHello {
    pub success: bool,
    pub player_id: String,
}

/// Authoritative world state, broadcast once per tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Tick number as a decimal string
    pub tick: String,
    pub tick_length_milli_seconds: u64,
    pub spectators: u32,
    pub players: Vec<PlayerSnapshot>,
    pub entities: Vec<ProjectileSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: String,
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub rotation: i32,
    pub color: String,
    pub health: i32,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectileSnapshot {
    pub id: String,
    pub previous_x: f64,
    pub previous_y: f64,
    pub x: f64,
    pub y: f64,
    pub direction: i32,
    pub travel_distance: f64,
    pub entity_type: EntityType,
}
