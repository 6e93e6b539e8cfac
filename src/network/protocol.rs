//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Messages are JSON objects tagged by `type`; the per-tick snapshot also has
//! a compact bincode frame for clients that ask for binary.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::game::events::{
    DestroyReason, GameEventData, LeaveReason, PickupSnapshot, PlayerSnapshot, ProjectileDelta,
    ProjectileInfo, WorldSnapshot,
};
use crate::game::input::{MoveCommand, ShootCommand};
use crate::game::pickup::PickupId;
use crate::game::projectile::ProjectileId;
use crate::game::state::PlayerId;

/// Payload decoding failures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Not a known JSON message.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame did not decode.
    #[error("malformed binary frame: {0}")]
    Binary(#[from] bincode::Error),

    /// Frame type the server does not read.
    #[error("unsupported frame")]
    UnsupportedFrame,
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Enter a world.
    #[serde(rename_all = "camelCase")]
    Join {
        /// Display name
        name: String,
        /// Receive `gameState` as binary frames
        #[serde(default)]
        binary_snapshots: bool,
    },

    /// Claimed movement.
    Move(MoveCommand),

    /// Fire a weapon.
    ShootProjectile(ShootCommand),

    /// Pick up a health pack.
    #[serde(rename_all = "camelCase")]
    CollectPickup {
        /// Pickup to consume
        pickup_id: PickupId,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client clock, echoed back
        timestamp: u64,
    },

    /// Player is leaving.
    Leave,
}

impl ClientMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parse a binary frame. Clients only ever send text.
    pub fn from_binary(_bytes: &[u8]) -> Result<Self, ProtocolError> {
        Err(ProtocolError::UnsupportedFrame)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Join accepted.
    #[serde(rename_all = "camelCase")]
    Welcome {
        /// Id assigned to the joiner
        player_id: PlayerId,
        /// World joined
        world_id: Uuid,
        /// Simulation rate in Hz
        tick_rate: u32,
        /// Spawn position
        position: Vec3,
    },

    /// Another player joined.
    #[serde(rename_all = "camelCase")]
    PlayerJoined {
        /// New player
        player_id: PlayerId,
        /// Display name
        name: String,
        /// Spawn position
        position: Vec3,
    },

    /// A player was removed.
    #[serde(rename_all = "camelCase")]
    PlayerLeft {
        /// Departed player
        player_id: PlayerId,
        /// Disconnect or eviction
        reason: LeaveReason,
    },

    /// World state (every tick).
    GameState(WorldSnapshot),

    /// Authoritative position the client must adopt.
    #[serde(rename_all = "camelCase")]
    PositionCorrection {
        /// Server position
        position: Vec3,
        /// Server rotation
        rotation: Quat,
        /// Last move the server processed
        input_sequence_id: u32,
    },

    /// A shot was accepted.
    ProjectileCreated(ProjectileInfo),

    /// A projectile was removed.
    #[serde(rename_all = "camelCase")]
    ProjectileDestroyed {
        /// Removed projectile
        id: ProjectileId,
        /// Final position
        position: Vec3,
        /// Hit, expiry or owner gone
        reason: DestroyReason,
        /// Player struck, if any
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hit_player_id: Option<PlayerId>,
        /// Damage dealt to that player
        #[serde(default, skip_serializing_if = "Option::is_none")]
        damage: Option<i32>,
    },

    /// Damage applied.
    #[serde(rename_all = "camelCase")]
    PlayerHit {
        /// Victim
        hit_player_id: PlayerId,
        /// Shooter
        source_player_id: PlayerId,
        /// Damage after falloff
        damage: i32,
        /// Victim health afterwards
        current_health: i32,
        /// Whether the hit was lethal
        was_killed: bool,
    },

    /// A player died.
    #[serde(rename_all = "camelCase")]
    PlayerKilled {
        /// Victim
        player_id: PlayerId,
        /// Shooter credited with the kill
        killer_player_id: PlayerId,
        /// Where the victim died
        position: Vec3,
        /// Wall-clock milliseconds
        timestamp: u64,
    },

    /// A dead player came back.
    #[serde(rename_all = "camelCase")]
    PlayerRespawned {
        /// Respawned player
        player_id: PlayerId,
        /// New spawn position
        position: Vec3,
    },

    /// A health pack was consumed.
    #[serde(rename_all = "camelCase")]
    PickupCollected {
        /// Consumed pickup
        pickup_id: PickupId,
        /// Collector
        player_id: PlayerId,
        /// Health actually restored
        healed: i32,
        /// Collector health afterwards
        current_health: i32,
    },

    /// A health pack is available again.
    #[serde(rename_all = "camelCase")]
    PickupRespawned {
        /// Restored pickup
        pickup_id: PickupId,
    },

    /// A shot was refused.
    #[serde(rename_all = "camelCase")]
    ShootError {
        /// Slot that was fired
        weapon_id: String,
        /// Machine-readable reason
        code: String,
        /// Human-readable reason
        message: String,
    },

    /// Pong response.
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Client clock from the ping
        timestamp: u64,
        /// Server clock when answered
        server_time: u64,
    },

    /// Request refused (join only).
    Error {
        /// Machine-readable reason
        code: String,
        /// Human-readable reason
        message: String,
    },

    /// Server is shutting down.
    Shutdown {
        /// Why
        reason: String,
    },
}

/// An encoded outbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    /// JSON text
    Text(String),
    /// bincode snapshot
    Binary(Vec<u8>),
}

impl ServerMessage {
    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Encode for a connection.
    ///
    /// With `binary_snapshots` set, `gameState` goes out as a bincode frame;
    /// everything else is always JSON.
    pub fn encode(&self, binary_snapshots: bool) -> Result<OutboundFrame, ProtocolError> {
        match self {
            ServerMessage::GameState(snapshot) if binary_snapshots => {
                Ok(OutboundFrame::Binary(encode_snapshot(snapshot)?))
            }
            _ => Ok(OutboundFrame::Text(self.to_json()?)),
        }
    }
}

impl From<GameEventData> for ServerMessage {
    fn from(data: GameEventData) -> Self {
        match data {
            GameEventData::PlayerJoined {
                player_id,
                name,
                position,
            } => ServerMessage::PlayerJoined {
                player_id,
                name,
                position,
            },
            GameEventData::PlayerLeft { player_id, reason } => ServerMessage::PlayerLeft { player_id, reason },
            GameEventData::PositionCorrection {
                position,
                rotation,
                input_sequence_id,
                ..
            } => ServerMessage::PositionCorrection {
                position,
                rotation,
                input_sequence_id,
            },
            GameEventData::ProjectileCreated { projectile } => ServerMessage::ProjectileCreated(projectile),
            GameEventData::ShotRejected {
                weapon_id,
                code,
                message,
                ..
            } => ServerMessage::ShootError {
                weapon_id,
                code,
                message,
            },
            GameEventData::ProjectileDestroyed {
                projectile_id,
                position,
                reason,
                hit_player_id,
                damage,
            } => ServerMessage::ProjectileDestroyed {
                id: projectile_id,
                position,
                reason,
                hit_player_id,
                damage,
            },
            GameEventData::PlayerHit {
                hit_player_id,
                source_player_id,
                damage,
                current_health,
                was_killed,
            } => ServerMessage::PlayerHit {
                hit_player_id,
                source_player_id,
                damage,
                current_health,
                was_killed,
            },
            GameEventData::PlayerKilled {
                player_id,
                killer_player_id,
                position,
                timestamp,
            } => ServerMessage::PlayerKilled {
                player_id,
                killer_player_id,
                position,
                timestamp,
            },
            GameEventData::PlayerRespawned { player_id, position } => {
                ServerMessage::PlayerRespawned { player_id, position }
            }
            GameEventData::PickupCollected {
                pickup_id,
                player_id,
                healed,
                current_health,
            } => ServerMessage::PickupCollected {
                pickup_id,
                player_id,
                healed,
                current_health,
            },
            GameEventData::PickupRespawned { pickup_id } => ServerMessage::PickupRespawned { pickup_id },
            GameEventData::Snapshot(snapshot) => ServerMessage::GameState(snapshot),
        }
    }
}

// =============================================================================
// BINARY SNAPSHOT
// =============================================================================

/// Flat form of a snapshot for bincode.
///
/// bincode cannot skip fields, so the optional projectile list is always
/// written (empty when nothing moved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    /// Wall-clock milliseconds
    pub timestamp: u64,
    /// Tick number
    pub tick: u64,
    /// Every player
    pub players: Vec<PlayerSnapshot>,
    /// Moved projectiles
    pub projectiles: Vec<ProjectileDelta>,
    /// Every pickup
    pub pickups: Vec<PickupSnapshot>,
}

impl From<&WorldSnapshot> for SnapshotFrame {
    fn from(snapshot: &WorldSnapshot) -> Self {
        Self {
            timestamp: snapshot.timestamp,
            tick: snapshot.tick,
            players: snapshot.players.clone(),
            projectiles: snapshot.projectiles.clone().unwrap_or_default(),
            pickups: snapshot.pickups.clone(),
        }
    }
}

impl From<SnapshotFrame> for WorldSnapshot {
    fn from(frame: SnapshotFrame) -> Self {
        Self {
            timestamp: frame.timestamp,
            tick: frame.tick,
            players: frame.players,
            projectiles: (!frame.projectiles.is_empty()).then_some(frame.projectiles),
            pickups: frame.pickups,
        }
    }
}

/// Encode a snapshot as a binary frame.
pub fn encode_snapshot(snapshot: &WorldSnapshot) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(&SnapshotFrame::from(snapshot))?)
}

/// Decode a binary snapshot frame.
pub fn decode_snapshot(bytes: &[u8]) -> Result<WorldSnapshot, ProtocolError> {
    let frame: SnapshotFrame = bincode::deserialize(bytes)?;
    Ok(frame.into())
}
