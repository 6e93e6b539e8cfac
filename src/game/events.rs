//! Game Events
//!
//! Everything the simulation has to tell connected clients. Events are pushed
//! onto the world's pending list in the order they happen and drained by the
//! session layer after the mutation that produced them has finished.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::game::input::InputFlags;
use crate::game::pickup::PickupId;
use crate::game::projectile::{Projectile, ProjectileId};
use crate::game::state::{PlayerId, PlayerState};
use crate::game::weapon::WeaponType;

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// Why a projectile left the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DestroyReason {
    /// Ran out of range or lifetime.
    MaxDistance,
    /// Struck a player or scenery.
    Hit,
}

/// Why a player left the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaveReason {
    /// Connection closed or `leave` received.
    Disconnected,
    /// No input within the inactivity timeout.
    Inactive,
}

/// Public description of a newly fired projectile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileInfo {
    /// Projectile id
    pub id: ProjectileId,
    /// Shooter
    pub owner_id: PlayerId,
    /// Muzzle position
    pub position: Vec3,
    /// Unit direction
    pub direction: Vec3,
    /// Ballistics type
    pub weapon_type: WeaponType,
    /// Units per second
    pub speed: f32,
    /// Hit radius
    pub radius: f32,
}

impl From<&Projectile> for ProjectileInfo {
    fn from(p: &Projectile) -> Self {
        Self {
            id: p.id,
            owner_id: p.owner,
            position: p.origin,
            direction: p.direction,
            weapon_type: p.weapon,
            speed: p.ballistics.speed,
            radius: p.ballistics.radius,
        }
    }
}

/// A player's public state in a snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
    /// Player id
    pub id: PlayerId,
    /// Display name
    pub name: String,
    /// Torso centre
    pub position: Vec3,
    /// Facing
    pub rotation: Quat,
    /// Current health
    pub health: i32,
    /// Maximum health
    pub max_health: i32,
    /// Dead and waiting to respawn
    pub is_dead: bool,
    /// Inside the spawn protection window
    pub invulnerable: bool,
    /// Echo of held movement keys
    pub input_flags: InputFlags,
    /// Last move sequence the server applied
    pub last_processed_input: u32,
    /// Kills scored
    pub kills: u32,
    /// Deaths suffered
    pub deaths: u32,
}

impl PlayerSnapshot {
    /// Capture a player.
    pub fn capture(player: &PlayerState, invulnerable: bool) -> Self {
        Self {
            id: player.id,
            name: player.name.clone(),
            position: player.position,
            rotation: player.rotation,
            health: player.health,
            max_health: player.max_health,
            is_dead: player.is_dead,
            invulnerable,
            input_flags: player.input_flags,
            last_processed_input: player.last_processed_input,
            kills: player.kills,
            deaths: player.deaths,
        }
    }
}

/// Position update of a projectile that moved this tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProjectileDelta {
    /// Projectile id
    pub id: ProjectileId,
    /// New position
    pub position: Vec3,
}

/// A pickup's public state.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupSnapshot {
    /// Pickup id
    pub id: PickupId,
    /// Where it sits
    pub position: Vec3,
    /// Health restored
    pub heal_amount: i32,
    /// Whether it can be collected now
    pub active: bool,
}

/// Complete public world state for one tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    /// Wall-clock milliseconds
    pub timestamp: u64,
    /// Tick number
    pub tick: u64,
    /// Every connected player
    pub players: Vec<PlayerSnapshot>,
    /// Present only when at least one projectile moved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projectiles: Option<Vec<ProjectileDelta>>,
    /// Every pickup
    pub pickups: Vec<PickupSnapshot>,
}

// =============================================================================
// EVENTS
// =============================================================================

/// Game event data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Player entered the world
    PlayerJoined {
        /// New player
        player_id: PlayerId,
        /// Display name
        name: String,
        /// Spawn position
        position: Vec3,
    },

    /// Player was removed
    PlayerLeft {
        /// Departed player
        player_id: PlayerId,
        /// Disconnect or eviction
        reason: LeaveReason,
    },

    /// Authoritative position the client must adopt
    PositionCorrection {
        /// Corrected player
        player_id: PlayerId,
        /// Server position
        position: Vec3,
        /// Server rotation
        rotation: Quat,
        /// Last move processed
        input_sequence_id: u32,
    },

    /// Shot accepted
    ProjectileCreated {
        /// Spawned projectile
        projectile: ProjectileInfo,
    },

    /// Shot refused with a reason the client should know about
    ShotRejected {
        /// Shooter
        player_id: PlayerId,
        /// Slot fired
        weapon_id: String,
        /// Wire code
        code: String,
        /// Readable reason
        message: String,
    },

    /// Projectile removed
    ProjectileDestroyed {
        /// Removed projectile
        projectile_id: ProjectileId,
        /// Final position
        position: Vec3,
        /// Why it was removed
        reason: DestroyReason,
        /// Player struck, if any
        hit_player_id: Option<PlayerId>,
        /// Damage dealt to that player
        damage: Option<i32>,
    },

    /// Damage applied to a player
    PlayerHit {
        /// Victim
        hit_player_id: PlayerId,
        /// Shooter
        source_player_id: PlayerId,
        /// Damage after falloff
        damage: i32,
        /// Victim health afterwards
        current_health: i32,
        /// Lethal hit
        was_killed: bool,
    },

    /// Player died
    PlayerKilled {
        /// Victim
        player_id: PlayerId,
        /// Shooter credited
        killer_player_id: PlayerId,
        /// Where the victim died
        position: Vec3,
        /// Wall-clock milliseconds
        timestamp: u64,
    },

    /// Dead player came back
    PlayerRespawned {
        /// Respawned player
        player_id: PlayerId,
        /// New spawn position
        position: Vec3,
    },

    /// Health pack consumed
    PickupCollected {
        /// Consumed pickup
        pickup_id: PickupId,
        /// Collector
        player_id: PlayerId,
        /// Health restored
        healed: i32,
        /// Collector health afterwards
        current_health: i32,
    },

    /// Health pack available again
    PickupRespawned {
        /// Restored pickup
        pickup_id: PickupId,
    },

    /// Per-tick world state
    Snapshot(WorldSnapshot),
}

/// Who should receive an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recipient {
    /// Every connection.
    All,
    /// Only this player.
    Player(PlayerId),
    /// Everyone but this player.
    AllExcept(PlayerId),
}

/// A game event stamped with its tick.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick when event occurred
    pub tick: u64,

    /// Player the event is about (for routing)
    pub player_id: Option<PlayerId>,

    /// Event data
    pub data: GameEventData,
}

impl GameEvent {
    /// Create a new event.
    pub fn new(tick: u64, data: GameEventData) -> Self {
        let player_id = match &data {
            GameEventData::PlayerJoined { player_id, .. } => Some(*player_id),
            GameEventData::PlayerLeft { player_id, .. } => Some(*player_id),
            GameEventData::PositionCorrection { player_id, .. } => Some(*player_id),
            GameEventData::ProjectileCreated { projectile } => Some(projectile.owner_id),
            GameEventData::ShotRejected { player_id, .. } => Some(*player_id),
            GameEventData::ProjectileDestroyed { hit_player_id, .. } => *hit_player_id,
            GameEventData::PlayerHit { hit_player_id, .. } => Some(*hit_player_id),
            GameEventData::PlayerKilled { player_id, .. } => Some(*player_id),
            GameEventData::PlayerRespawned { player_id, .. } => Some(*player_id),
            GameEventData::PickupCollected { player_id, .. } => Some(*player_id),
            GameEventData::PickupRespawned { .. } | GameEventData::Snapshot(_) => None,
        };

        Self {
            tick,
            player_id,
            data,
        }
    }

    /// Who should receive this event.
    pub fn recipient(&self) -> Recipient {
        match &self.data {
            GameEventData::PositionCorrection { player_id, .. }
            | GameEventData::ShotRejected { player_id, .. } => Recipient::Player(*player_id),
            GameEventData::PlayerJoined { player_id, .. } => Recipient::AllExcept(*player_id),
            _ => Recipient::All,
        }
    }

    /// Create player joined event.
    pub fn player_joined(tick: u64, player_id: PlayerId, name: String, position: Vec3) -> Self {
        Self::new(
            tick,
            GameEventData::PlayerJoined {
                player_id,
                name,
                position,
            },
        )
    }

    /// Create player left event.
    pub fn player_left(tick: u64, player_id: PlayerId, reason: LeaveReason) -> Self {
        Self::new(tick, GameEventData::PlayerLeft { player_id, reason })
    }

    /// Create position correction event.
    pub fn position_correction(tick: u64, player: &PlayerState) -> Self {
        Self::new(
            tick,
            GameEventData::PositionCorrection {
                player_id: player.id,
                position: player.position,
                rotation: player.rotation,
                input_sequence_id: player.last_processed_input,
            },
        )
    }

    /// Create projectile created event.
    pub fn projectile_created(tick: u64, projectile: &Projectile) -> Self {
        Self::new(
            tick,
            GameEventData::ProjectileCreated {
                projectile: ProjectileInfo::from(projectile),
            },
        )
    }

    /// Create projectile expired event.
    pub fn projectile_expired(tick: u64, projectile: &Projectile) -> Self {
        Self::new(
            tick,
            GameEventData::ProjectileDestroyed {
                projectile_id: projectile.id,
                position: projectile.position,
                reason: DestroyReason::MaxDistance,
                hit_player_id: None,
                damage: None,
            },
        )
    }

    /// Create projectile hit event.
    pub fn projectile_hit(
        tick: u64,
        projectile: &Projectile,
        hit_player_id: Option<PlayerId>,
        damage: Option<i32>,
    ) -> Self {
        Self::new(
            tick,
            GameEventData::ProjectileDestroyed {
                projectile_id: projectile.id,
                position: projectile.position,
                reason: DestroyReason::Hit,
                hit_player_id,
                damage,
            },
        )
    }

    /// Create player respawned event.
    pub fn player_respawned(tick: u64, player_id: PlayerId, position: Vec3) -> Self {
        Self::new(tick, GameEventData::PlayerRespawned { player_id, position })
    }
}
