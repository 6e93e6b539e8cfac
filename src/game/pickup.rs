//! Health Pickups
//!
//! Fixed health packs placed when the world is built. Collecting one heals
//! the player and disarms it until its respawn delay has passed; re-arming is
//! polled once per tick like player respawns.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::game::events::{GameEvent, GameEventData, PickupSnapshot};
use crate::game::state::{PlayerId, WorldState};

/// Pickup identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PickupId(pub u32);

/// Where a pickup sits and what it does, as supplied by the scenery layout.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PickupSite {
    /// World position
    pub position: Vec3,
    /// Health restored
    #[serde(default = "default_heal")]
    pub heal_amount: i32,
    /// Time before it re-arms
    #[serde(default = "default_respawn")]
    pub respawn_ms: u64,
}

fn default_heal() -> i32 {
    50
}

fn default_respawn() -> u64 {
    15_000
}

impl PickupSite {
    /// Health pack with default tuning.
    pub fn health_pack(position: Vec3) -> Self {
        Self {
            position,
            heal_amount: default_heal(),
            respawn_ms: default_respawn(),
        }
    }
}

/// Live state of a pickup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PickupState {
    /// Pickup ID
    pub id: PickupId,
    /// Placement and tuning
    pub site: PickupSite,
    /// Whether it can be collected
    pub active: bool,
    /// When it re-arms (set while inactive)
    pub respawn_at: Option<u64>,
    /// Who collected it last
    pub collected_by: Option<PlayerId>,
}

impl PickupState {
    /// Reach from a player's torso centre to a pickup.
    pub const REACH: f32 = 3.0;

    /// Create an armed pickup.
    pub fn new(id: PickupId, site: PickupSite) -> Self {
        Self {
            id,
            site,
            active: true,
            respawn_at: None,
            collected_by: None,
        }
    }

    /// Public view.
    pub fn snapshot(&self) -> PickupSnapshot {
        PickupSnapshot {
            id: self.id,
            position: self.site.position,
            heal_amount: self.site.heal_amount,
            active: self.active,
        }
    }
}

/// Process a collection request.
///
/// Unknown ids, inactive pickups, dead or distant collectors are logged and
/// ignored. Returns the amount healed on success.
pub fn collect_pickup(
    state: &mut WorldState,
    player_id: PlayerId,
    pickup_id: PickupId,
    now_ms: u64,
) -> Option<i32> {
    let Some(pickup) = state.pickups.get(&pickup_id) else {
        warn!(player = %player_id, pickup = pickup_id.0, "Unknown pickup id");
        return None;
    };
    if !pickup.active {
        debug!(pickup = pickup_id.0, "Pickup not armed");
        return None;
    }
    let site = pickup.site;

    let player = state.players.get_mut(&player_id)?;
    if !player.is_alive() {
        return None;
    }
    let reach = PickupState::REACH;
    if player.position.distance_squared(site.position) > reach * reach {
        debug!(player = %player_id, pickup = pickup_id.0, "Pickup out of reach");
        return None;
    }

    let healed = player.heal(site.heal_amount);
    let current_health = player.health;

    if let Some(pickup) = state.pickups.get_mut(&pickup_id) {
        pickup.active = false;
        pickup.respawn_at = Some(now_ms + site.respawn_ms);
        pickup.collected_by = Some(player_id);
    }

    let tick = state.tick;
    state.push_event(GameEvent::new(
        tick,
        GameEventData::PickupCollected {
            pickup_id,
            player_id,
            healed,
            current_health,
        },
    ));

    Some(healed)
}

/// Re-arm pickups whose delay has passed.
pub fn respawn_pickups(state: &mut WorldState, now_ms: u64) {
    let mut rearmed = Vec::new();

    for pickup in state.pickups.values_mut() {
        if pickup.respawn_at.is_some_and(|at| now_ms >= at) {
            pickup.active = true;
            pickup.respawn_at = None;
            rearmed.push(pickup.id);
        }
    }

    let tick = state.tick;
    for pickup_id in rearmed {
        state.push_event(GameEvent::new(tick, GameEventData::PickupRespawned { pickup_id }));
    }
}
