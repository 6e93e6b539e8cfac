//! World State
//!
//! Per-world simulation state: players, projectiles, scenery and pickups.
//! Uses BTreeMap for stable iteration order so snapshots and event lists
//! come out the same way every tick.

use std::collections::BTreeMap;
use std::fmt;

use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::game::collision::CollisionEngine;
use crate::game::events::GameEvent;
use crate::game::ground::{GroundResolver, TriangleMesh};
use crate::game::input::InputFlags;
use crate::game::pickup::{PickupId, PickupState};
use crate::game::projectile::{HitCapsule, ProjectileSystem};
use crate::game::scenery::{self, SceneryError, SceneryProvider};
use crate::game::tick::WorldConfig;
use crate::game::weapon::{Armory, WeaponAuthority};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Connection-scoped player identifier, assigned in join order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// COMBAT CONFIG
// =============================================================================

/// Health and life-cycle tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CombatConfig {
    /// Health on spawn.
    pub max_health: i32,
    /// Time dead before respawning.
    pub respawn_delay_ms: u64,
    /// Damage immunity after each spawn.
    pub spawn_invulnerability_ms: u64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            max_health: 200,
            respawn_delay_ms: 3_000,
            spawn_invulnerability_ms: 2_000,
        }
    }
}

// =============================================================================
// PLAYER STATE
// =============================================================================

/// State of a single connected player.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerState {
    /// Player id
    pub id: PlayerId,

    /// Display name
    pub name: String,

    /// Torso centre
    pub position: Vec3,

    /// Facing
    pub rotation: Quat,

    /// Current health, 0..=max_health
    pub health: i32,

    /// Health on spawn
    pub max_health: i32,

    /// True iff health reached 0 and no respawn happened yet
    pub is_dead: bool,

    // =========================================================================
    // Timers (wall-clock milliseconds)
    // =========================================================================
    /// When the player last spawned; start of the invulnerability window
    pub last_spawn_time: u64,

    /// When a dead player comes back
    pub respawn_deadline: Option<u64>,

    /// Last accepted movement; drives the inactivity sweep
    pub last_active_time: u64,

    /// Last accepted move, for the rate limiter
    pub last_move_time: Option<u64>,

    // =========================================================================
    // Input echo
    // =========================================================================
    /// Movement keys held in the last move
    pub input_flags: InputFlags,

    /// Highest move sequence processed
    pub last_processed_input: u32,

    // =========================================================================
    // Score
    // =========================================================================
    /// Kills scored
    pub kills: u32,

    /// Deaths suffered
    pub deaths: u32,
}

impl PlayerState {
    /// Create a freshly spawned player.
    pub fn new(id: PlayerId, name: impl Into<String>, position: Vec3, max_health: i32, now_ms: u64) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            rotation: Quat::IDENTITY,
            health: max_health,
            max_health,
            is_dead: false,
            last_spawn_time: now_ms,
            respawn_deadline: None,
            last_active_time: now_ms,
            last_move_time: None,
            input_flags: InputFlags::default(),
            last_processed_input: 0,
            kills: 0,
            deaths: 0,
        }
    }

    /// Whether the player can act and be hit.
    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.is_dead
    }

    /// Whether the spawn invulnerability window is still open.
    pub fn is_invulnerable(&self, now_ms: u64, config: &CombatConfig) -> bool {
        now_ms.saturating_sub(self.last_spawn_time) < config.spawn_invulnerability_ms
    }

    /// Apply damage. Returns true iff this call killed the player.
    ///
    /// Dead or invulnerable players ignore damage entirely. Health is clamped
    /// at 0; reaching 0 marks the player dead and schedules the respawn.
    pub fn take_damage(&mut self, amount: i32, now_ms: u64, config: &CombatConfig) -> bool {
        if self.is_dead || amount <= 0 || self.is_invulnerable(now_ms, config) {
            return false;
        }

        self.health = (self.health - amount).clamp(0, self.max_health);
        if self.health == 0 {
            self.is_dead = true;
            self.respawn_deadline = Some(now_ms + config.respawn_delay_ms);
            return true;
        }

        false
    }

    /// Restore health up to the maximum. Returns the amount restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        if self.is_dead || amount <= 0 {
            return 0;
        }
        let before = self.health;
        self.health = (self.health + amount).min(self.max_health);
        self.health - before
    }

    /// Apply an accepted move. Refreshes the activity timer.
    pub fn update_position(
        &mut self,
        position: Vec3,
        rotation: Quat,
        input_flags: InputFlags,
        input_sequence: u32,
        now_ms: u64,
    ) {
        self.position = position;
        self.rotation = rotation;
        self.input_flags = input_flags;
        self.last_processed_input = self.last_processed_input.max(input_sequence);
        self.last_move_time = Some(now_ms);
        self.last_active_time = now_ms;
    }

    /// Consume a rejected move's sequence id.
    ///
    /// Feeds the rate limiter and the correction ack but leaves the
    /// transform and the activity timer alone.
    pub fn record_rejected_input(&mut self, input_sequence: u32, now_ms: u64) {
        self.last_processed_input = self.last_processed_input.max(input_sequence);
        self.last_move_time = Some(now_ms);
    }

    /// Whether a dead player's respawn delay has elapsed.
    pub fn respawn_due(&self, now_ms: u64) -> bool {
        self.is_dead && self.respawn_deadline.is_some_and(|deadline| now_ms >= deadline)
    }

    /// Bring the player back at `position` with full health.
    pub fn respawn(&mut self, position: Vec3, now_ms: u64) {
        self.position = position;
        self.rotation = Quat::IDENTITY;
        self.health = self.max_health;
        self.is_dead = false;
        self.respawn_deadline = None;
        self.last_spawn_time = now_ms;
        self.input_flags = InputFlags::default();
    }

    /// Whether no move arrived within `timeout_ms`.
    pub fn is_inactive(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_active_time) > timeout_ms
    }

    /// Compound hit shape at the current position.
    pub fn hit_capsule(&self) -> HitCapsule {
        HitCapsule::around(self.position)
    }
}

// =============================================================================
// WORLD STATE
// =============================================================================

/// Complete state of one world.
#[derive(Debug)]
pub struct WorldState {
    /// World identifier
    pub world_id: Uuid,

    /// Tuning
    pub config: WorldConfig,

    /// Ticks run so far
    pub tick: u64,

    /// Connected players
    pub players: BTreeMap<PlayerId, PlayerState>,

    /// Live projectiles
    pub projectiles: ProjectileSystem,

    /// Static scenery
    pub collision: CollisionEngine,

    /// Ground and wall resolution
    pub ground: GroundResolver,

    /// Health packs
    pub pickups: BTreeMap<PickupId, PickupState>,

    /// Cooldown and ammo gate
    pub weapons: Box<dyn WeaponAuthority>,

    /// Torso positions players spawn at
    pub spawn_points: Vec<Vec3>,

    rng: StdRng,
    next_player_id: u32,
    pending_events: Vec<GameEvent>,
}

impl WorldState {
    /// Build a world from scenery and a ground mesh.
    pub fn new(
        config: WorldConfig,
        mesh: TriangleMesh,
        layout: &dyn SceneryProvider,
    ) -> Result<Self, SceneryError> {
        let mut collision = CollisionEngine::new(config.grid);
        let registered = scenery::populate(&mut collision, layout)?;
        let ground = GroundResolver::new(mesh, config.ground);

        let spawn_points = layout
            .spawn_points()
            .into_iter()
            .map(|point| {
                ground
                    .standing_position(point.x, point.z, point.y + config.ground.probe_height)
                    .unwrap_or_else(|| {
                        warn!(?point, "Spawn point has no ground below it");
                        point + Vec3::Y * config.ground.ride_height
                    })
            })
            .collect::<Vec<_>>();

        let pickups = layout
            .pickup_sites()
            .into_iter()
            .enumerate()
            .map(|(i, site)| {
                let id = PickupId(i as u32 + 1);
                (id, PickupState::new(id, site))
            })
            .collect();

        info!(
            colliders = registered,
            spawn_points = spawn_points.len(),
            triangles = ground.mesh().triangle_count(),
            "World created"
        );

        Ok(Self {
            world_id: Uuid::new_v4(),
            rng: StdRng::seed_from_u64(config.rng_seed),
            config,
            tick: 0,
            players: BTreeMap::new(),
            projectiles: ProjectileSystem::new(),
            collision,
            ground,
            pickups,
            weapons: Box::new(Armory::new()),
            spawn_points,
            next_player_id: 1,
            pending_events: Vec::new(),
        })
    }

    /// Replace the weapon authority.
    pub fn with_weapons(mut self, weapons: Box<dyn WeaponAuthority>) -> Self {
        self.weapons = weapons;
        self
    }

    /// Pick a spawn point at random.
    pub fn random_spawn_point(&mut self) -> Vec3 {
        if self.spawn_points.is_empty() {
            return Vec3::Y * self.config.ground.ride_height;
        }
        let index = self.rng.gen_range(0..self.spawn_points.len());
        self.spawn_points[index]
    }

    /// Add a player at a random spawn point.
    pub fn add_player(&mut self, name: impl Into<String>, now_ms: u64) -> PlayerId {
        let position = self.random_spawn_point();
        self.add_player_at(name, position, now_ms)
    }

    /// Add a player at a given position.
    pub fn add_player_at(&mut self, name: impl Into<String>, position: Vec3, now_ms: u64) -> PlayerId {
        let id = PlayerId(self.next_player_id);
        self.next_player_id += 1;

        let player = PlayerState::new(id, name, position, self.config.combat.max_health, now_ms);
        self.players.insert(id, player);
        self.weapons.equip(id);
        id
    }

    /// Remove a player. Their projectiles keep flying.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<PlayerState> {
        let player = self.players.remove(&id)?;
        self.weapons.forget(id);
        Some(player)
    }

    /// Get player by ID.
    pub fn get_player(&self, id: PlayerId) -> Option<&PlayerState> {
        self.players.get(&id)
    }

    /// Get mutable player by ID.
    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut PlayerState> {
        self.players.get_mut(&id)
    }

    /// Number of connected players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Take pending events (consumes them).
    pub fn take_events(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.pending_events)
    }

    /// Push a game event.
    pub fn push_event(&mut self, event: GameEvent) {
        self.pending_events.push(event);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::scenery::StaticLayout;

    fn config() -> CombatConfig {
        CombatConfig::default()
    }

    fn player() -> PlayerState {
        PlayerState::new(PlayerId(1), "alpha", Vec3::ZERO, 200, 0)
    }

    #[test]
    fn test_spawn_invulnerability_drops_damage() {
        let mut p = player();
        assert!(!p.take_damage(500, 1_999, &config()));
        assert_eq!(p.health, 200);
        assert!(p.is_alive());

        assert!(!p.take_damage(50, 2_000, &config()));
        assert_eq!(p.health, 150);
    }

    #[test]
    fn test_death_transition_happens_once() {
        let mut p = player();
        let now = 5_000;

        assert!(!p.take_damage(150, now, &config()));
        assert!(p.take_damage(100, now, &config()));
        assert_eq!(p.health, 0);
        assert!(p.is_dead);
        assert_eq!(p.respawn_deadline, Some(now + 3_000));

        // Already dead
        assert!(!p.take_damage(100, now + 1, &config()));
        assert_eq!(p.health, 0);
    }

    #[test]
    fn test_respawn_cycle() {
        let mut p = player();
        assert!(p.take_damage(200, 10_000, &config()));

        assert!(!p.respawn_due(12_999));
        assert!(p.respawn_due(13_000));

        p.respawn(Vec3::new(5.0, 2.1, 5.0), 13_000);
        assert!(p.is_alive());
        assert_eq!(p.health, p.max_health);
        assert!(!p.respawn_due(20_000));

        // Fresh invulnerability window
        assert!(p.is_invulnerable(14_999, &config()));
        assert!(!p.take_damage(50, 14_000, &config()));
        assert_eq!(p.health, 200);
    }

    #[test]
    fn test_heal_clamps_to_max() {
        let mut p = player();
        p.take_damage(30, 10_000, &config());
        assert_eq!(p.heal(50), 30);
        assert_eq!(p.health, 200);
        assert_eq!(p.heal(10), 0);
    }

    #[test]
    fn test_update_position_refreshes_activity() {
        let mut p = player();
        assert!(p.is_inactive(30_001, 30_000));

        p.update_position(Vec3::X, Quat::IDENTITY, InputFlags::FORWARD, 7, 25_000);
        assert!(!p.is_inactive(30_001, 30_000));
        assert_eq!(p.last_processed_input, 7);
        assert_eq!(p.input_flags, InputFlags::FORWARD);

        // Sequence never goes backwards
        p.update_position(Vec3::X, Quat::IDENTITY, InputFlags::default(), 3, 25_010);
        assert_eq!(p.last_processed_input, 7);
    }

    #[test]
    fn test_world_add_and_remove_players() {
        let mut world =
            WorldState::new(WorldConfig::default(), TriangleMesh::flat_ground(200.0, 0.0), &StaticLayout::default_arena())
                .unwrap();

        let a = world.add_player("a", 0);
        let b = world.add_player("b", 0);
        assert!(a < b);
        assert_eq!(world.player_count(), 2);

        let spawn = world.get_player(a).unwrap().position;
        assert!((spawn.y - world.config.ground.ride_height).abs() < 1e-4);

        assert!(world.remove_player(a).is_some());
        assert!(world.remove_player(a).is_none());
        assert_eq!(world.player_count(), 1);
    }

    #[test]
    fn test_spawn_selection_is_seeded() {
        let layout = StaticLayout::default_arena();
        let mesh = TriangleMesh::flat_ground(200.0, 0.0);
        let mut w1 = WorldState::new(WorldConfig::default(), mesh.clone(), &layout).unwrap();
        let mut w2 = WorldState::new(WorldConfig::default(), mesh, &layout).unwrap();

        for _ in 0..8 {
            assert_eq!(w1.random_spawn_point(), w2.random_spawn_point());
        }
    }
}
