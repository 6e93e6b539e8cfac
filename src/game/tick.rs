//! Authoritative Simulation Tick
//!
//! One fixed-rate step of a world. Every mutation of a tick happens inside
//! [`tick`], in a fixed order, so the snapshot it produces never shows a
//! half-applied step.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::game::collision::CollisionEngine;
use crate::game::combat::{poll_respawns, resolve_hit};
use crate::game::events::{
    GameEvent, GameEventData, LeaveReason, PlayerSnapshot, ProjectileDelta, WorldSnapshot,
};
use crate::game::grid::GridConfig;
use crate::game::ground::GroundConfig;
use crate::game::input::MoveConfig;
use crate::game::pickup::respawn_pickups;
use crate::game::projectile::{HitTarget, ProjectileOutcome};
use crate::game::state::{CombatConfig, PlayerId, WorldState};

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick number just run
    pub tick: u64,
    /// Events generated this tick, in order
    pub events: Vec<GameEvent>,
    /// Players removed by the inactivity sweep
    pub evicted: Vec<PlayerId>,
}

/// Configuration for one world.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Ticks per second
    pub tick_rate: u32,
    /// Idle time before a player is removed
    pub inactivity_timeout_ms: u64,
    /// Connection cap
    pub max_players: usize,
    /// Seed for spawn point selection
    pub rng_seed: u64,
    /// Health, respawn and invulnerability
    pub combat: CombatConfig,
    /// Move validation
    pub movement: MoveConfig,
    /// Ground snapping
    pub ground: GroundConfig,
    /// Scenery grid
    pub grid: GridConfig,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::TICK_RATE,
            inactivity_timeout_ms: 30_000,
            max_players: 16,
            rng_seed: 0x5eed,
            combat: CombatConfig::default(),
            movement: MoveConfig::default(),
            ground: GroundConfig::default(),
            grid: GridConfig::default(),
        }
    }
}

impl WorldConfig {
    /// Seconds per tick.
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Wall-clock period of the tick loop.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}

/// Run one simulation tick.
///
/// # Order
///
/// 1. Remove players idle past the timeout
/// 2. Advance projectiles by one tick interval and hit-test them
/// 3. Queue their hits and expirations
/// 4. Queue the snapshot
/// 5. Respawn dead players and re-arm pickups whose delay has passed
///
/// `now_ms` is the wall-clock time of this tick; the simulation never reads
/// the clock itself.
pub fn tick(state: &mut WorldState, now_ms: u64) -> TickResult {
    // 0. Advance tick counter
    state.tick += 1;
    let mut result = TickResult {
        tick: state.tick,
        ..TickResult::default()
    };

    // 1. Inactivity sweep
    sweep_inactive(state, now_ms, &mut result);

    // 2-3. Projectiles
    let moved = advance_projectiles(state, now_ms);

    // 4. Snapshot
    let snapshot = build_snapshot(state, now_ms, moved);
    let tick = state.tick;
    state.push_event(GameEvent::new(tick, GameEventData::Snapshot(snapshot)));

    // 5. Respawns
    poll_respawns(state, now_ms);
    respawn_pickups(state, now_ms);

    result.events = state.take_events();
    result
}

/// Remove players whose last move is older than the timeout.
fn sweep_inactive(state: &mut WorldState, now_ms: u64, result: &mut TickResult) {
    let timeout = state.config.inactivity_timeout_ms;
    let idle: Vec<PlayerId> = state
        .players
        .values()
        .filter(|p| p.is_inactive(now_ms, timeout))
        .map(|p| p.id)
        .collect();

    for id in idle {
        state.remove_player(id);
        let tick = state.tick;
        state.push_event(GameEvent::player_left(tick, id, LeaveReason::Inactive));
        info!(player = %id, "Player removed for inactivity");
        result.evicted.push(id);
    }
}

/// Advance projectiles and queue their outcomes. Returns the moved ones.
fn advance_projectiles(state: &mut WorldState, now_ms: u64) -> Vec<ProjectileDelta> {
    if state.projectiles.is_empty() {
        return Vec::new();
    }

    let dt = state.config.tick_seconds();
    let scenery: &CollisionEngine = &state.collision;
    let advance = state.projectiles.advance(dt, now_ms, &state.players, scenery);
    let tick = state.tick;

    for outcome in advance.expired {
        match outcome {
            ProjectileOutcome::Expired { projectile } => {
                state.push_event(GameEvent::projectile_expired(tick, &projectile));
            }
            ProjectileOutcome::Hit {
                projectile,
                target: HitTarget::Scenery(_collider),
                ..
            } => {
                #[cfg(feature = "debug-tracing")]
                trace!(id = projectile.id.0, collider = _collider.0, "Projectile hit scenery");
                state.push_event(GameEvent::projectile_hit(tick, &projectile, None, None));
            }
            ProjectileOutcome::Hit {
                projectile,
                target: HitTarget::Player(victim),
                hit_distance,
            } => {
                let report = resolve_hit(
                    state,
                    victim,
                    projectile.owner,
                    &projectile.ballistics,
                    hit_distance,
                    now_ms,
                );

                let damage = report.map(|r| r.damage);
                state.push_event(GameEvent::projectile_hit(tick, &projectile, Some(victim), damage));

                if let Some(report) = report {
                    state.push_event(report.hit_event(tick));
                    if let Some(kill) = report.kill_event(tick, now_ms) {
                        state.push_event(kill);
                    }
                }
            }
        }
    }

    advance
        .still_active
        .into_iter()
        .map(|(id, position)| ProjectileDelta { id, position })
        .collect()
}

/// Public state of the whole world.
///
/// `projectiles` is `None` when nothing moved.
pub fn build_snapshot(state: &WorldState, now_ms: u64, moved: Vec<ProjectileDelta>) -> WorldSnapshot {
    let combat = &state.config.combat;

    WorldSnapshot {
        timestamp: now_ms,
        tick: state.tick,
        players: state
            .players
            .values()
            .map(|p| PlayerSnapshot::capture(p, p.is_alive() && p.is_invulnerable(now_ms, combat)))
            .collect(),
        projectiles: (!moved.is_empty()).then_some(moved),
        pickups: state.pickups.values().map(|p| p.snapshot()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::events::DestroyReason;
    use crate::game::ground::TriangleMesh;
    use crate::game::input::ShootCommand;
    use crate::game::scenery::StaticLayout;
    use glam::Vec3;

    const T0: u64 = 5_000;

    fn world() -> WorldState {
        WorldState::new(
            WorldConfig::default(),
            TriangleMesh::flat_ground(200.0, 0.0),
            &StaticLayout::default(),
        )
        .unwrap()
    }

    fn at_tick(n: u64) -> u64 {
        T0 + n * 1_000 / 60
    }

    fn keep_alive(state: &mut WorldState, now: u64) {
        for p in state.players.values_mut() {
            p.last_active_time = now;
        }
    }

    fn shoot(state: &mut WorldState, shooter: PlayerId, weapon: &str, direction: Vec3) {
        let origin = state.get_player(shooter).unwrap().position;
        ShootCommand {
            weapon_id: weapon.into(),
            position: origin,
            direction,
        }
        .process(state, shooter, T0)
        .unwrap();
        state.take_events();
    }

    #[test]
    fn test_cannon_scenario() {
        let mut state = world();
        let a = state.add_player_at("a", Vec3::ZERO, 0);
        let b = state.add_player_at("b", Vec3::new(10.0, 0.0, 0.0), 0);
        keep_alive(&mut state, T0);
        shoot(&mut state, a, "cannon", Vec3::X);

        let first = tick(&mut state, at_tick(1));
        assert_eq!(first.events.len(), 1);

        let second = tick(&mut state, at_tick(2));
        let kinds: Vec<&GameEventData> = second.events.iter().map(|e| &e.data).collect();

        match kinds[0] {
            GameEventData::ProjectileDestroyed {
                reason,
                hit_player_id,
                damage,
                position,
                ..
            } => {
                assert_eq!(*reason, DestroyReason::Hit);
                assert_eq!(*hit_player_id, Some(b));
                assert_eq!(*damage, Some(20));
                assert!((position.x - 8.85).abs() < 1e-3);
            }
            other => panic!("unexpected {other:?}"),
        }
        match kinds[1] {
            GameEventData::PlayerHit {
                current_health,
                was_killed,
                source_player_id,
                ..
            } => {
                assert_eq!(*current_health, 180);
                assert!(!*was_killed);
                assert_eq!(*source_player_id, a);
            }
            other => panic!("unexpected {other:?}"),
        }
        match kinds[2] {
            GameEventData::Snapshot(snapshot) => {
                assert!(snapshot.projectiles.is_none());
                let victim = snapshot.players.iter().find(|p| p.id == b).unwrap();
                assert_eq!(victim.health, 180);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(state.projectiles.is_empty());
    }

    #[test]
    fn test_snapshot_carries_projectile_deltas() {
        let mut state = world();
        let a = state.add_player_at("a", Vec3::ZERO, 0);
        keep_alive(&mut state, T0);
        shoot(&mut state, a, "cannon", Vec3::Z);

        let result = tick(&mut state, at_tick(1));
        match &result.events[0].data {
            GameEventData::Snapshot(snapshot) => {
                let deltas = snapshot.projectiles.as_ref().unwrap();
                assert_eq!(deltas.len(), 1);
                assert!((deltas[0].position.z - 5.0).abs() < 1e-4);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_projectile_removed_before_lifetime_deadline() {
        let mut state = world();
        let a = state.add_player_at("a", Vec3::ZERO, 0);
        shoot(&mut state, a, "rocket", Vec3::X);

        let ballistics = state.projectiles.iter().next().unwrap().ballistics;
        let deadline = (ballistics.lifetime_ms * 60).div_ceil(1_000);

        let mut expired_at = None;
        for n in 1..=deadline {
            let now = at_tick(n);
            keep_alive(&mut state, now);
            let result = tick(&mut state, now);
            let expired = result.events.iter().any(|e| {
                matches!(
                    e.data,
                    GameEventData::ProjectileDestroyed {
                        reason: DestroyReason::MaxDistance,
                        ..
                    }
                )
            });
            if expired {
                expired_at = Some(n);
                break;
            }
        }

        assert!(expired_at.is_some_and(|n| n <= deadline));
        assert!(state.projectiles.is_empty());
    }

    #[test]
    fn test_inactive_players_are_swept() {
        let mut state = world();
        let idle = state.add_player_at("idle", Vec3::ZERO, 0);
        let busy = state.add_player_at("busy", Vec3::new(20.0, 0.0, 0.0), 0);
        state.get_player_mut(busy).unwrap().last_active_time = 25_000;

        let result = tick(&mut state, 30_001);
        assert_eq!(result.evicted, vec![idle]);
        assert!(state.get_player(idle).is_none());
        assert!(state.get_player(busy).is_some());
        assert!(matches!(
            result.events[0].data,
            GameEventData::PlayerLeft {
                reason: LeaveReason::Inactive,
                ..
            }
        ));
    }

    #[test]
    fn test_kill_then_respawn_after_snapshot() {
        let mut state = world();
        let a = state.add_player_at("a", Vec3::ZERO, 0);
        let b = state.add_player_at("b", Vec3::new(10.0, 0.0, 0.0), 0);
        state.get_player_mut(b).unwrap().health = 20;
        keep_alive(&mut state, T0);
        shoot(&mut state, a, "cannon", Vec3::X);

        tick(&mut state, at_tick(1));
        let lethal = tick(&mut state, at_tick(2));
        let killed = lethal
            .events
            .iter()
            .filter(|e| matches!(e.data, GameEventData::PlayerKilled { .. }))
            .count();
        assert_eq!(killed, 1);
        assert!(state.get_player(b).unwrap().is_dead);

        let deadline = state.get_player(b).unwrap().respawn_deadline.unwrap();
        keep_alive(&mut state, deadline);
        let result = tick(&mut state, deadline);

        let snapshot_index = result
            .events
            .iter()
            .position(|e| matches!(e.data, GameEventData::Snapshot(_)))
            .unwrap();
        let respawn_index = result
            .events
            .iter()
            .position(|e| matches!(e.data, GameEventData::PlayerRespawned { .. }))
            .unwrap();
        assert!(snapshot_index < respawn_index);
        assert!(state.get_player(b).unwrap().is_alive());
    }

    #[test]
    fn test_tick_counter_advances() {
        let mut state = world();
        assert_eq!(tick(&mut state, 0).tick, 1);
        assert_eq!(tick(&mut state, 16).tick, 2);
        assert_eq!(state.tick, 2);
    }

    #[test]
    fn test_tick_interval_matches_rate() {
        let config = WorldConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_micros(16_666));

        let stalled = WorldConfig {
            tick_rate: 0,
            ..WorldConfig::default()
        };
        assert_eq!(stalled.tick_interval(), Duration::from_secs(1));
    }
}
