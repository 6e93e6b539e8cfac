//! Combat Resolution
//!
//! Turns projectile contacts into damage, deaths and kill credit, and brings
//! dead players back once their respawn delay has passed.

use glam::Vec3;
use tracing::info;

use crate::game::events::{GameEvent, GameEventData};
use crate::game::state::{PlayerId, WorldState};
use crate::game::weapon::Ballistics;

/// Outcome of one resolved hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitReport {
    /// Victim
    pub hit_player_id: PlayerId,
    /// Shooter
    pub source_player_id: PlayerId,
    /// Damage actually applied (0 when the victim was invulnerable)
    pub damage: i32,
    /// Victim health afterwards
    pub current_health: i32,
    /// Whether this hit killed the victim
    pub was_killed: bool,
    /// Victim position at the time of the hit
    pub position: Vec3,
}

impl HitReport {
    /// `PlayerHit` event for this report.
    pub fn hit_event(&self, tick: u64) -> GameEvent {
        GameEvent::new(
            tick,
            GameEventData::PlayerHit {
                hit_player_id: self.hit_player_id,
                source_player_id: self.source_player_id,
                damage: self.damage,
                current_health: self.current_health,
                was_killed: self.was_killed,
            },
        )
    }

    /// `PlayerKilled` event, if the hit was lethal.
    pub fn kill_event(&self, tick: u64, now_ms: u64) -> Option<GameEvent> {
        self.was_killed.then(|| {
            GameEvent::new(
                tick,
                GameEventData::PlayerKilled {
                    player_id: self.hit_player_id,
                    killer_player_id: self.source_player_id,
                    position: self.position,
                    timestamp: now_ms,
                },
            )
        })
    }
}

/// Apply a projectile hit to `victim`.
///
/// Damage comes from the weapon's falloff at `hit_distance` and goes through
/// the victim's `take_damage`. A lethal hit credits the shooter with a kill
/// and the victim with a death; the respawn itself is left to
/// [`poll_respawns`]. Returns `None` if the victim is gone.
pub fn resolve_hit(
    state: &mut WorldState,
    victim: PlayerId,
    source: PlayerId,
    ballistics: &Ballistics,
    hit_distance: f32,
    now_ms: u64,
) -> Option<HitReport> {
    let combat = state.config.combat;
    let raw = ballistics.damage_at(hit_distance);

    let player = state.players.get_mut(&victim)?;
    let before = player.health;
    let was_killed = player.take_damage(raw, now_ms, &combat);
    let report = HitReport {
        hit_player_id: victim,
        source_player_id: source,
        damage: before - player.health,
        current_health: player.health,
        was_killed,
        position: player.position,
    };

    if was_killed {
        player.deaths += 1;
        if source != victim {
            if let Some(killer) = state.players.get_mut(&source) {
                killer.kills += 1;
            }
        }
        info!(victim = %victim, killer = %source, "Player killed");
    }

    Some(report)
}

/// Respawn every dead player whose delay has elapsed.
///
/// Runs once per tick so respawns never interleave with snapshot assembly.
pub fn poll_respawns(state: &mut WorldState, now_ms: u64) -> Vec<PlayerId> {
    let due: Vec<PlayerId> = state
        .players
        .values()
        .filter(|p| p.respawn_due(now_ms))
        .map(|p| p.id)
        .collect();

    for id in &due {
        let position = state.random_spawn_point();
        if let Some(player) = state.players.get_mut(id) {
            player.respawn(position, now_ms);
        }
        state.weapons.restock(*id);

        let tick = state.tick;
        state.push_event(GameEvent::player_respawned(tick, *id, position));
        info!(player = %id, ?position, "Player respawned");
    }

    due
}
