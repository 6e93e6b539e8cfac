//! Client Commands
//!
//! Server side of the prediction contract. Movement arrives as a claimed
//! position; the server bounds it, slides it along scenery, snaps it to the
//! ground and answers with a correction whenever the result differs from the
//! claim. Shots pass the weapon gate before a projectile is spawned.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::game::events::{GameEvent, GameEventData};
use crate::game::ground::MoveResolution;
use crate::game::projectile::ProjectileId;
use crate::game::state::{PlayerId, WorldState};
use crate::game::weapon::ShootError;

// =============================================================================
// INPUT FLAGS
// =============================================================================

/// Movement keys held by the client, echoed back in snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputFlags(pub u8);

impl InputFlags {
    /// Forward
    pub const FORWARD: InputFlags = InputFlags(0x01);
    /// Backward
    pub const BACKWARD: InputFlags = InputFlags(0x02);
    /// Strafe left
    pub const LEFT: InputFlags = InputFlags(0x04);
    /// Strafe right
    pub const RIGHT: InputFlags = InputFlags(0x08);
    /// Jump
    pub const JUMP: InputFlags = InputFlags(0x10);
    /// Boost
    pub const BOOST: InputFlags = InputFlags(0x20);

    /// Whether all bits of `other` are set.
    #[inline]
    pub fn contains(self, other: InputFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union.
    #[inline]
    pub fn with(self, other: InputFlags) -> InputFlags {
        InputFlags(self.0 | other.0)
    }
}

// =============================================================================
// MOVEMENT
// =============================================================================

/// Movement validation tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveConfig {
    /// Moves closer together than this are dropped.
    pub min_interval_ms: u64,
    /// Largest horizontal distance accepted in one move.
    pub max_step: f32,
    /// Deviation from the claim that triggers a correction.
    pub correction_tolerance: f32,
    /// Player radius against scenery.
    pub player_radius: f32,
}

impl Default for MoveConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 10,
            max_step: 25.0,
            correction_tolerance: 0.1,
            player_radius: 1.0,
        }
    }
}

/// Why a move was not applied as claimed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MoveRejection {
    /// Non-finite numbers or a degenerate rotation.
    #[error("malformed move: {0}")]
    Malformed(&'static str),

    /// Mover is not in the world.
    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    /// Dead players do not move.
    #[error("player is dead")]
    PlayerDead,

    /// Arrived faster than the rate limit allows.
    #[error("move rate exceeded ({elapsed_ms}ms since last move)")]
    RateLimited {
        /// Time since the last accepted move.
        elapsed_ms: u64,
    },

    /// Sequence id not newer than the last processed one.
    #[error("stale input sequence {sequence} (last {last})")]
    StaleSequence {
        /// Received id.
        sequence: u32,
        /// Last processed id.
        last: u32,
    },

    /// Claimed position jumped too far; the player stays where it was.
    #[error("move of {distance:.2} units exceeds bound")]
    TooFar {
        /// Claimed horizontal distance.
        distance: f32,
        /// Position the client was corrected to.
        authoritative: Vec3,
    },
}

/// A client movement report.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveCommand {
    /// Claimed torso position
    pub position: Vec3,
    /// Claimed facing
    pub rotation: Quat,
    /// Client input sequence id
    pub input_sequence_id: u32,
    /// Held keys
    #[serde(default)]
    pub input_flags: InputFlags,
}

impl MoveCommand {
    /// Check shape and normalize the rotation.
    pub fn validate(mut self) -> Result<Self, MoveRejection> {
        if !self.position.is_finite() {
            return Err(MoveRejection::Malformed("position is not finite"));
        }
        if !self.rotation.is_finite() {
            return Err(MoveRejection::Malformed("rotation is not finite"));
        }
        if self.rotation.length_squared() < 1e-6 {
            return Err(MoveRejection::Malformed("rotation is zero"));
        }
        self.rotation = self.rotation.normalize();
        Ok(self)
    }
}

/// What happened to an applied move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveOutcome {
    /// Authoritative position after the move.
    pub position: Vec3,
    /// Whether a correction was sent.
    pub corrected: bool,
    /// False when the ground resolver refused the move.
    pub accepted: bool,
}

/// Applies client moves to a world.
#[derive(Clone, Copy, Debug, Default)]
pub struct MoveValidator {
    config: MoveConfig,
}

impl MoveValidator {
    /// Create a validator.
    pub fn new(config: MoveConfig) -> Self {
        Self { config }
    }

    /// Validate and apply one move.
    ///
    /// Malformed, stale, rate-limited and dead-player moves change nothing.
    /// Everything else updates the player, and a `PositionCorrection` event is
    /// queued when the authoritative position differs from the claim by more
    /// than the tolerance.
    pub fn process(
        &self,
        state: &mut WorldState,
        player_id: PlayerId,
        command: MoveCommand,
        now_ms: u64,
    ) -> Result<MoveOutcome, MoveRejection> {
        let command = command.validate()?;
        let cfg = &self.config;

        let player = state
            .players
            .get(&player_id)
            .ok_or(MoveRejection::UnknownPlayer(player_id))?;

        if player.is_dead {
            return Err(MoveRejection::PlayerDead);
        }

        if let Some(last) = player.last_move_time {
            if command.input_sequence_id <= player.last_processed_input {
                return Err(MoveRejection::StaleSequence {
                    sequence: command.input_sequence_id,
                    last: player.last_processed_input,
                });
            }
            let elapsed_ms = now_ms.saturating_sub(last);
            if elapsed_ms < cfg.min_interval_ms {
                return Err(MoveRejection::RateLimited { elapsed_ms });
            }
        }

        let current = player.position;
        let claimed = command.position;
        let distance = Vec3::new(claimed.x - current.x, 0.0, claimed.z - current.z).length();

        if distance > cfg.max_step {
            let tick = state.tick;
            if let Some(player) = state.players.get_mut(&player_id) {
                player.record_rejected_input(command.input_sequence_id, now_ms);
                let event = GameEvent::position_correction(tick, player);
                state.push_event(event);
            }
            return Err(MoveRejection::TooFar {
                distance,
                authoritative: current,
            });
        }

        // Scenery is tested at the authoritative height, not the claimed one
        let target = Vec3::new(claimed.x, current.y, claimed.z);
        let slide = state
            .collision
            .resolve_player_movement(current, target, cfg.player_radius);
        let mut resolution = state.ground.resolve_move(current, slide.position);

        if resolution.accepted
            && resolution.corrected != current
            && state.collision.is_blocked(resolution.corrected, cfg.player_radius)
        {
            debug!(player = %player_id, ?claimed, "Grounded position overlaps scenery");
            resolution = MoveResolution::rejected(current);
        }

        if !resolution.accepted {
            debug!(player = %player_id, ?claimed, "Move rejected by ground resolver");
        }

        let corrected = self.apply(state, player_id, resolution.corrected, &command, now_ms);

        Ok(MoveOutcome {
            position: resolution.corrected,
            corrected,
            accepted: resolution.accepted,
        })
    }

    /// Write the authoritative position and queue a correction if needed.
    fn apply(
        &self,
        state: &mut WorldState,
        player_id: PlayerId,
        position: Vec3,
        command: &MoveCommand,
        now_ms: u64,
    ) -> bool {
        let tick = state.tick;
        let Some(player) = state.players.get_mut(&player_id) else {
            return false;
        };

        player.update_position(
            position,
            command.rotation,
            command.input_flags,
            command.input_sequence_id,
            now_ms,
        );

        let corrected = position.distance(command.position) > self.config.correction_tolerance;
        if corrected {
            let event = GameEvent::position_correction(tick, player);
            state.push_event(event);
        }
        corrected
    }
}

// =============================================================================
// SHOOTING
// =============================================================================

/// Largest accepted gap between the claimed muzzle and the shooter.
pub const MAX_MUZZLE_OFFSET: f32 = 5.0;

/// A client shot request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootCommand {
    /// Loadout slot fired
    pub weapon_id: String,
    /// Claimed muzzle position
    pub position: Vec3,
    /// Aim direction
    pub direction: Vec3,
}

impl ShootCommand {
    /// Validate, pass the weapon gate and spawn the projectile.
    ///
    /// Accepted shots queue `ProjectileCreated`. Refusals the client should
    /// know about queue `ShotRejected`; unknown ids are only returned.
    pub fn process(
        &self,
        state: &mut WorldState,
        player_id: PlayerId,
        now_ms: u64,
    ) -> Result<ProjectileId, ShootError> {
        let result = self.fire(state, player_id, now_ms);

        if let Err(err) = &result {
            if err.is_reported() {
                let tick = state.tick;
                state.push_event(GameEvent::new(
                    tick,
                    GameEventData::ShotRejected {
                        player_id,
                        weapon_id: self.weapon_id.clone(),
                        code: err.code().to_string(),
                        message: err.to_string(),
                    },
                ));
            }
        }

        result
    }

    fn fire(&self, state: &mut WorldState, player_id: PlayerId, now_ms: u64) -> Result<ProjectileId, ShootError> {
        if !self.direction.is_finite() || self.direction.length_squared() < 1e-6 {
            return Err(ShootError::InvalidDirection);
        }
        if !self.position.is_finite() {
            return Err(ShootError::InvalidOrigin {
                distance: f32::INFINITY,
            });
        }

        let player = state
            .players
            .get(&player_id)
            .ok_or(ShootError::UnknownPlayer(player_id))?;
        if player.is_dead {
            return Err(ShootError::ShooterDead);
        }

        let distance = player.position.distance(self.position);
        if distance > MAX_MUZZLE_OFFSET {
            return Err(ShootError::InvalidOrigin { distance });
        }

        let weapon = state
            .weapons
            .authorize_shot(player_id, &self.weapon_id, now_ms)?;

        let tick = state.tick;
        let projectile = state
            .projectiles
            .spawn(player_id, self.position, self.direction, weapon, now_ms)
            .ok_or(ShootError::InvalidDirection)?;
        let id = projectile.id;
        let event = GameEvent::projectile_created(tick, projectile);
        state.push_event(event);

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::ground::TriangleMesh;
    use crate::game::scenery::{SceneryObject, StaticLayout};
    use crate::game::tick::WorldConfig;

    const RIDE: f32 = 2.1;

    fn world() -> (WorldState, PlayerId) {
        let layout = StaticLayout {
            objects: vec![SceneryObject::Wall {
                position: Vec3::new(0.0, 0.0, 10.0),
                size: Vec3::new(100.0, 6.0, 1.0),
                yaw: 0.0,
            }],
            ..StaticLayout::default()
        };
        let mut world = WorldState::new(WorldConfig::default(), TriangleMesh::flat_ground(100.0, 0.0), &layout).unwrap();
        let player = world.add_player_at("runner", Vec3::new(0.0, RIDE, 0.0), 0);
        (world, player)
    }

    fn move_to(position: Vec3, seq: u32) -> MoveCommand {
        MoveCommand {
            position,
            rotation: Quat::IDENTITY,
            input_sequence_id: seq,
            input_flags: InputFlags::FORWARD,
        }
    }

    #[test]
    fn test_valid_move_needs_no_correction() {
        let (mut world, id) = world();
        let validator = MoveValidator::default();

        let outcome = validator
            .process(&mut world, id, move_to(Vec3::new(1.0, RIDE, 1.0), 1), 100)
            .unwrap();
        assert!(!outcome.corrected);
        assert!(world.take_events().is_empty());

        let player = world.get_player(id).unwrap();
        assert_eq!(player.last_processed_input, 1);
        assert_eq!(player.last_active_time, 100);
    }

    #[test]
    fn test_wrong_height_is_corrected() {
        let (mut world, id) = world();
        let outcome = MoveValidator::default()
            .process(&mut world, id, move_to(Vec3::new(1.0, 9.0, 0.0), 1), 100)
            .unwrap();

        assert!(outcome.corrected);
        assert!((outcome.position.y - RIDE).abs() < 1e-4);

        let events = world.take_events();
        match &events[0].data {
            GameEventData::PositionCorrection {
                input_sequence_id, ..
            } => assert_eq!(*input_sequence_id, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_scenery_slide_produces_correction() {
        let (mut world, id) = world();
        world.get_player_mut(id).unwrap().position = Vec3::new(0.0, RIDE, 7.0);

        let outcome = MoveValidator::default()
            .process(&mut world, id, move_to(Vec3::new(1.0, RIDE, 9.0), 1), 100)
            .unwrap();
        assert!(outcome.corrected);
        assert_eq!(outcome.position.z, 7.0);
        assert_eq!(outcome.position.x, 1.0);
    }

    #[test]
    fn test_rate_limit_and_stale_sequence() {
        let (mut world, id) = world();
        let validator = MoveValidator::default();
        validator
            .process(&mut world, id, move_to(Vec3::new(0.5, RIDE, 0.0), 5), 100)
            .unwrap();

        assert_eq!(
            validator.process(&mut world, id, move_to(Vec3::new(0.6, RIDE, 0.0), 6), 105),
            Err(MoveRejection::RateLimited { elapsed_ms: 5 })
        );
        assert!(matches!(
            validator.process(&mut world, id, move_to(Vec3::new(0.6, RIDE, 0.0), 5), 200),
            Err(MoveRejection::StaleSequence { sequence: 5, last: 5 })
        ));
        assert_eq!(world.get_player(id).unwrap().position.x, 0.5);
    }

    #[test]
    fn test_teleport_is_bounded() {
        let (mut world, id) = world();
        let err = MoveValidator::default()
            .process(&mut world, id, move_to(Vec3::new(90.0, RIDE, 0.0), 1), 100)
            .unwrap_err();

        assert!(matches!(err, MoveRejection::TooFar { .. }));
        assert_eq!(world.get_player(id).unwrap().position, Vec3::new(0.0, RIDE, 0.0));
        assert_eq!(world.take_events().len(), 1);
    }

    #[test]
    fn test_elevated_claim_cannot_pass_wall() {
        let (mut world, id) = world();
        world.get_player_mut(id).unwrap().position = Vec3::new(0.0, RIDE, 8.0);

        // Higher than the wall top, landing inside its footprint
        let outcome = MoveValidator::default()
            .process(&mut world, id, move_to(Vec3::new(0.0, 50.0, 10.0), 1), 100)
            .unwrap();

        assert!(outcome.corrected);
        let player = world.get_player(id).unwrap();
        assert_eq!(player.position.z, 8.0);
        assert!((player.position.y - RIDE).abs() < 1e-4);
        assert!(!world.collision.is_blocked(player.position, MoveConfig::default().player_radius));
    }

    #[test]
    fn test_rejected_teleports_do_not_keep_player_active() {
        let (mut world, id) = world();
        let validator = MoveValidator::default();

        for (seq, now) in [(1, 10_000), (2, 20_000), (3, 29_000)] {
            let err = validator
                .process(&mut world, id, move_to(Vec3::new(90.0, RIDE, 0.0), seq), now)
                .unwrap_err();
            assert!(matches!(err, MoveRejection::TooFar { .. }));
        }

        let player = world.get_player(id).unwrap();
        assert_eq!(player.last_active_time, 0);
        assert_eq!(player.last_processed_input, 3);
        assert!(player.is_inactive(30_001, 30_000));

        let corrections = world.take_events();
        assert_eq!(corrections.len(), 3);
        match &corrections[2].data {
            GameEventData::PositionCorrection {
                position,
                input_sequence_id,
                ..
            } => {
                assert_eq!(*position, Vec3::new(0.0, RIDE, 0.0));
                assert_eq!(*input_sequence_id, 3);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_malformed_move_changes_nothing() {
        let (mut world, id) = world();
        let mut command = move_to(Vec3::new(f32::NAN, 0.0, 0.0), 1);
        assert!(matches!(
            MoveValidator::default().process(&mut world, id, command, 100),
            Err(MoveRejection::Malformed(_))
        ));

        command.position = Vec3::ZERO;
        command.rotation = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        assert!(matches!(
            MoveValidator::default().process(&mut world, id, command, 100),
            Err(MoveRejection::Malformed(_))
        ));
        assert!(world.take_events().is_empty());
    }

    #[test]
    fn test_shot_spawns_projectile() {
        let (mut world, id) = world();
        let shot = ShootCommand {
            weapon_id: "cannon".into(),
            position: Vec3::new(0.0, RIDE, 0.5),
            direction: Vec3::X,
        };

        let projectile = shot.process(&mut world, id, 1_000).unwrap();
        assert_eq!(world.projectiles.len(), 1);
        assert!(world.projectiles.get(projectile).is_some());

        let events = world.take_events();
        assert!(matches!(events[0].data, GameEventData::ProjectileCreated { .. }));

        // Cooldown answered with a rejection event
        assert!(matches!(
            shot.process(&mut world, id, 1_100),
            Err(ShootError::OnCooldown { .. })
        ));
        let events = world.take_events();
        assert!(matches!(
            &events[0].data,
            GameEventData::ShotRejected { code, .. } if code == "cooldown"
        ));
    }

    #[test]
    fn test_shot_rejections() {
        let (mut world, id) = world();
        let far = ShootCommand {
            weapon_id: "cannon".into(),
            position: Vec3::new(30.0, RIDE, 0.0),
            direction: Vec3::X,
        };
        assert!(matches!(
            far.process(&mut world, id, 0),
            Err(ShootError::InvalidOrigin { .. })
        ));

        // Unknown weapon is only logged
        let unknown = ShootCommand {
            weapon_id: "railgun".into(),
            position: Vec3::new(0.0, RIDE, 0.0),
            direction: Vec3::X,
        };
        world.take_events();
        assert!(matches!(
            unknown.process(&mut world, id, 0),
            Err(ShootError::UnknownWeapon(_))
        ));
        assert!(world.take_events().is_empty());
        assert!(world.projectiles.is_empty());
    }

    #[test]
    fn test_input_flags() {
        let flags = InputFlags::FORWARD.with(InputFlags::LEFT);
        assert!(flags.contains(InputFlags::FORWARD));
        assert!(flags.contains(InputFlags::LEFT));
        assert!(!flags.contains(InputFlags::JUMP));
    }
}
