//! Projectile Ballistics
//!
//! Constant-velocity projectiles with swept hit tests. Each tick a projectile
//! moves along its direction and the whole segment it covered is tested, so a
//! fast round cannot pass through a target between two samples.

use std::collections::BTreeMap;

use glam::Vec3;
use serde::{Deserialize, Serialize};
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::primitives::{segment_sphere_intersection, Sphere, RAY_EPSILON};
use crate::game::collision::{CollisionEngine, ColliderId};
use crate::game::state::{PlayerId, PlayerState};
use crate::game::weapon::{Ballistics, WeaponType};

// =============================================================================
// HIT CAPSULE
// =============================================================================

/// Offsets and radii of the four hit spheres, relative to the torso centre.
const CAPSULE_PARTS: [(Vec3, f32); 4] = [
    // Head
    (Vec3::new(0.0, 1.4, 0.0), 0.6),
    // Torso
    (Vec3::new(0.0, 0.0, 0.0), 1.0),
    // Legs
    (Vec3::new(0.0, -1.2, 0.0), 0.9),
    // Cockpit
    (Vec3::new(0.0, 0.8, 0.0), 0.7),
];

/// Compound player hit shape, derived from position on demand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HitCapsule {
    /// Head, torso, legs, cockpit.
    pub spheres: [Sphere; 4],
}

impl HitCapsule {
    /// Capsule for a player whose torso is at `position`.
    pub fn around(position: Vec3) -> Self {
        Self {
            spheres: CAPSULE_PARTS.map(|(offset, radius)| Sphere::new(position + offset, radius)),
        }
    }

    /// First contact of a swept sphere of radius `inflate` along `start -> end`.
    ///
    /// Returns the distance from `start`.
    pub fn sweep(&self, start: Vec3, end: Vec3, inflate: f32) -> Option<f32> {
        self.spheres
            .iter()
            .filter_map(|s| segment_sphere_intersection(start, end, s.center, s.radius + inflate))
            .min_by(f32::total_cmp)
    }
}

// =============================================================================
// PROJECTILE
// =============================================================================

/// Projectile identifier, monotonic per world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectileId(pub u64);

/// A live projectile.
#[derive(Clone, Debug, PartialEq)]
pub struct Projectile {
    /// Id
    pub id: ProjectileId,
    /// Shooter
    pub owner: PlayerId,
    /// Muzzle position
    pub origin: Vec3,
    /// Current position
    pub position: Vec3,
    /// Position before the last advance
    pub prev_position: Vec3,
    /// Unit direction
    pub direction: Vec3,
    /// Weapon fired
    pub weapon: WeaponType,
    /// Ballistics of that weapon
    pub ballistics: Ballistics,
    /// Cumulative travel
    pub distance_traveled: f32,
    /// Spawn time
    pub spawn_time: u64,
    /// False once hit or expired
    pub active: bool,
}

impl Projectile {
    /// Whether the age limit is reached.
    pub fn lifetime_elapsed(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.spawn_time) >= self.ballistics.lifetime_ms
    }

    /// Whether the range limit is reached.
    pub fn range_exhausted(&self) -> bool {
        self.distance_traveled >= self.ballistics.max_range
    }
}

/// What a projectile struck.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HitTarget {
    /// A player's hit capsule.
    Player(PlayerId),
    /// Static scenery.
    Scenery(ColliderId),
}

/// How a projectile left the live set.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectileOutcome {
    /// Struck something; `projectile.position` is the contact point.
    Hit {
        /// Removed projectile.
        projectile: Projectile,
        /// What it struck.
        target: HitTarget,
        /// Total travel from the muzzle to the contact point.
        hit_distance: f32,
    },
    /// Ran out of range or lifetime.
    Expired {
        /// Removed projectile.
        projectile: Projectile,
    },
}

impl ProjectileOutcome {
    /// The removed projectile.
    pub fn projectile(&self) -> &Projectile {
        match self {
            ProjectileOutcome::Hit { projectile, .. } => projectile,
            ProjectileOutcome::Expired { projectile } => projectile,
        }
    }
}

/// Result of [`ProjectileSystem::advance`].
#[derive(Clone, Debug, Default)]
pub struct AdvanceResult {
    /// Projectiles still flying, with their new positions.
    pub still_active: Vec<(ProjectileId, Vec3)>,
    /// Projectiles removed this advance, in id order.
    pub expired: Vec<ProjectileOutcome>,
}

/// Owns every live projectile of a world.
#[derive(Clone, Debug)]
pub struct ProjectileSystem {
    live: BTreeMap<ProjectileId, Projectile>,
    next_id: u64,
}

impl Default for ProjectileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectileSystem {
    /// Empty system.
    pub fn new() -> Self {
        Self {
            live: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Number of live projectiles.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Look up a live projectile.
    pub fn get(&self, id: ProjectileId) -> Option<&Projectile> {
        self.live.get(&id)
    }

    /// Iterate live projectiles in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Projectile> {
        self.live.values()
    }

    /// Fire a projectile. `direction` is normalized here.
    ///
    /// Returns `None` for a zero or non-finite direction.
    pub fn spawn(
        &mut self,
        owner: PlayerId,
        origin: Vec3,
        direction: Vec3,
        weapon: WeaponType,
        now_ms: u64,
    ) -> Option<&Projectile> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO || !origin.is_finite() {
            return None;
        }

        let id = ProjectileId(self.next_id);
        self.next_id += 1;

        let projectile = Projectile {
            id,
            owner,
            origin,
            position: origin,
            prev_position: origin,
            direction,
            weapon,
            ballistics: weapon.ballistics(),
            distance_traveled: 0.0,
            spawn_time: now_ms,
            active: true,
        };

        Some(self.live.entry(id).or_insert(projectile))
    }

    /// Move every projectile by `dt` seconds and resolve hits and expiry.
    ///
    /// The swept segment is tested against the capsule of every living player
    /// other than the shooter, and against scenery. The closest contact wins
    /// and the projectile stops there. Without a contact, it expires once its
    /// range or lifetime is used up. Removed projectiles leave the live set
    /// before this returns.
    pub fn advance(
        &mut self,
        dt: f32,
        now_ms: u64,
        players: &BTreeMap<PlayerId, PlayerState>,
        scenery: &CollisionEngine,
    ) -> AdvanceResult {
        let mut result = AdvanceResult::default();
        let mut removed = Vec::new();

        for projectile in self.live.values_mut() {
            let remaining = (projectile.ballistics.max_range - projectile.distance_traveled).max(0.0);
            let step = (projectile.ballistics.speed * dt).min(remaining);

            let start = projectile.position;
            let end = start + projectile.direction * step;
            projectile.prev_position = start;

            if let Some((target, along)) = nearest_contact(projectile, start, end, players, scenery) {
                projectile.position = start + projectile.direction * along;
                projectile.distance_traveled += along;
                projectile.active = false;

                #[cfg(feature = "debug-tracing")]
                trace!(id = projectile.id.0, ?target, along, "Projectile contact");

                result.expired.push(ProjectileOutcome::Hit {
                    projectile: projectile.clone(),
                    target,
                    hit_distance: projectile.distance_traveled,
                });
                removed.push(projectile.id);
                continue;
            }

            projectile.position = end;
            projectile.distance_traveled += step;

            if projectile.range_exhausted() || projectile.lifetime_elapsed(now_ms) {
                projectile.active = false;
                result.expired.push(ProjectileOutcome::Expired {
                    projectile: projectile.clone(),
                });
                removed.push(projectile.id);
                continue;
            }

            result.still_active.push((projectile.id, projectile.position));
        }

        for id in removed {
            self.live.remove(&id);
        }

        result
    }
}

/// Closest player or scenery contact along `start -> end`.
fn nearest_contact(
    projectile: &Projectile,
    start: Vec3,
    end: Vec3,
    players: &BTreeMap<PlayerId, PlayerState>,
    scenery: &CollisionEngine,
) -> Option<(HitTarget, f32)> {
    let radius = projectile.ballistics.radius;

    let player_hit = players
        .values()
        .filter(|p| p.id != projectile.owner && p.is_alive())
        .filter_map(|p| {
            p.hit_capsule()
                .sweep(start, end, radius)
                .map(|t| (HitTarget::Player(p.id), t))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1));

    let length = start.distance(end);
    let scenery_hit = if length > RAY_EPSILON {
        scenery
            .raycast_nearest(start, projectile.direction, length)
            .map(|hit| (HitTarget::Scenery(hit.collider), hit.distance))
    } else {
        None
    };

    match (player_hit, scenery_hit) {
        (Some(p), Some(s)) => Some(if s.1 < p.1 { s } else { p }),
        (p, s) => p.or(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::primitives::Cuboid;
    use crate::game::collision::ColliderKind;

    const DT: f32 = 1.0 / 60.0;

    fn players(positions: &[(u32, Vec3)]) -> BTreeMap<PlayerId, PlayerState> {
        positions
            .iter()
            .map(|(id, pos)| (PlayerId(*id), PlayerState::new(PlayerId(*id), "p", *pos, 200, 0)))
            .collect()
    }

    fn tick_ms(tick: u64) -> u64 {
        tick * 1000 / 60
    }

    #[test]
    fn test_capsule_sweep_picks_nearest_sphere() {
        let capsule = HitCapsule::around(Vec3::new(10.0, 0.0, 0.0));
        let t = capsule.sweep(Vec3::ZERO, Vec3::new(20.0, 0.0, 0.0), 0.0).unwrap();
        // Torso surface
        assert!((t - 9.0).abs() < 1e-4);

        assert!(capsule
            .sweep(Vec3::new(0.0, 5.0, 0.0), Vec3::new(20.0, 5.0, 0.0), 0.0)
            .is_none());
    }

    #[test]
    fn test_cannon_hit_on_second_tick() {
        let mut system = ProjectileSystem::new();
        let scenery = CollisionEngine::default();
        let targets = players(&[(1, Vec3::ZERO), (2, Vec3::new(10.0, 0.0, 0.0))]);

        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::Cannon, 0);

        let first = system.advance(DT, tick_ms(1), &targets, &scenery);
        assert!(first.expired.is_empty());
        assert!((first.still_active[0].1.x - 5.0).abs() < 1e-4);

        let second = system.advance(DT, tick_ms(2), &targets, &scenery);
        assert_eq!(second.expired.len(), 1);
        match &second.expired[0] {
            ProjectileOutcome::Hit {
                projectile,
                target,
                hit_distance,
            } => {
                assert_eq!(*target, HitTarget::Player(PlayerId(2)));
                assert!((projectile.position.x - 8.85).abs() < 1e-3);
                assert!((hit_distance - 8.85).abs() < 1e-3);
                assert!(!projectile.active);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        assert!(system.is_empty());
    }

    #[test]
    fn test_fast_projectile_does_not_tunnel() {
        let mut system = ProjectileSystem::new();
        let scenery = CollisionEngine::default();
        let targets = players(&[(1, Vec3::ZERO), (2, Vec3::new(10.0, 0.0, 0.0))]);

        // 400 units/s: 6.67 units per tick, wider than the torso
        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::MachineGun, 0);

        let mut hits = 0;
        let mut hit_tick = 0;
        for tick in 1..=10 {
            let result = system.advance(DT, tick_ms(tick), &targets, &scenery);
            for outcome in &result.expired {
                if matches!(outcome, ProjectileOutcome::Hit { .. }) {
                    hits += 1;
                    hit_tick = tick;
                }
            }
        }
        assert_eq!(hits, 1);
        assert_eq!(hit_tick, 2);
    }

    #[test]
    fn test_owner_and_dead_players_are_not_targets() {
        let mut system = ProjectileSystem::new();
        let scenery = CollisionEngine::default();
        let mut targets = players(&[(1, Vec3::new(3.0, 0.0, 0.0)), (2, Vec3::new(6.0, 0.0, 0.0))]);
        targets.get_mut(&PlayerId(2)).unwrap().is_dead = true;

        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::Cannon, 0);
        for tick in 1..=4 {
            let result = system.advance(DT, tick_ms(tick), &targets, &scenery);
            assert!(result.expired.is_empty());
        }
    }

    #[test]
    fn test_scenery_blocks_before_player() {
        let mut system = ProjectileSystem::new();
        let mut scenery = CollisionEngine::default();
        scenery.register(
            Cuboid::axis_aligned(Vec3::new(7.0, 0.0, 0.0), Vec3::new(0.5, 5.0, 5.0)),
            ColliderKind::Wall,
        );
        let targets = players(&[(1, Vec3::ZERO), (2, Vec3::new(10.0, 0.0, 0.0))]);

        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::Cannon, 0);
        system.advance(DT, tick_ms(1), &targets, &scenery);
        let result = system.advance(DT, tick_ms(2), &targets, &scenery);

        match &result.expired[0] {
            ProjectileOutcome::Hit { projectile, target, .. } => {
                assert!(matches!(target, HitTarget::Scenery(_)));
                assert!((projectile.position.x - 6.5).abs() < 1e-3);
            }
            other => panic!("expected scenery hit, got {other:?}"),
        }
    }

    #[test]
    fn test_lifetime_expiry_by_deadline_tick() {
        let mut system = ProjectileSystem::new();
        let scenery = CollisionEngine::default();
        let targets = BTreeMap::new();

        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::MachineGun, 0);
        let lifetime = WeaponType::MachineGun.ballistics().lifetime_ms;
        let deadline = (lifetime * 60).div_ceil(1000);

        let mut expired_at = None;
        for tick in 1..=deadline {
            let result = system.advance(DT, tick * 1000 / 60 + 1, &targets, &scenery);
            if !result.expired.is_empty() {
                assert!(matches!(result.expired[0], ProjectileOutcome::Expired { .. }));
                expired_at = Some(tick);
                break;
            }
        }
        assert!(expired_at.is_some_and(|t| t <= deadline));
        assert!(system.is_empty());

        // Age alone is enough
        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::X, WeaponType::Rocket, 0);
        let result = system.advance(DT, 60_000, &targets, &scenery);
        assert!(matches!(result.expired[0], ProjectileOutcome::Expired { .. }));
    }

    #[test]
    fn test_range_expiry_clamps_travel() {
        let mut system = ProjectileSystem::new();
        let scenery = CollisionEngine::default();
        let targets = BTreeMap::new();

        system.spawn(PlayerId(1), Vec3::ZERO, Vec3::Z, WeaponType::Default, 0);
        let range = WeaponType::Default.ballistics().max_range;

        let mut outcome = None;
        for tick in 1..=200 {
            let mut result = system.advance(DT, tick_ms(tick), &targets, &scenery);
            if let Some(o) = result.expired.pop() {
                outcome = Some(o);
                break;
            }
        }

        let projectile = outcome.unwrap().projectile().clone();
        assert!((projectile.distance_traveled - range).abs() < 1e-2);
        assert!(projectile.position.z <= range + 1e-2);
    }

    #[test]
    fn test_spawn_rejects_zero_direction() {
        let mut system = ProjectileSystem::new();
        assert!(system
            .spawn(PlayerId(1), Vec3::ZERO, Vec3::ZERO, WeaponType::Cannon, 0)
            .is_none());
        let first = system
            .spawn(PlayerId(1), Vec3::ZERO, Vec3::new(0.0, 0.0, 3.0), WeaponType::Cannon, 0)
            .map(|p| (p.id, p.direction));
        assert_eq!(first, Some((ProjectileId(1), Vec3::Z)));
    }
}
