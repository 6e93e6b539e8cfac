//! Collision Engine
//!
//! Static scenery colliders bucketed in a [`SpatialGrid`]. Answers
//! player-vs-scenery overlap and nearest-hit raycasts, and resolves blocked
//! movement with a cheap axis slide.
//!
//! Queries run in two phases: grid cells give candidate ids, each candidate's
//! bounding box rejects the obvious misses, and only then is the exact shape
//! tested.

use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::primitives::{Aabb, Primitive, Shape};
use crate::game::grid::{GridConfig, RayCell, SpatialGrid};

// =============================================================================
// TYPES
// =============================================================================

/// Registered collider handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColliderId(pub u32);

/// What a collider represents in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColliderKind {
    /// Tree trunk.
    Tree,
    /// Boulder.
    Rock,
    /// Building footprint.
    Building,
    /// Arena boundary or interior wall.
    Wall,
    /// Small obstacle.
    Crate,
}

/// A registered static collider.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Collider {
    /// Handle.
    pub id: ColliderId,
    /// Type tag.
    pub kind: ColliderKind,
    /// Exact shape.
    pub shape: Shape,
    /// Bounds computed at registration, never changed afterwards.
    pub bounds: Aabb,
}

/// A collider overlapping a query sphere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlapHit {
    /// Collider handle.
    pub collider: ColliderId,
    /// Collider type.
    pub kind: ColliderKind,
}

/// Nearest scenery hit along a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SceneryHit {
    /// Collider handle.
    pub collider: ColliderId,
    /// Collider type.
    pub kind: ColliderKind,
    /// Distance along the ray.
    pub distance: f32,
    /// World hit point.
    pub point: Vec3,
    /// Surface normal at the hit.
    pub normal: Vec3,
}

/// How a movement request was resolved against scenery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlideOutcome {
    /// Desired position was clear.
    Clear,
    /// Blocked; kept the X component only.
    SlideX,
    /// Blocked; kept the Z component only.
    SlideZ,
    /// Blocked on both axes; stayed put.
    Blocked,
}

/// Result of [`CollisionEngine::resolve_player_movement`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MovementResolution {
    /// Position the player ends up at.
    pub position: Vec3,
    /// Which branch produced it.
    pub outcome: SlideOutcome,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Per-world collision engine.
#[derive(Clone, Debug)]
pub struct CollisionEngine {
    grid: SpatialGrid,
    colliders: BTreeMap<ColliderId, Collider>,
    next_id: u32,
}

impl CollisionEngine {
    /// Create an empty engine.
    pub fn new(config: GridConfig) -> Self {
        Self {
            grid: SpatialGrid::new(config),
            colliders: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Number of registered colliders.
    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    /// Underlying grid.
    pub fn grid(&self) -> &SpatialGrid {
        &self.grid
    }

    /// Register a static collider and return its handle.
    pub fn register(&mut self, shape: impl Into<Shape>, kind: ColliderKind) -> ColliderId {
        let shape = shape.into();
        let id = ColliderId(self.next_id);
        self.next_id += 1;

        let bounds = shape.aabb();
        self.grid.insert(id, &bounds);
        self.colliders.insert(
            id,
            Collider {
                id,
                kind,
                shape,
                bounds,
            },
        );

        id
    }

    /// Remove a collider. Returns it if it was registered.
    pub fn unregister(&mut self, id: ColliderId) -> Option<Collider> {
        let collider = self.colliders.remove(&id)?;
        self.grid.remove(id, &collider.bounds);
        Some(collider)
    }

    /// Remove every collider. Handles are not reused.
    pub fn clear(&mut self) {
        self.colliders.clear();
        self.grid.clear();
    }

    /// Look up a collider.
    pub fn get(&self, id: ColliderId) -> Option<&Collider> {
        self.colliders.get(&id)
    }

    /// Iterate colliders in handle order.
    pub fn colliders(&self) -> impl Iterator<Item = &Collider> {
        self.colliders.values()
    }

    /// Candidate colliders near `(x, z)`.
    pub fn query_nearby(&self, x: f32, z: f32, radius: f32) -> Vec<&Collider> {
        self.grid
            .query_nearby(x, z, radius)
            .into_iter()
            .filter_map(|id| self.colliders.get(&id))
            .collect()
    }

    /// Grid cells a ray crosses, in traversal order.
    pub fn query_ray_cells(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayCell> {
        let direction = direction.normalize_or_zero();
        self.grid.query_ray_cells(origin, direction, max_distance)
    }

    /// Colliders overlapping the sphere at `position`.
    pub fn check_overlap(&self, position: Vec3, radius: f32) -> Vec<OverlapHit> {
        self.query_nearby(position.x, position.z, radius)
            .into_iter()
            .filter(|c| c.bounds.intersects_sphere(position, radius))
            .filter(|c| c.shape.intersects_sphere(position, radius))
            .map(|c| OverlapHit {
                collider: c.id,
                kind: c.kind,
            })
            .collect()
    }

    /// Whether the sphere at `position` touches any collider.
    pub fn is_blocked(&self, position: Vec3, radius: f32) -> bool {
        !self.check_overlap(position, radius).is_empty()
    }

    /// Nearest collider hit along a ray.
    ///
    /// Cells are visited in the order the ray enters them. Once the best hit
    /// lies within the current cell's exit distance, no collider in a later
    /// cell can be closer and the walk stops.
    pub fn raycast_nearest(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<SceneryHit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }

        let mut tested = BTreeSet::new();
        let mut best: Option<SceneryHit> = None;

        for cell in self.grid.query_ray_cells(origin, direction, max_distance) {
            for id in self.grid.ids_in(cell.key) {
                if !tested.insert(*id) {
                    continue;
                }
                let Some(collider) = self.colliders.get(id) else {
                    continue;
                };

                let range = best.map_or(max_distance, |b| b.distance);
                if collider
                    .bounds
                    .ray_intersection(origin, direction, range)
                    .is_none()
                {
                    continue;
                }

                if let Some(hit) = collider.shape.intersect_ray(origin, direction, range) {
                    if best.map_or(true, |b| hit.distance < b.distance) {
                        best = Some(SceneryHit {
                            collider: collider.id,
                            kind: collider.kind,
                            distance: hit.distance,
                            point: hit.point,
                            normal: hit.normal,
                        });
                    }
                }
            }

            if best.map_or(false, |b| b.distance <= cell.t_exit) {
                break;
            }
        }

        best
    }

    /// Whether nothing blocks the straight line between two points.
    pub fn line_of_sight(&self, from: Vec3, to: Vec3) -> bool {
        let delta = to - from;
        let distance = delta.length();
        if distance <= f32::EPSILON {
            return true;
        }
        self.raycast_nearest(from, delta / distance, distance).is_none()
    }

    /// Resolve a player sphere moving from `current` to `desired`.
    ///
    /// Tries the full move, then an X-only slide, then a Z-only slide, and
    /// otherwise cancels the move. Concave corners can still catch a player.
    pub fn resolve_player_movement(
        &self,
        current: Vec3,
        desired: Vec3,
        radius: f32,
    ) -> MovementResolution {
        if !self.is_blocked(desired, radius) {
            return MovementResolution {
                position: desired,
                outcome: SlideOutcome::Clear,
            };
        }

        let slide_x = Vec3::new(desired.x, desired.y, current.z);
        if !self.is_blocked(slide_x, radius) {
            return MovementResolution {
                position: slide_x,
                outcome: SlideOutcome::SlideX,
            };
        }

        let slide_z = Vec3::new(current.x, desired.y, desired.z);
        if !self.is_blocked(slide_z, radius) {
            return MovementResolution {
                position: slide_z,
                outcome: SlideOutcome::SlideZ,
            };
        }

        MovementResolution {
            position: current,
            outcome: SlideOutcome::Blocked,
        }
    }
}

impl Default for CollisionEngine {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::primitives::{Cuboid, Cylinder, Sphere};
    use proptest::prelude::*;

    fn engine() -> CollisionEngine {
        let mut engine = CollisionEngine::default();
        engine.register(Cylinder::standing(Vec3::new(20.0, 0.0, 0.0), 1.0, 8.0), ColliderKind::Tree);
        engine.register(Sphere::new(Vec3::new(40.0, 1.0, 0.0), 2.0), ColliderKind::Rock);
        engine.register(
            Cuboid::axis_aligned(Vec3::new(0.0, 5.0, 40.0), Vec3::new(10.0, 5.0, 2.0)),
            ColliderKind::Building,
        );
        engine
    }

    #[test]
    fn test_register_and_unregister() {
        let mut engine = engine();
        assert_eq!(engine.len(), 3);

        let id = engine.register(Sphere::new(Vec3::new(-50.0, 0.0, -50.0), 1.0), ColliderKind::Rock);
        assert_eq!(engine.get(id).map(|c| c.kind), Some(ColliderKind::Rock));
        assert!(engine.is_blocked(Vec3::new(-50.0, 0.0, -50.0), 0.5));

        assert!(engine.unregister(id).is_some());
        assert!(engine.get(id).is_none());
        assert!(!engine.is_blocked(Vec3::new(-50.0, 0.0, -50.0), 0.5));
        assert!(engine.unregister(id).is_none());
    }

    #[test]
    fn test_overlap_runs_narrow_phase() {
        let engine = engine();

        // Inside the tree's bounding box corner but outside the trunk itself
        assert!(engine.check_overlap(Vec3::new(20.9, 2.0, 0.9), 0.1).is_empty());

        let hits = engine.check_overlap(Vec3::new(21.5, 2.0, 0.0), 0.6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].kind, ColliderKind::Tree);
    }

    #[test]
    fn test_raycast_nearest_picks_closest() {
        let engine = engine();

        let hit = engine
            .raycast_nearest(Vec3::new(0.0, 1.0, 0.0), Vec3::X, 100.0)
            .unwrap();
        assert_eq!(hit.kind, ColliderKind::Tree);
        assert!((hit.distance - 19.0).abs() < 1e-4);

        // Passing beside the trunk, the rock is next
        let hit = engine
            .raycast_nearest(Vec3::new(0.0, 1.0, 1.5), Vec3::X, 100.0)
            .unwrap();
        assert_eq!(hit.kind, ColliderKind::Rock);
        assert!((hit.distance - (40.0 - 1.75f32.sqrt())).abs() < 1e-3);

        let hit = engine
            .raycast_nearest(Vec3::new(0.0, 1.0, 5.0), Vec3::Z, 100.0)
            .unwrap();
        assert_eq!(hit.kind, ColliderKind::Building);
        assert!((hit.distance - 33.0).abs() < 1e-4);

        assert!(engine
            .raycast_nearest(Vec3::new(0.0, 1.0, 0.0), Vec3::X, 10.0)
            .is_none());
    }

    #[test]
    fn test_raycast_large_collider_found_from_far_cell() {
        let mut engine = CollisionEngine::default();
        // Spans many cells; registered in all of them
        engine.register(
            Cuboid::axis_aligned(Vec3::new(100.0, 5.0, 0.0), Vec3::new(2.0, 5.0, 60.0)),
            ColliderKind::Wall,
        );
        let hit = engine
            .raycast_nearest(Vec3::new(0.0, 1.0, 50.0), Vec3::X, 200.0)
            .unwrap();
        assert!((hit.distance - 98.0).abs() < 1e-3);
    }

    #[test]
    fn test_line_of_sight() {
        let engine = engine();
        assert!(!engine.line_of_sight(Vec3::new(0.0, 1.0, 0.0), Vec3::new(30.0, 1.0, 0.0)));
        assert!(engine.line_of_sight(Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 30.0)));
    }

    #[test]
    fn test_wall_slide_order() {
        let mut engine = CollisionEngine::default();
        // Wall along the X axis at z = 5
        engine.register(
            Cuboid::axis_aligned(Vec3::new(0.0, 2.0, 5.0), Vec3::new(50.0, 2.0, 0.5)),
            ColliderKind::Wall,
        );

        let current = Vec3::new(0.0, 1.0, 3.0);

        // Diagonal into the wall keeps the X component
        let resolved = engine.resolve_player_movement(current, Vec3::new(1.0, 1.0, 4.0), 1.0);
        assert_eq!(resolved.outcome, SlideOutcome::SlideX);
        assert_eq!(resolved.position, Vec3::new(1.0, 1.0, 3.0));

        // Free movement away from the wall
        let resolved = engine.resolve_player_movement(current, Vec3::new(0.0, 1.0, 2.0), 1.0);
        assert_eq!(resolved.outcome, SlideOutcome::Clear);
    }

    #[test]
    fn test_slide_z_then_cancel() {
        let mut engine = CollisionEngine::default();
        // Wall along the Z axis at x = 5
        engine.register(
            Cuboid::axis_aligned(Vec3::new(5.0, 2.0, 0.0), Vec3::new(0.5, 2.0, 50.0)),
            ColliderKind::Wall,
        );

        let current = Vec3::new(3.0, 1.0, 0.0);
        let resolved = engine.resolve_player_movement(current, Vec3::new(4.0, 1.0, 1.0), 1.0);
        assert_eq!(resolved.outcome, SlideOutcome::SlideZ);
        assert_eq!(resolved.position, Vec3::new(3.0, 1.0, 1.0));

        // Add a second wall to close the corner
        engine.register(
            Cuboid::axis_aligned(Vec3::new(0.0, 2.0, 2.0), Vec3::new(50.0, 2.0, 0.5)),
            ColliderKind::Wall,
        );
        let resolved = engine.resolve_player_movement(current, Vec3::new(4.0, 1.0, 1.0), 1.0);
        assert_eq!(resolved.outcome, SlideOutcome::Blocked);
        assert_eq!(resolved.position, current);
    }

    proptest! {
        #[test]
        fn prop_overlap_round_trip(
            x in -500.0f32..500.0,
            z in -500.0f32..500.0,
            radius in 0.1f32..20.0,
            query in 0.01f32..5.0,
        ) {
            let mut engine = CollisionEngine::default();
            let center = Vec3::new(x, 0.0, z);
            let id = engine.register(Sphere::new(center, radius), ColliderKind::Rock);

            let hits = engine.check_overlap(center, query);
            prop_assert!(hits.iter().any(|h| h.collider == id));

            let far = center + Vec3::new(radius + query + 1.0, 0.0, 0.0);
            let hits = engine.check_overlap(far, query);
            prop_assert!(hits.is_empty());
        }
    }
}
