//! Ground Resolver
//!
//! Authoritative ground snapping against the baked world mesh. Independent of
//! the scenery grid: the mesh is a static triangle soup loaded once, and every
//! query is a Möller–Trumbore raycast against it.
//!
//! Player positions are torso centres. The footing under a player is
//! `position.y - ride_height`.

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::primitives::{RayHit, RAY_EPSILON};

// =============================================================================
// ERRORS
// =============================================================================

/// Mesh loading and validation failures.
#[derive(Debug, Error)]
pub enum MeshError {
    /// Mesh file could not be read.
    #[error("failed to read mesh: {0}")]
    Io(#[from] std::io::Error),

    /// Mesh file is not valid JSON.
    #[error("failed to parse mesh: {0}")]
    Json(#[from] serde_json::Error),

    /// Flat vertex buffer length is not a multiple of 3.
    #[error("vertex buffer length {0} is not a multiple of 3")]
    VertexCount(usize),

    /// Index buffer length is not a multiple of 3.
    #[error("index buffer length {0} is not a multiple of 3")]
    IndexCount(usize),

    /// Index references a missing vertex.
    #[error("index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index.
        index: u32,
        /// Number of vertices.
        vertex_count: usize,
    },

    /// A vertex coordinate is NaN or infinite.
    #[error("vertex {0} is not finite")]
    NonFinite(usize),
}

// =============================================================================
// MESH
// =============================================================================

/// On-disk mesh layout: flat `[x, y, z, ...]` vertices and triangle indices.
#[derive(Debug, Deserialize, Serialize)]
struct MeshFile {
    vertices: Vec<f32>,
    indices: Vec<u32>,
}

/// Static triangle soup.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Build and validate a mesh.
    pub fn new(vertices: Vec<Vec3>, indices: Vec<u32>) -> Result<Self, MeshError> {
        if indices.len() % 3 != 0 {
            return Err(MeshError::IndexCount(indices.len()));
        }
        if let Some(i) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(MeshError::NonFinite(i));
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(MeshError::IndexOutOfRange {
                index,
                vertex_count: vertices.len(),
            });
        }

        let triangles = indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();

        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Parse the JSON mesh format.
    pub fn from_json_str(json: &str) -> Result<Self, MeshError> {
        let file: MeshFile = serde_json::from_str(json)?;
        if file.vertices.len() % 3 != 0 {
            return Err(MeshError::VertexCount(file.vertices.len()));
        }
        let vertices = file
            .vertices
            .chunks_exact(3)
            .map(|v| Vec3::new(v[0], v[1], v[2]))
            .collect();
        Self::new(vertices, file.indices)
    }

    /// Load a JSON mesh from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MeshError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Square flat floor centred on the origin at height `y`.
    pub fn flat_ground(half_extent: f32, y: f32) -> Self {
        let h = half_extent.abs();
        Self {
            vertices: vec![
                Vec3::new(-h, y, -h),
                Vec3::new(h, y, -h),
                Vec3::new(h, y, h),
                Vec3::new(-h, y, h),
            ],
            triangles: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    /// Number of triangles.
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest triangle hit within `max_distance`.
    pub fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let direction = direction.normalize_or_zero();
        if direction == Vec3::ZERO {
            return None;
        }

        let mut best: Option<RayHit> = None;
        for [a, b, c] in &self.triangles {
            let v0 = self.vertices[*a as usize];
            let v1 = self.vertices[*b as usize];
            let v2 = self.vertices[*c as usize];
            let range = best.map_or(max_distance, |hit| hit.distance);

            if let Some(t) = ray_triangle_intersection(origin, direction, range, v0, v1, v2) {
                let mut normal = (v1 - v0).cross(v2 - v0).normalize_or_zero();
                if normal.dot(direction) > 0.0 {
                    normal = -normal;
                }
                best = Some(RayHit {
                    distance: t,
                    point: origin + direction * t,
                    normal,
                });
            }
        }
        best
    }
}

/// Möller–Trumbore ray/triangle test. Returns the hit distance.
pub fn ray_triangle_intersection(
    origin: Vec3,
    direction: Vec3,
    max_distance: f32,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
) -> Option<f32> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;
    let h = direction.cross(edge2);
    let a = edge1.dot(h);

    // Parallel
    if a.abs() < RAY_EPSILON {
        return None;
    }

    let f = 1.0 / a;
    let s = origin - v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    (t > RAY_EPSILON && t <= max_distance).then_some(t)
}

// =============================================================================
// RESOLVER
// =============================================================================

/// Ground resolver tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroundConfig {
    /// Largest footing change accepted in one move.
    pub step_height: f32,
    /// Height above the current footing the ground probe starts from.
    pub probe_height: f32,
    /// How far below the probe start ground is searched for.
    pub probe_depth: f32,
    /// Gap kept between a player and a wall hit.
    pub wall_margin: f32,
    /// Torso centre height above the footing.
    pub ride_height: f32,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            step_height: 0.5,
            probe_height: 2.0,
            probe_depth: 200.0,
            wall_margin: 0.3,
            ride_height: 2.1,
        }
    }
}

/// Outcome of [`GroundResolver::resolve_move`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MoveResolution {
    /// False when the move was rejected outright.
    pub accepted: bool,
    /// Authoritative position.
    pub corrected: Vec3,
    /// True when a wall shortened an accepted move.
    pub blocked_by_wall: bool,
}

impl MoveResolution {
    pub(crate) fn rejected(corrected: Vec3) -> Self {
        Self {
            accepted: false,
            corrected,
            blocked_by_wall: false,
        }
    }
}

/// Snaps movement to the world mesh.
#[derive(Clone, Debug, Default)]
pub struct GroundResolver {
    mesh: TriangleMesh,
    config: GroundConfig,
}

impl GroundResolver {
    /// Create a resolver over `mesh`.
    pub fn new(mesh: TriangleMesh, config: GroundConfig) -> Self {
        Self { mesh, config }
    }

    /// Tuning in use.
    pub fn config(&self) -> &GroundConfig {
        &self.config
    }

    /// World mesh.
    pub fn mesh(&self) -> &TriangleMesh {
        &self.mesh
    }

    /// Height of the first surface below `(x, from_y, z)`.
    pub fn ground_height(&self, x: f32, z: f32, from_y: f32) -> Option<f32> {
        self.mesh
            .raycast(Vec3::new(x, from_y, z), Vec3::NEG_Y, self.config.probe_depth)
            .map(|hit| hit.point.y)
    }

    /// Torso position standing on the ground at `(x, z)`, probing from `from_y`.
    pub fn standing_position(&self, x: f32, z: f32, from_y: f32) -> Option<Vec3> {
        self.ground_height(x, z, from_y)
            .map(|y| Vec3::new(x, y + self.config.ride_height, z))
    }

    /// Resolve a move from `current` to `desired`.
    ///
    /// The client's claimed height is ignored; ground is probed from just
    /// above the current footing. Missing ground or a step taller than
    /// `step_height` rejects the move back to the current footing. An
    /// accepted move is then checked for walls along its horizontal path
    /// and clamped short of the first one; the stop point must pass the same
    /// ground checks as the destination.
    pub fn resolve_move(&self, current: Vec3, desired: Vec3) -> MoveResolution {
        let cfg = &self.config;
        let current_foot = current.y - cfg.ride_height;
        let probe_from = current_foot + cfg.probe_height;

        let current_ground = self
            .ground_height(current.x, current.z, probe_from)
            .unwrap_or(current_foot);
        let footing = Vec3::new(current.x, current_ground + cfg.ride_height, current.z);

        let Some(target_ground) = self.ground_height(desired.x, desired.z, probe_from) else {
            debug!(?desired, "No ground below desired position");
            return MoveResolution::rejected(current);
        };

        if (target_ground - current_ground).abs() > cfg.step_height {
            debug!(
                from = current_ground,
                to = target_ground,
                "Step height exceeded"
            );
            return MoveResolution::rejected(footing);
        }

        let mut resolution = MoveResolution {
            accepted: true,
            corrected: Vec3::new(desired.x, target_ground + cfg.ride_height, desired.z),
            blocked_by_wall: false,
        };

        let horizontal = Vec3::new(desired.x - current.x, 0.0, desired.z - current.z);
        let travel = horizontal.length();
        if travel <= RAY_EPSILON {
            return resolution;
        }

        let direction = horizontal / travel;
        // Above any climbable step
        let knee = Vec3::new(current.x, current_ground + cfg.step_height + 0.1, current.z);

        if let Some(wall) = self.mesh.raycast(knee, direction, travel + cfg.wall_margin) {
            let allowed = (wall.distance - cfg.wall_margin).clamp(0.0, travel);
            let stop = current + direction * allowed;
            let Some(ground) = self.ground_height(stop.x, stop.z, probe_from) else {
                debug!(?stop, "No ground at wall stop");
                return MoveResolution::rejected(footing);
            };
            if (ground - current_ground).abs() > cfg.step_height {
                debug!(from = current_ground, to = ground, "Step height exceeded at wall stop");
                return MoveResolution::rejected(footing);
            }

            resolution.corrected = Vec3::new(stop.x, ground + cfg.ride_height, stop.z);
            resolution.blocked_by_wall = true;
        }

        resolution
    }
}
