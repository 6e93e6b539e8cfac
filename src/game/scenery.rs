//! Static Scenery
//!
//! Layout of trees, rocks, buildings and walls, plus spawn points and pickup
//! sites. Terrain generation lives elsewhere; the simulation only sees the
//! placements through [`SceneryProvider`].

use std::f32::consts::TAU;
use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::primitives::{Cuboid, Cylinder, Shape, Sphere};
use crate::game::collision::{ColliderKind, CollisionEngine};
use crate::game::pickup::PickupSite;

/// Scenery loading failures.
#[derive(Debug, Error)]
pub enum SceneryError {
    /// Layout file could not be read.
    #[error("failed to read scenery: {0}")]
    Io(#[from] std::io::Error),

    /// Layout file is not valid JSON.
    #[error("failed to parse scenery: {0}")]
    Json(#[from] serde_json::Error),

    /// An object has bad dimensions.
    #[error("scenery object {index}: {reason}")]
    InvalidObject {
        /// Position in the object list.
        index: usize,
        /// What is wrong.
        reason: &'static str,
    },
}

/// One placed scenery object. Positions are the point where the object meets
/// the ground, except rocks which are given by their centre.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SceneryObject {
    /// Tree trunk.
    Tree {
        /// Base of the trunk
        position: Vec3,
        /// Trunk radius
        radius: f32,
        /// Trunk height
        height: f32,
    },
    /// Boulder.
    Rock {
        /// Centre
        position: Vec3,
        /// Radius
        radius: f32,
    },
    /// Building footprint.
    Building {
        /// Centre of the footprint
        position: Vec3,
        /// Full width, height, depth
        size: Vec3,
        /// Rotation about the vertical axis, radians
        #[serde(default)]
        yaw: f32,
    },
    /// Wall segment.
    Wall {
        /// Centre of the footprint
        position: Vec3,
        /// Full width, height, depth
        size: Vec3,
        /// Rotation about the vertical axis, radians
        #[serde(default)]
        yaw: f32,
    },
    /// Crate.
    Crate {
        /// Centre of the footprint
        position: Vec3,
        /// Full width, height, depth
        size: Vec3,
    },
}

impl SceneryObject {
    /// Collider type tag.
    pub fn kind(&self) -> ColliderKind {
        match self {
            SceneryObject::Tree { .. } => ColliderKind::Tree,
            SceneryObject::Rock { .. } => ColliderKind::Rock,
            SceneryObject::Building { .. } => ColliderKind::Building,
            SceneryObject::Wall { .. } => ColliderKind::Wall,
            SceneryObject::Crate { .. } => ColliderKind::Crate,
        }
    }

    /// Collider shape.
    pub fn shape(&self) -> Shape {
        match *self {
            SceneryObject::Tree {
                position,
                radius,
                height,
            } => Cylinder::standing(position, radius, height).into(),
            SceneryObject::Rock { position, radius } => Sphere::new(position, radius).into(),
            SceneryObject::Building {
                position,
                size,
                yaw,
            }
            | SceneryObject::Wall {
                position,
                size,
                yaw,
            } => Cuboid::oriented(position + Vec3::Y * (size.y * 0.5), size * 0.5, yaw).into(),
            SceneryObject::Crate { position, size } => {
                Cuboid::axis_aligned(position + Vec3::Y * (size.y * 0.5), size * 0.5).into()
            }
        }
    }

    fn validate(&self) -> Result<(), &'static str> {
        let (position, dims) = match *self {
            SceneryObject::Tree {
                position,
                radius,
                height,
            } => (position, Vec3::new(radius, height, radius)),
            SceneryObject::Rock { position, radius } => (position, Vec3::splat(radius)),
            SceneryObject::Building { position, size, yaw }
            | SceneryObject::Wall { position, size, yaw } => {
                if !yaw.is_finite() {
                    return Err("yaw is not finite");
                }
                (position, size)
            }
            SceneryObject::Crate { position, size } => (position, size),
        };

        if !position.is_finite() {
            return Err("position is not finite");
        }
        if !dims.is_finite() || dims.min_element() <= 0.0 {
            return Err("dimensions must be positive");
        }
        Ok(())
    }
}

/// Source of static placements.
pub trait SceneryProvider {
    /// Colliders to register.
    fn objects(&self) -> Vec<SceneryObject>;

    /// Ground-level spawn locations.
    fn spawn_points(&self) -> Vec<Vec3>;

    /// Health pack placements.
    fn pickup_sites(&self) -> Vec<PickupSite>;
}

/// Register every object of `provider` with `engine`.
///
/// Nothing is registered if any object is invalid.
pub fn populate(engine: &mut CollisionEngine, provider: &dyn SceneryProvider) -> Result<usize, SceneryError> {
    let objects = provider.objects();
    for (index, object) in objects.iter().enumerate() {
        object
            .validate()
            .map_err(|reason| SceneryError::InvalidObject { index, reason })?;
    }

    for object in &objects {
        engine.register(object.shape(), object.kind());
    }

    debug!(count = objects.len(), "Scenery registered");
    Ok(objects.len())
}

// =============================================================================
// STATIC LAYOUT
// =============================================================================

/// Layout read from JSON or built in code.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticLayout {
    /// Collider placements
    #[serde(default)]
    pub objects: Vec<SceneryObject>,
    /// Spawn locations
    #[serde(default)]
    pub spawn_points: Vec<Vec3>,
    /// Health packs
    #[serde(default)]
    pub pickups: Vec<PickupSite>,
}

impl StaticLayout {
    /// Parse a JSON layout.
    pub fn from_json_str(json: &str) -> Result<Self, SceneryError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON layout from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SceneryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Built-in arena: a walled 300x300 square with a ring of trees, a few
    /// rocks and four buildings, eight spawn points and four health packs.
    pub fn default_arena() -> Self {
        const HALF: f32 = 150.0;
        let mut objects = Vec::new();

        // Boundary
        for (position, size) in [
            (Vec3::new(0.0, 0.0, HALF), Vec3::new(2.0 * HALF, 12.0, 2.0)),
            (Vec3::new(0.0, 0.0, -HALF), Vec3::new(2.0 * HALF, 12.0, 2.0)),
            (Vec3::new(HALF, 0.0, 0.0), Vec3::new(2.0, 12.0, 2.0 * HALF)),
            (Vec3::new(-HALF, 0.0, 0.0), Vec3::new(2.0, 12.0, 2.0 * HALF)),
        ] {
            objects.push(SceneryObject::Wall {
                position,
                size,
                yaw: 0.0,
            });
        }

        // Tree ring
        for i in 0..16 {
            let angle = TAU * i as f32 / 16.0;
            objects.push(SceneryObject::Tree {
                position: Vec3::new(angle.cos() * 100.0, 0.0, angle.sin() * 100.0),
                radius: 0.8,
                height: 10.0,
            });
        }

        for (x, z, radius) in [(25.0, 70.0, 3.0), (-70.0, -20.0, 4.0), (60.0, -75.0, 2.5)] {
            objects.push(SceneryObject::Rock {
                position: Vec3::new(x, 0.5, z),
                radius,
            });
        }

        for (x, z, yaw) in [(120.0, 0.0, 0.0), (-120.0, 0.0, 0.0), (0.0, 120.0, 0.3), (0.0, -120.0, -0.3)] {
            objects.push(SceneryObject::Building {
                position: Vec3::new(x, 0.0, z),
                size: Vec3::new(12.0, 10.0, 16.0),
                yaw,
            });
        }

        let spawn_points = (0..8)
            .map(|i| {
                let angle = TAU * i as f32 / 8.0;
                Vec3::new(angle.cos() * 50.0, 0.0, angle.sin() * 50.0)
            })
            .collect();

        let pickups = [(30.0, 30.0), (-30.0, 30.0), (30.0, -30.0), (-30.0, -30.0)]
            .into_iter()
            .map(|(x, z)| PickupSite::health_pack(Vec3::new(x, 1.0, z)))
            .collect();

        Self {
            objects,
            spawn_points,
            pickups,
        }
    }
}

impl SceneryProvider for StaticLayout {
    fn objects(&self) -> Vec<SceneryObject> {
        self.objects.clone()
    }

    fn spawn_points(&self) -> Vec<Vec3> {
        self.spawn_points.clone()
    }

    fn pickup_sites(&self) -> Vec<PickupSite> {
        self.pickups.clone()
    }
}
