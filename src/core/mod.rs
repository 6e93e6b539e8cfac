//! Geometric primitives.
//!
//! Shapes and ray tests shared by scenery collision, ground snapping and
//! projectile hit detection.

pub mod primitives;

// Re-export core types
pub use primitives::{Aabb, Cuboid, Cylinder, Primitive, RayHit, Shape, Sphere};
