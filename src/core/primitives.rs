//! Collider Primitives
//!
//! The three scenery shapes (sphere, vertical cylinder, box) plus the
//! axis-aligned bounding box used by the broad phase. Every shape answers
//! the same three questions: does it contain a point, where does a ray
//! first touch it, and does it overlap a sphere.
//!
//! Rays are `origin + direction * t` with a unit `direction`; `t` is a
//! world-space distance.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Tolerance for parallel rays and degenerate segments.
pub const RAY_EPSILON: f32 = 1e-6;

/// A ray/shape intersection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Distance along the ray (0 when the ray starts inside the shape).
    pub distance: f32,
    /// World position of the hit.
    pub point: Vec3,
    /// Outward surface normal (reversed ray direction when starting inside).
    pub normal: Vec3,
}

impl RayHit {
    fn at(origin: Vec3, direction: Vec3, distance: f32, normal: Vec3) -> Self {
        Self {
            distance,
            point: origin + direction * distance,
            normal,
        }
    }
}

/// Shared behaviour of every collider shape.
pub trait Primitive {
    /// Whether `point` lies inside or on the surface.
    fn contains_point(&self, point: Vec3) -> bool;

    /// Nearest intersection within `max_distance`.
    fn intersect_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit>;

    /// Whether a sphere at `center` with `radius` touches the shape.
    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool;

    /// Tight axis-aligned bounds.
    fn aabb(&self) -> Aabb;
}

// =============================================================================
// AABB
// =============================================================================

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Create from corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Create from a centre and half extents.
    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        let half = half_extents.abs();
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Centre point.
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Whether `point` is inside (inclusive).
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Closest point of the box to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.max(self.min).min(self.max)
    }

    /// Broad-phase sphere test.
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.closest_point(center).distance_squared(center) <= radius * radius
    }

    /// Circle test on the XZ plane (ignores height).
    pub fn intersects_xz_circle(&self, x: f32, z: f32, radius: f32) -> bool {
        let cx = x.clamp(self.min.x, self.max.x);
        let cz = z.clamp(self.min.z, self.max.z);
        let dx = x - cx;
        let dz = z - cz;
        dx * dx + dz * dz <= radius * radius
    }

    /// Slab test. Returns entry distance and entry face normal.
    pub fn ray_intersection(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Option<(f32, Vec3)> {
        let mut t_min = 0.0_f32;
        let mut t_max = max_distance;
        let mut normal = -direction;

        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];

            if d.abs() < RAY_EPSILON {
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let mut t1 = (lo - o) * inv;
            let mut t2 = (hi - o) * inv;
            let mut n = Vec3::ZERO;
            n[axis] = if d > 0.0 { -1.0 } else { 1.0 };
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }

            if t1 > t_min {
                t_min = t1;
                normal = n;
            }
            t_max = t_max.min(t2);

            if t_min > t_max {
                return None;
            }
        }

        Some((t_min, normal))
    }
}

// =============================================================================
// SPHERE
// =============================================================================

/// Sphere collider (rocks, hit-capsule parts).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    /// Centre.
    pub center: Vec3,
    /// Radius.
    pub radius: f32,
}

impl Sphere {
    /// Create a sphere.
    pub const fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

impl Primitive for Sphere {
    fn contains_point(&self, point: Vec3) -> bool {
        point.distance_squared(self.center) <= self.radius * self.radius
    }

    fn intersect_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let t = ray_sphere_distance(origin, direction, self.center, self.radius)?;
        if t > max_distance {
            return None;
        }
        let point = origin + direction * t;
        let normal = if t == 0.0 {
            -direction
        } else {
            (point - self.center).normalize_or_zero()
        };
        Some(RayHit::at(origin, direction, t, normal))
    }

    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let r = self.radius + radius;
        self.center.distance_squared(center) <= r * r
    }

    fn aabb(&self) -> Aabb {
        Aabb::from_center_extents(self.center, Vec3::splat(self.radius))
    }
}

/// Smallest non-negative distance at which a ray meets a sphere.
///
/// Returns 0 when the origin is already inside.
pub fn ray_sphere_distance(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let oc = origin - center;
    let b = oc.dot(direction);
    let c = oc.length_squared() - radius * radius;

    if c <= 0.0 {
        return Some(0.0);
    }
    // Outside and pointing away
    if b > 0.0 {
        return None;
    }

    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }

    Some((-b - discriminant.sqrt()).max(0.0))
}

/// Swept test of the segment `start -> end` against a sphere.
///
/// Returns the distance from `start` to the first contact, within
/// `[0, |end - start|]`.
pub fn segment_sphere_intersection(start: Vec3, end: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let delta = end - start;
    let length = delta.length();

    if length < RAY_EPSILON {
        return (start.distance_squared(center) <= radius * radius).then_some(0.0);
    }

    let direction = delta / length;
    ray_sphere_distance(start, direction, center, radius).filter(|t| *t <= length)
}

// =============================================================================
// CYLINDER
// =============================================================================

/// Upright cylinder collider (tree trunks, pillars).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cylinder {
    /// Centre of the cylinder (halfway up its height).
    pub center: Vec3,
    /// Radius on the XZ plane.
    pub radius: f32,
    /// Half of the total height.
    pub half_height: f32,
}

impl Cylinder {
    /// Create a cylinder.
    pub const fn new(center: Vec3, radius: f32, half_height: f32) -> Self {
        Self {
            center,
            radius,
            half_height,
        }
    }

    /// Cylinder standing on `base` with the given full height.
    pub fn standing(base: Vec3, radius: f32, height: f32) -> Self {
        let half_height = height * 0.5;
        Self::new(base + Vec3::Y * half_height, radius, half_height)
    }
}

impl Primitive for Cylinder {
    fn contains_point(&self, point: Vec3) -> bool {
        let local = point - self.center;
        local.y.abs() <= self.half_height
            && local.x * local.x + local.z * local.z <= self.radius * self.radius
    }

    fn intersect_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        if self.contains_point(origin) {
            return Some(RayHit::at(origin, direction, 0.0, -direction));
        }

        let local = origin - self.center;
        let mut best: Option<(f32, Vec3)> = None;

        // Side wall
        let a = direction.x * direction.x + direction.z * direction.z;
        if a > RAY_EPSILON {
            let b = 2.0 * (local.x * direction.x + local.z * direction.z);
            let c = local.x * local.x + local.z * local.z - self.radius * self.radius;
            let discriminant = b * b - 4.0 * a * c;
            if discriminant >= 0.0 {
                let t = (-b - discriminant.sqrt()) / (2.0 * a);
                if (0.0..=max_distance).contains(&t) {
                    let y = local.y + direction.y * t;
                    if y.abs() <= self.half_height {
                        let hit = local + direction * t;
                        best = Some((t, Vec3::new(hit.x, 0.0, hit.z).normalize_or_zero()));
                    }
                }
            }
        }

        // Caps
        if direction.y.abs() > RAY_EPSILON {
            for (cap_y, normal) in [(self.half_height, Vec3::Y), (-self.half_height, Vec3::NEG_Y)] {
                let t = (cap_y - local.y) / direction.y;
                if !(0.0..=max_distance).contains(&t) {
                    continue;
                }
                let hit = local + direction * t;
                if hit.x * hit.x + hit.z * hit.z <= self.radius * self.radius
                    && best.map_or(true, |(bt, _)| t < bt)
                {
                    best = Some((t, normal));
                }
            }
        }

        best.map(|(t, normal)| RayHit::at(origin, direction, t, normal))
    }

    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let local = center - self.center;
        let y = local.y.clamp(-self.half_height, self.half_height);
        let horizontal = Vec3::new(local.x, 0.0, local.z);
        let horizontal = if horizontal.length_squared() > self.radius * self.radius {
            horizontal.normalize_or_zero() * self.radius
        } else {
            horizontal
        };
        let closest = Vec3::new(horizontal.x, y, horizontal.z);
        closest.distance_squared(local) <= radius * radius
    }

    fn aabb(&self) -> Aabb {
        Aabb::from_center_extents(
            self.center,
            Vec3::new(self.radius, self.half_height, self.radius),
        )
    }
}

// =============================================================================
// BOX
// =============================================================================

/// Box collider (buildings, walls). Axis-aligned when `rotation` is identity.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cuboid {
    /// Centre.
    pub center: Vec3,
    /// Half size along each local axis.
    pub half_extents: Vec3,
    /// Orientation.
    pub rotation: Quat,
}

impl Cuboid {
    /// Axis-aligned box.
    pub fn axis_aligned(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
            rotation: Quat::IDENTITY,
        }
    }

    /// Box rotated about the vertical axis.
    pub fn oriented(center: Vec3, half_extents: Vec3, yaw: f32) -> Self {
        Self {
            center,
            half_extents: half_extents.abs(),
            rotation: Quat::from_rotation_y(yaw),
        }
    }

    fn to_local(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.center)
    }

    fn local_bounds(&self) -> Aabb {
        Aabb::from_center_extents(Vec3::ZERO, self.half_extents)
    }
}

impl Primitive for Cuboid {
    fn contains_point(&self, point: Vec3) -> bool {
        self.local_bounds().contains_point(self.to_local(point))
    }

    fn intersect_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        let local_origin = self.to_local(origin);
        let local_direction = self.rotation.inverse() * direction;
        let (t, local_normal) =
            self.local_bounds()
                .ray_intersection(local_origin, local_direction, max_distance)?;
        Some(RayHit::at(origin, direction, t, self.rotation * local_normal))
    }

    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.local_bounds().intersects_sphere(self.to_local(center), radius)
    }

    fn aabb(&self) -> Aabb {
        let basis = Mat3::from_quat(self.rotation);
        let extents = basis.x_axis.abs() * self.half_extents.x
            + basis.y_axis.abs() * self.half_extents.y
            + basis.z_axis.abs() * self.half_extents.z;
        Aabb::from_center_extents(self.center, extents)
    }
}

// =============================================================================
// SHAPE
// =============================================================================

/// Any registered collider shape.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum Shape {
    /// Sphere.
    Sphere(Sphere),
    /// Upright cylinder.
    Cylinder(Cylinder),
    /// Box.
    Cuboid(Cuboid),
}

impl Shape {
    /// Geometric centre.
    pub fn center(&self) -> Vec3 {
        match self {
            Shape::Sphere(s) => s.center,
            Shape::Cylinder(c) => c.center,
            Shape::Cuboid(b) => b.center,
        }
    }

    fn as_primitive(&self) -> &dyn Primitive {
        match self {
            Shape::Sphere(s) => s,
            Shape::Cylinder(c) => c,
            Shape::Cuboid(b) => b,
        }
    }
}

impl Primitive for Shape {
    fn contains_point(&self, point: Vec3) -> bool {
        self.as_primitive().contains_point(point)
    }

    fn intersect_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<RayHit> {
        self.as_primitive().intersect_ray(origin, direction, max_distance)
    }

    fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.as_primitive().intersects_sphere(center, radius)
    }

    fn aabb(&self) -> Aabb {
        self.as_primitive().aabb()
    }
}

impl From<Sphere> for Shape {
    fn from(s: Sphere) -> Self {
        Shape::Sphere(s)
    }
}

impl From<Cylinder> for Shape {
    fn from(c: Cylinder) -> Self {
        Shape::Cylinder(c)
    }
}

impl From<Cuboid> for Shape {
    fn from(b: Cuboid) -> Self {
        Shape::Cuboid(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_sphere_ray_hit_and_miss() {
        let sphere = Sphere::new(Vec3::new(10.0, 0.0, 0.0), 1.0);

        let hit = sphere.intersect_ray(Vec3::ZERO, Vec3::X, 100.0).unwrap();
        assert!(approx(hit.distance, 9.0));
        assert!(approx(hit.normal.x, -1.0));

        assert!(sphere.intersect_ray(Vec3::ZERO, Vec3::NEG_X, 100.0).is_none());
        assert!(sphere.intersect_ray(Vec3::ZERO, Vec3::X, 5.0).is_none());
        assert!(sphere.intersect_ray(Vec3::new(0.0, 2.0, 0.0), Vec3::X, 100.0).is_none());
    }

    #[test]
    fn test_ray_starting_inside_sphere_hits_at_zero() {
        let sphere = Sphere::new(Vec3::ZERO, 2.0);
        let hit = sphere.intersect_ray(Vec3::new(0.5, 0.0, 0.0), Vec3::X, 10.0).unwrap();
        assert_eq!(hit.distance, 0.0);
    }

    #[test]
    fn test_segment_sphere_intersection() {
        let center = Vec3::new(10.0, 0.0, 0.0);

        // Segment fully before the sphere
        assert!(segment_sphere_intersection(Vec3::ZERO, Vec3::new(5.0, 0.0, 0.0), center, 1.0).is_none());

        // Segment crossing the sphere, both ends outside
        let t = segment_sphere_intersection(
            Vec3::new(5.0, 0.0, 0.0),
            Vec3::new(15.0, 0.0, 0.0),
            center,
            1.0,
        )
        .unwrap();
        assert!(approx(t, 4.0));

        // Degenerate segment inside
        assert_eq!(segment_sphere_intersection(center, center, center, 1.0), Some(0.0));
    }

    #[test]
    fn test_cylinder_containment_and_overlap() {
        let trunk = Cylinder::standing(Vec3::ZERO, 0.5, 4.0);
        assert!(trunk.contains_point(Vec3::new(0.2, 3.9, 0.2)));
        assert!(!trunk.contains_point(Vec3::new(0.0, 4.1, 0.0)));
        assert!(!trunk.contains_point(Vec3::new(0.6, 1.0, 0.0)));

        assert!(trunk.intersects_sphere(Vec3::new(1.2, 2.0, 0.0), 0.8));
        assert!(!trunk.intersects_sphere(Vec3::new(1.2, 2.0, 0.0), 0.6));
        // Above the top cap
        assert!(trunk.intersects_sphere(Vec3::new(0.0, 4.5, 0.0), 0.6));
    }

    #[test]
    fn test_cylinder_ray_side_and_cap() {
        let trunk = Cylinder::standing(Vec3::ZERO, 1.0, 4.0);

        let side = trunk
            .intersect_ray(Vec3::new(-5.0, 2.0, 0.0), Vec3::X, 20.0)
            .unwrap();
        assert!(approx(side.distance, 4.0));
        assert!(approx(side.normal.x, -1.0));

        let cap = trunk
            .intersect_ray(Vec3::new(0.0, 10.0, 0.0), Vec3::NEG_Y, 20.0)
            .unwrap();
        assert!(approx(cap.distance, 6.0));
        assert_eq!(cap.normal, Vec3::Y);
    }

    #[test]
    fn test_axis_aligned_box() {
        let building = Cuboid::axis_aligned(Vec3::new(0.0, 5.0, 0.0), Vec3::new(4.0, 5.0, 2.0));
        assert!(building.contains_point(Vec3::new(3.9, 0.1, -1.9)));
        assert!(!building.contains_point(Vec3::new(4.1, 5.0, 0.0)));

        let hit = building
            .intersect_ray(Vec3::new(-10.0, 5.0, 0.0), Vec3::X, 50.0)
            .unwrap();
        assert!(approx(hit.distance, 6.0));
        assert!(approx(hit.normal.x, -1.0));

        let bounds = building.aabb();
        assert_eq!(bounds.min, Vec3::new(-4.0, 0.0, -2.0));
        assert_eq!(bounds.max, Vec3::new(4.0, 10.0, 2.0));
    }

    #[test]
    fn test_oriented_box_bounds_enclose_corners() {
        let wall = Cuboid::oriented(Vec3::ZERO, Vec3::new(5.0, 2.0, 0.5), FRAC_PI_4);
        let bounds = wall.aabb();

        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let corner = wall.rotation * (wall.half_extents * Vec3::new(sx, sy, sz));
                    assert!(bounds.expand_for_test(1e-4).contains_point(corner));
                }
            }
        }

        // A point on the rotated long axis is inside; the unrotated tip is not
        let along = wall.rotation * Vec3::new(4.5, 0.0, 0.0);
        assert!(wall.contains_point(along));
        assert!(!wall.contains_point(Vec3::new(4.5, 0.0, 0.0)));
    }

    #[test]
    fn test_aabb_broad_phase() {
        let bounds = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        assert!(bounds.intersects_sphere(Vec3::new(1.5, 0.0, 0.0), 0.6));
        assert!(!bounds.intersects_sphere(Vec3::new(1.5, 1.5, 0.0), 0.6));
        assert!(bounds.intersects_xz_circle(1.5, 0.0, 0.6));
        assert!(!bounds.intersects_xz_circle(3.0, 0.0, 1.0));
    }

    impl Aabb {
        fn expand_for_test(&self, margin: f32) -> Aabb {
            Aabb::new(self.min - Vec3::splat(margin), self.max + Vec3::splat(margin))
        }
    }
}
