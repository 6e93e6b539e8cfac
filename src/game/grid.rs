//! Spatial Grid
//!
//! Uniform bucketing of static colliders over the XZ plane. A collider is
//! listed in every cell its bounding box overlaps, so a lookup only has to
//! read the handful of cells around the query.

use std::collections::{BTreeSet, HashMap};

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::primitives::{Aabb, RAY_EPSILON};
use crate::game::collision::ColliderId;

/// Cell coordinate on the XZ plane.
pub type CellKey = (i32, i32);

/// Upper bound on cells walked by a single ray query.
const MAX_RAY_CELLS: usize = 4096;

/// Grid tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Edge length of a square cell in world units.
    pub cell_size: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self { cell_size: 16.0 }
    }
}

/// A cell crossed by a ray, with the ray distances where it enters and leaves.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayCell {
    /// Cell coordinate.
    pub key: CellKey,
    /// Distance along the ray where the cell is entered.
    pub t_enter: f32,
    /// Distance along the ray where the cell is left (capped at the query range).
    pub t_exit: f32,
}

/// Uniform XZ grid of collider ids.
#[derive(Clone, Debug)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<CellKey, Vec<ColliderId>>,
}

impl SpatialGrid {
    /// Create an empty grid.
    pub fn new(config: GridConfig) -> Self {
        let cell_size = if config.cell_size.is_finite() && config.cell_size > 0.0 {
            config.cell_size
        } else {
            GridConfig::default().cell_size
        };

        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    /// Cell edge length.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Number of non-empty cells.
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Cell containing the world position `(x, z)`.
    #[inline]
    pub fn cell_of(&self, x: f32, z: f32) -> CellKey {
        (
            (x / self.cell_size).floor() as i32,
            (z / self.cell_size).floor() as i32,
        )
    }

    /// Ids stored in one cell.
    pub fn ids_in(&self, key: CellKey) -> &[ColliderId] {
        self.cells.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn cells_covering(&self, bounds: &Aabb) -> impl Iterator<Item = CellKey> {
        let (min_x, min_z) = self.cell_of(bounds.min.x, bounds.min.z);
        let (max_x, max_z) = self.cell_of(bounds.max.x, bounds.max.z);
        (min_x..=max_x).flat_map(move |x| (min_z..=max_z).map(move |z| (x, z)))
    }

    /// Insert `id` into every cell overlapped by `bounds`.
    pub fn insert(&mut self, id: ColliderId, bounds: &Aabb) {
        let keys: Vec<CellKey> = self.cells_covering(bounds).collect();
        for key in keys {
            self.cells.entry(key).or_default().push(id);
        }
    }

    /// Remove `id` from the cells overlapped by `bounds`.
    pub fn remove(&mut self, id: ColliderId, bounds: &Aabb) {
        let keys: Vec<CellKey> = self.cells_covering(bounds).collect();
        for key in keys {
            if let Some(ids) = self.cells.get_mut(&key) {
                ids.retain(|other| *other != id);
                if ids.is_empty() {
                    self.cells.remove(&key);
                }
            }
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Distinct ids in the cells within `radius` of `(x, z)`, sorted by id.
    ///
    /// The search expands the centre cell by `ceil(radius / cell_size)` cells
    /// in each direction. Results are candidates only; callers run the exact
    /// shape test.
    pub fn query_nearby(&self, x: f32, z: f32, radius: f32) -> Vec<ColliderId> {
        if !(x.is_finite() && z.is_finite() && radius.is_finite()) {
            return Vec::new();
        }

        let (cx, cz) = self.cell_of(x, z);
        let reach = (radius.max(0.0) / self.cell_size).ceil() as i32;

        let mut found = BTreeSet::new();
        for gx in (cx - reach)..=(cx + reach) {
            for gz in (cz - reach)..=(cz + reach) {
                found.extend(self.ids_in((gx, gz)).iter().copied());
            }
        }

        found.into_iter().collect()
    }

    /// Cells crossed by a ray, in the order the ray enters them.
    ///
    /// Grid-line crossings are stepped one at a time (whichever of the next
    /// X or Z boundary is closer) until `max_distance` is reached. A ray with
    /// no horizontal component only visits its origin cell.
    pub fn query_ray_cells(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Vec<RayCell> {
        if !(origin.is_finite() && direction.is_finite() && max_distance.is_finite())
            || max_distance < 0.0
        {
            return Vec::new();
        }

        let mut key = self.cell_of(origin.x, origin.z);
        let horizontal = direction.x.abs().max(direction.z.abs());
        if horizontal < RAY_EPSILON {
            return vec![RayCell {
                key,
                t_enter: 0.0,
                t_exit: max_distance,
            }];
        }

        let (step_x, mut t_max_x, t_delta_x) = self.axis_setup(origin.x, direction.x, key.0);
        let (step_z, mut t_max_z, t_delta_z) = self.axis_setup(origin.z, direction.z, key.1);

        let mut cells = Vec::new();
        let mut t_enter = 0.0_f32;

        while cells.len() < MAX_RAY_CELLS {
            let t_exit = t_max_x.min(t_max_z).min(max_distance);
            cells.push(RayCell {
                key,
                t_enter,
                t_exit,
            });

            if t_exit >= max_distance {
                break;
            }

            if t_max_x < t_max_z {
                key.0 += step_x;
                t_enter = t_max_x;
                t_max_x += t_delta_x;
            } else {
                key.1 += step_z;
                t_enter = t_max_z;
                t_max_z += t_delta_z;
            }
        }

        cells
    }

    /// Step direction, distance to the first boundary, distance between boundaries.
    fn axis_setup(&self, origin: f32, direction: f32, cell: i32) -> (i32, f32, f32) {
        if direction.abs() < RAY_EPSILON {
            return (0, f32::INFINITY, f32::INFINITY);
        }

        let (step, boundary) = if direction > 0.0 {
            (1, (cell + 1) as f32 * self.cell_size)
        } else {
            (-1, cell as f32 * self.cell_size)
        };

        (
            step,
            (boundary - origin) / direction,
            self.cell_size / direction.abs(),
        )
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(GridConfig::default())
    }
}
