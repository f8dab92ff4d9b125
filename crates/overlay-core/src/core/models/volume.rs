use nalgebra::{Matrix4, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Placement of a regular density grid in world space.
///
/// `grid_to_world` maps a voxel index `(i, j, k)` (x fastest) to a cartesian
/// position in Angstroms. Unit cells that are not orthogonal are encoded in the
/// upper-left 3x3 block.
#[derive(Debug, Clone, PartialEq)]
pub struct GridGeometry {
    pub dimensions: [usize; 3],
    pub grid_to_world: Matrix4<f64>,
}

impl GridGeometry {
    pub fn new(dimensions: [usize; 3], grid_to_world: Matrix4<f64>) -> Self {
        Self {
            dimensions,
            grid_to_world,
        }
    }

    /// An axis-aligned grid with cubic voxels starting at `origin`.
    pub fn axis_aligned(dimensions: [usize; 3], voxel_size: f64, origin: Point3<f64>) -> Self {
        let mut grid_to_world = Matrix4::new_scaling(voxel_size);
        grid_to_world[(0, 3)] = origin.x;
        grid_to_world[(1, 3)] = origin.y;
        grid_to_world[(2, 3)] = origin.z;
        Self::new(dimensions, grid_to_world)
    }

    pub fn voxel_count(&self) -> usize {
        self.dimensions.iter().product()
    }

    pub fn voxel_to_world(&self, index: [f64; 3]) -> Point3<f64> {
        self.grid_to_world
            .transform_point(&Point3::new(index[0], index[1], index[2]))
    }

    /// World-space position of the grid's midpoint voxel.
    pub fn center(&self) -> Point3<f64> {
        let mid = |n: usize| (n.saturating_sub(1)) as f64 / 2.0;
        self.voxel_to_world([
            mid(self.dimensions[0]),
            mid(self.dimensions[1]),
            mid(self.dimensions[2]),
        ])
    }

    pub fn translate(&mut self, offset: &Vector3<f64>) {
        self.grid_to_world = Matrix4::new_translation(offset) * self.grid_to_world;
    }
}

/// Summary statistics of a density grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl VolumeStats {
    /// Computes min, max, mean and the population standard deviation over the
    /// finite values. Returns `None` when no finite value exists.
    pub fn from_values(values: &[f32]) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for value in values.iter().map(|&v| v as f64).filter(|v| v.is_finite()) {
            count += 1;
            sum += value;
            min = min.min(value);
            max = max.max(value);
        }
        if count == 0 {
            return None;
        }

        let mean = sum / count as f64;
        let variance = values
            .iter()
            .map(|&v| v as f64)
            .filter(|v| v.is_finite())
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / count as f64;

        Some(Self {
            min,
            max,
            mean,
            sigma: variance.sqrt(),
        })
    }
}

/// A density map read from disk: grid values (x fastest) and their placement.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeData {
    geometry: GridGeometry,
    values: Vec<f32>,
}

impl VolumeData {
    /// Returns `None` when the number of values does not match the grid dimensions.
    pub fn new(geometry: GridGeometry, values: Vec<f32>) -> Option<Self> {
        (geometry.voxel_count() == values.len()).then_some(Self { geometry, values })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut GridGeometry {
        &mut self.geometry
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn value_at(&self, i: usize, j: usize, k: usize) -> Option<f32> {
        let [nx, ny, nz] = self.geometry.dimensions;
        if i >= nx || j >= ny || k >= nz {
            return None;
        }
        self.values.get(i + nx * (j + ny * k)).copied()
    }

    pub fn stats(&self) -> Option<VolumeStats> {
        VolumeStats::from_values(&self.values)
    }
}
