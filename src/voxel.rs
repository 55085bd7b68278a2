//! The voxelised, time-binned energy field.
//!
//! The scene's bounding box is divided into cubic voxels of side `voxel_size`.
//! Every voxel keeps a lazily grown sequence of energy values, one per time bin
//! of width `1 / fps` seconds. Bins that were never written read as zero.

use nalgebra::{Point3, Vector3};

use crate::error::{Result, SimError};
use crate::geom::Aabb;


/// One cell of the grid: energy per time bin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Voxel {
    bins: Vec<f32>,
}

impl Voxel {
    /// Adds `energy` into `bin`, growing the sequence with zeros as needed.
    pub fn add(&mut self, bin: usize, energy: f32) -> Result<()> {
        if bin >= self.bins.len() {
            let len = bin.checked_add(1).ok_or_else(|| {
                SimError::AllocationFailure(format!("time bin {} is out of range", bin))
            })?;
            self.bins
                .try_reserve(len - self.bins.len())
                .map_err(|e| SimError::alloc("voxel time bins", e))?;
            self.bins.resize(len, 0.0);
        }
        self.bins[bin] += energy;
        Ok(())
    }

    pub fn energy_at(&self, bin: usize) -> f32 {
        self.bins.get(bin).copied().unwrap_or(0.0)
    }

    /// Number of bins stored, including zero-filled ones.
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn total(&self) -> f32 {
        self.bins.iter().sum()
    }
}

/// Energy accumulated over space and arrival time.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyGrid {
    voxels: Vec<Voxel>,
    origin: Point3<f32>,
    dimensions: Vector3<f32>,
    grid_dimensions: [usize; 3],
    voxel_size: f32,
    bin_width: f32,
    speed_of_sound: f32,
    num_bins: usize,
}

impl EnergyGrid {
    /// A zeroed grid covering `bounds`, with `ceil(extent / voxel_size) + 1`
    /// voxels per axis and bins of `1 / fps` seconds.
    pub fn new(bounds: &Aabb, voxel_size: f32, fps: u32, speed_of_sound: f32) -> Result<Self> {
        if !(voxel_size.is_finite() && voxel_size > 0.0) {
            return Err(SimError::invalid(format!(
                "voxel size must be positive, got {}",
                voxel_size
            )));
        }
        if fps == 0 {
            return Err(SimError::invalid("fps must be at least 1"));
        }
        if !(speed_of_sound.is_finite() && speed_of_sound > 0.0) {
            return Err(SimError::invalid(format!(
                "speed of sound must be positive, got {}",
                speed_of_sound
            )));
        }
        if bounds.is_empty() {
            return Err(SimError::invalid("cannot build a grid over an empty box"));
        }

        let dimensions = bounds.extent();
        let mut grid_dimensions = [0; 3];
        for (axis, dim) in grid_dimensions.iter_mut().enumerate() {
            let cells = (dimensions[axis] / voxel_size).ceil() + 1.0;
            if !cells.is_finite() || cells > usize::MAX as f32 {
                return Err(SimError::AllocationFailure(format!(
                    "{} voxels along axis {}",
                    cells, axis
                )));
            }
            *dim = cells as usize;
        }

        let count = grid_dimensions
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                SimError::AllocationFailure(format!("voxel count overflows for {:?}", grid_dimensions))
            })?;

        let voxels = Self::zeroed(count)?;

        Ok(Self {
            voxels,
            origin: bounds.min,
            dimensions,
            grid_dimensions,
            voxel_size,
            bin_width: 1.0 / fps as f32,
            speed_of_sound,
            num_bins: 0,
        })
    }

    fn zeroed(count: usize) -> Result<Vec<Voxel>> {
        let mut voxels = Vec::new();
        voxels
            .try_reserve_exact(count)
            .map_err(|e| SimError::alloc("energy grid voxels", e))?;
        voxels.resize_with(count, Voxel::default);
        Ok(voxels)
    }

    /// A zeroed grid of the same shape, used for per-worker partial results.
    pub fn empty_like(&self) -> Result<Self> {
        Ok(Self {
            voxels: Self::zeroed(self.voxels.len())?,
            origin: self.origin,
            dimensions: self.dimensions,
            grid_dimensions: self.grid_dimensions,
            voxel_size: self.voxel_size,
            bin_width: self.bin_width,
            speed_of_sound: self.speed_of_sound,
            num_bins: 0,
        })
    }

    pub fn origin(&self) -> Point3<f32> {
        self.origin
    }

    /// World extent covered by the grid.
    pub fn dimensions(&self) -> Vector3<f32> {
        self.dimensions
    }

    /// Voxel counts per axis.
    pub fn grid_dimensions(&self) -> [usize; 3] {
        self.grid_dimensions
    }

    pub fn voxel_size(&self) -> f32 {
        self.voxel_size
    }

    /// Duration of one time bin, in seconds.
    pub fn bin_width(&self) -> f32 {
        self.bin_width
    }

    pub fn speed_of_sound(&self) -> f32 {
        self.speed_of_sound
    }

    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// Integer voxel coordinates of a world position, clamped to the grid.
    pub fn voxel_index(&self, position: &Point3<f32>) -> [usize; 3] {
        let mut index = [0; 3];
        for (axis, i) in index.iter_mut().enumerate() {
            let cell = ((position[axis] - self.origin[axis]) / self.voxel_size).floor();
            let last = (self.grid_dimensions[axis] - 1) as f32;
            // NaN saturates to 0 in the cast
            *i = cell.clamp(0.0, last) as usize;
        }
        index
    }

    /// Flat voxel id, `x + y * gx + z * gx * gy`.
    pub fn voxel_id(&self, index: [usize; 3]) -> usize {
        let [gx, gy, _] = self.grid_dimensions;
        index[0] + index[1] * gx + index[2] * gx * gy
    }

    /// Time bin of a wavefront that has travelled `distance` metres.
    ///
    /// Computed in `f64`. A bin that is not finite or does not fit in a `usize`
    /// can never be stored and is reported as an allocation failure.
    pub fn time_bin(&self, distance: f32) -> Result<usize> {
        let seconds = distance as f64 / self.speed_of_sound as f64;
        let bin = (seconds / self.bin_width as f64).floor().max(0.0);
        if !bin.is_finite() || bin >= usize::MAX as f64 {
            return Err(SimError::AllocationFailure(format!(
                "arrival after {} m falls in time bin {}",
                distance, bin
            )));
        }
        Ok(bin as usize)
    }

    /// Adds `energy` arriving at `position` after travelling `distance`.
    pub fn deposit(&mut self, position: &Point3<f32>, distance: f32, energy: f32) -> Result<()> {
        let id = self.voxel_id(self.voxel_index(position));
        let bin = self.time_bin(distance)?;
        self.voxels[id].add(bin, energy)?;
        // `add` succeeded, so `bin + 1` fits
        self.num_bins = self.num_bins.max(bin + 1);
        Ok(())
    }

    /// One past the highest bin written in any voxel.
    pub fn bin_count(&self) -> usize {
        self.num_bins
    }

    /// Energy in `bin` of voxel `voxel_id`; zero if either is out of range.
    pub fn energy_at(&self, voxel_id: usize, bin: usize) -> f32 {
        self.voxels
            .get(voxel_id)
            .map_or(0.0, |voxel| voxel.energy_at(bin))
    }

    pub fn voxel(&self, voxel_id: usize) -> Option<&Voxel> {
        self.voxels.get(voxel_id)
    }

    /// `(voxel_id, energy)` for every voxel holding positive energy in `bin`,
    /// in ascending voxel id order.
    pub fn frame(&self, bin: usize) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.voxels
            .iter()
            .enumerate()
            .map(move |(id, voxel)| (id, voxel.energy_at(bin)))
            .filter(|&(_, energy)| energy > 0.0)
    }

    pub fn total_energy(&self) -> f32 {
        self.voxels.iter().map(Voxel::total).sum()
    }

    fn same_shape(&self, other: &Self) -> bool {
        self.grid_dimensions == other.grid_dimensions
            && self.origin == other.origin
            && self.voxel_size == other.voxel_size
            && self.bin_width == other.bin_width
            && self.speed_of_sound == other.speed_of_sound
    }

    /// Adds another grid of the same shape into this one, bin by bin.
    pub fn merge(&mut self, other: &EnergyGrid) -> Result<()> {
        if !self.same_shape(other) {
            return Err(SimError::invalid(format!(
                "cannot merge grid {:?} (voxel {}) into grid {:?} (voxel {})",
                other.grid_dimensions, other.voxel_size, self.grid_dimensions, self.voxel_size
            )));
        }

        for (mine, theirs) in self.voxels.iter_mut().zip(&other.voxels) {
            for (bin, &energy) in theirs.bins.iter().enumerate() {
                mine.add(bin, energy)?;
            }
        }
        self.num_bins = self.num_bins.max(other.num_bins);
        Ok(())
    }
}
