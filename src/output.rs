//! Writing simulation results to disk.
//!
//! - `frames.json`: per time bin, the voxels holding energy in that bin
//! - `summary.json`: grid metadata, energy budget and termination counts
//! - `settings.toml`: the effective configuration of the run
//! - `paths.json`: the bounce chains, when paths were recorded

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::budget::{EnergyBudget, TerminationCounts};
use crate::settings::RunConfig;
use crate::simulation::Simulation;
use crate::voxel::EnergyGrid;


/// Serialises a grid as `{"frame_<bin>": [{"<voxel_id>": energy}, ...], ...}`
/// with one entry per bin below `bin_count()`, in bin order.
pub struct Frames<'a>(pub &'a EnergyGrid);

struct Frame<'a> {
    grid: &'a EnergyGrid,
    bin: usize,
}

struct VoxelEnergy {
    voxel_id: usize,
    energy: f32,
}

impl Serialize for Frames<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let grid = self.0;
        let mut map = serializer.serialize_map(Some(grid.bin_count()))?;
        for bin in 0..grid.bin_count() {
            map.serialize_entry(&format!("frame_{}", bin), &Frame { grid, bin })?;
        }
        map.end()
    }
}

impl Serialize for Frame<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for (voxel_id, energy) in self.grid.frame(self.bin) {
            seq.serialize_element(&VoxelEnergy { voxel_id, energy })?;
        }
        seq.end()
    }
}

impl Serialize for VoxelEnergy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.voxel_id.to_string(), &self.energy)?;
        map.end()
    }
}

#[derive(Serialize)]
struct GridSummary {
    origin: [f32; 3],
    dimensions: [f32; 3],
    grid_dimensions: [usize; 3],
    voxel_size: f32,
    bin_width: f32,
    speed_of_sound: f32,
    num_voxels: usize,
    bin_count: usize,
    total_energy: f32,
}

#[derive(Serialize)]
struct Summary {
    timestamp: String,
    state: String,
    num_triangles: usize,
    num_groups: usize,
    largest_group: usize,
    num_rays: usize,
    hits: usize,
    elapsed_secs: f64,
    grid: GridSummary,
    budget: EnergyBudget,
    missing: f32,
    terminations: TerminationCounts,
}

fn create_in(directory: &Path, name: &str) -> Result<(PathBuf, BufWriter<File>)> {
    fs::create_dir_all(directory)
        .with_context(|| format!("creating output directory {:?}", directory))?;
    let path = directory.join(name);
    let file = File::create(&path).with_context(|| format!("creating {:?}", path))?;
    Ok((path, BufWriter::new(file)))
}

/// Writes `frames.json` into `directory`.
pub fn write_frames(grid: &EnergyGrid, directory: &Path) -> Result<PathBuf> {
    let (path, mut writer) = create_in(directory, "frames.json")?;
    serde_json::to_writer(&mut writer, &Frames(grid))?;
    writer.flush()?;
    log::info!("wrote {} frames to {:?}", grid.bin_count(), path);
    Ok(path)
}

/// Writes `summary.json` into `directory`.
pub fn write_summary(simulation: &Simulation, directory: &Path) -> Result<PathBuf> {
    let grid = simulation.grid();
    let results = simulation.results();
    let origin = grid.origin();
    let dimensions = grid.dimensions();

    let summary = Summary {
        timestamp: chrono::Local::now().to_rfc3339(),
        state: simulation.state().to_string(),
        num_triangles: simulation.groups().num_triangles(),
        num_groups: simulation.groups().len(),
        largest_group: simulation.groups().largest_group(),
        num_rays: results.num_rays(),
        hits: results.hits,
        elapsed_secs: results.elapsed.as_secs_f64(),
        grid: GridSummary {
            origin: [origin.x, origin.y, origin.z],
            dimensions: [dimensions.x, dimensions.y, dimensions.z],
            grid_dimensions: grid.grid_dimensions(),
            voxel_size: grid.voxel_size(),
            bin_width: grid.bin_width(),
            speed_of_sound: grid.speed_of_sound(),
            num_voxels: grid.num_voxels(),
            bin_count: grid.bin_count(),
            total_energy: grid.total_energy(),
        },
        budget: results.budget,
        missing: results.budget.missing(),
        terminations: results.terminations,
    };

    let (path, mut writer) = create_in(directory, "summary.json")?;
    serde_json::to_writer_pretty(&mut writer, &summary)?;
    writer.flush()?;
    log::info!("wrote summary to {:?}", path);
    Ok(path)
}

/// Writes the effective configuration as `settings.toml` into `directory`.
pub fn write_settings(config: &RunConfig, directory: &Path) -> Result<PathBuf> {
    let text = toml::to_string_pretty(config).context("serialising settings")?;
    let (path, mut writer) = create_in(directory, "settings.toml")?;
    writer.write_all(text.as_bytes())?;
    writer.flush()?;
    Ok(path)
}

/// Writes the recorded bounce chains as `paths.json` into `directory`.
pub fn write_paths(simulation: &Simulation, directory: &Path) -> Result<PathBuf> {
    let (path, mut writer) = create_in(directory, "paths.json")?;
    serde_json::to_writer(&mut writer, &simulation.results().paths)?;
    writer.flush()?;
    log::info!(
        "wrote {} ray paths to {:?}",
        simulation.results().paths.len(),
        path
    );
    Ok(path)
}
