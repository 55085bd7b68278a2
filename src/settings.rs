//! Runtime configuration.
//!
//! Configuration is read from `config/default.toml` (or `config/local.toml`
//! when present) under the project root, overlaid with `ACOUSTIC_TRACE__*`
//! environment variables, and finally with command line flags.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_GROUP_SIZE, DEFAULT_SPEED_OF_SOUND, RAY_MAX_ENERGY};
use crate::error::{self, SimError};
use crate::scene::{Material, SceneConfig};


/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Time bins per second.
    pub fps: u32,
    /// Rays emitted per source.
    pub num_rays: u32,
    /// Edge length of a grid voxel, in scene units (metres).
    pub voxel_size: f32,
    /// Reflections after which a ray is truncated.
    pub max_bounces: u32,
    /// Energy below which a ray is truncated.
    pub min_energy: f32,
    /// Energy of a freshly emitted ray.
    #[serde(default = "default_max_energy")]
    pub max_energy: f32,
    /// Propagation speed in metres per second, used for time binning.
    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound: f32,
    /// Maximum triangles per leaf group of the partition.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    /// Seed for source emission. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Keep the full bounce chain of every ray in the results.
    #[serde(default)]
    pub record_paths: bool,
    /// Show a progress bar while tracing.
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_max_energy() -> f32 {
    RAY_MAX_ENERGY
}

fn default_speed_of_sound() -> f32 {
    DEFAULT_SPEED_OF_SOUND
}

fn default_group_size() -> usize {
    DEFAULT_GROUP_SIZE
}

fn default_progress() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fps: 60,
            num_rays: 1000,
            voxel_size: 1.0,
            max_bounces: 50,
            min_energy: 0.01,
            max_energy: RAY_MAX_ENERGY,
            speed_of_sound: DEFAULT_SPEED_OF_SOUND,
            group_size: DEFAULT_GROUP_SIZE,
            seed: None,
            record_paths: false,
            progress: true,
        }
    }
}

fn positive(name: &str, value: f32) -> error::Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(SimError::invalid(format!("{} must be positive, got {}", name, value)))
    }
}

impl Settings {
    pub fn validate(&self) -> error::Result<()> {
        if self.fps == 0 {
            return Err(SimError::invalid("fps must be at least 1"));
        }
        if self.num_rays == 0 {
            return Err(SimError::invalid("number of rays must be at least 1"));
        }
        if self.group_size == 0 {
            return Err(SimError::invalid("group size must be at least 1"));
        }
        positive("voxel size", self.voxel_size)?;
        positive("maximum ray energy", self.max_energy)?;
        positive("speed of sound", self.speed_of_sound)?;
        if !(self.min_energy.is_finite() && self.min_energy >= 0.0) {
            return Err(SimError::invalid(format!(
                "minimum energy must be non-negative, got {}",
                self.min_energy
            )));
        }
        Ok(())
    }

    /// Duration of one time bin, in seconds.
    pub fn bin_width(&self) -> f32 {
        1.0 / self.fps as f32
    }
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - FPS: {}
  - Rays per source: {}
  - Voxel size: {:.6}
  - Max bounces: {}
  - Min energy: {:.6}
  - Max energy: {:.6}
  - Speed of sound: {:.3}
  - Group size: {}
  - Seed: {:?}
  ",
            self.fps,
            self.num_rays,
            self.voxel_size,
            self.max_bounces,
            self.min_energy,
            self.max_energy,
            self.speed_of_sound,
            self.group_size,
            self.seed,
        )
    }
}

/// Everything needed to run the binary: input mesh, output directory,
/// simulation settings and scene description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub geom_name: String,
    pub directory: PathBuf,
    pub simulation: Settings,
    pub scene: SceneConfig,
}

impl RunConfig {
    pub fn validate(&self) -> error::Result<()> {
        self.simulation.validate()?;
        self.scene.material.validate()?;
        if self.scene.sources.is_empty() {
            return Err(SimError::invalid("configuration lists no sources"));
        }
        Ok(())
    }
}

/// Loads `config/default.toml` only, without environment or command line
/// overrides.
pub fn load_default_config() -> anyhow::Result<RunConfig> {
    let root = retrieve_project_root()?;
    let config = read_config(&root.join("config/default.toml"), false)?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration used by the binary.
pub fn load_config() -> anyhow::Result<RunConfig> {
    let args = CliArgs::parse();

    let config_file = match &args.config {
        Some(path) => path.clone(),
        None => {
            let root = retrieve_project_root()?;
            let default_config_file = root.join("config/default.toml");
            let local_config = root.join("config/local.toml");
            if local_config.exists() {
                local_config
            } else {
                default_config_file
            }
        }
    };
    log::info!("using configuration: {:?}", config_file);

    let mut config = read_config(&config_file, true)?;
    apply_cli_overrides(&mut config, &args);
    config.validate()?;

    log::debug!("{:#?}", config);

    Ok(config)
}

fn read_config(path: &Path, with_env: bool) -> anyhow::Result<RunConfig> {
    let mut builder = Config::builder().add_source(File::from(path).required(true));
    if with_env {
        builder = builder.add_source(
            Environment::with_prefix("ACOUSTIC_TRACE")
                .separator("__")
                .try_parsing(true),
        );
    }

    builder
        .build()
        .with_context(|| format!("loading configuration from {:?}", path))?
        .try_deserialize()
        .with_context(|| format!("deserializing configuration from {:?}", path))
}

fn apply_cli_overrides(config: &mut RunConfig, args: &CliArgs) {
    if let Some(geo) = &args.geo {
        config.geom_name = geo.clone();
    }
    if let Some(dir) = &args.dir {
        config.directory = dir.clone();
    }
    if let Some(fps) = args.fps {
        config.simulation.fps = fps;
    }
    if let Some(rays) = args.rays {
        config.simulation.num_rays = rays;
    }
    if let Some(voxel_size) = args.voxel_size {
        config.simulation.voxel_size = voxel_size;
    }
    if let Some(bounces) = args.bounces {
        config.simulation.max_bounces = bounces;
    }
    if let Some(min_energy) = args.min_energy {
        config.simulation.min_energy = min_energy;
    }
    if let Some(seed) = args.seed {
        config.simulation.seed = Some(seed);
    }
    if let Some(material) = args.material {
        config.scene.material = material;
    }
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the ACOUSTIC_TRACE_ROOT environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> anyhow::Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("ACOUSTIC_TRACE_ROOT") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("failed to get current executable path")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("could not find project root directory above {:?}", exe_path))
}

#[derive(Parser, Debug)]
#[command(version, about = "Acoustic ray tracing into a voxelised energy field")]
pub struct CliArgs {
    /// File path to the input geometry.
    /// Currently, only the Wavefront .obj format is supported.
    #[arg(short, long)]
    geo: Option<String>,

    /// Time bins per second of arrival time.
    #[arg(long)]
    fps: Option<u32>,

    /// Number of rays emitted by each source.
    #[arg(short, long)]
    rays: Option<u32>,

    /// Edge length of a voxel of the energy grid.
    #[arg(long)]
    voxel_size: Option<f32>,

    /// The maximum number of reflections before a ray is truncated.
    #[arg(short, long)]
    bounces: Option<u32>,

    /// Minimum ray energy. Rays below this are truncated.
    #[arg(long)]
    min_energy: Option<f32>,

    /// Surface material: plastic, concrete, wood, glass, carpet, fabric,
    /// or an absorption coefficient between 0 and 1.
    #[arg(short, long)]
    material: Option<Material>,

    /// Random seed for source emission.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Output directory.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Configuration file to use instead of the project configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,
}
