use std::path::Path;

use acoustic_trace::geom::Mesh;
use acoustic_trace::output;
use acoustic_trace::scene::Scene;
use acoustic_trace::settings;
use acoustic_trace::simulation::Simulation;
use anyhow::{Context, Result};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = settings::load_config()?;
    log::info!("{}", config.simulation);

    let mesh = Mesh::from_file(&config.geom_name)
        .with_context(|| format!("loading geometry {}", config.geom_name))?;
    let scene = Scene::new(&mesh, config.scene.clone())?;
    let mut simulation = Simulation::new(&scene, config.simulation.clone())?;

    let results = simulation.run()?;
    println!("{}", results);

    let directory: &Path = &config.directory;
    output::write_frames(simulation.grid(), directory)?;
    output::write_summary(&simulation, directory)?;
    output::write_settings(&config, directory)?;
    if config.simulation.record_paths {
        output::write_paths(&simulation, directory)?;
    }

    Ok(())
}
