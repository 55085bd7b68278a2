use std::path::PathBuf;

use acoustic_trace::{
    error::SimError,
    geom::Mesh,
    output,
    ray::Termination,
    scene::{Material, Scene, SceneConfig, Source},
    settings::{self, Settings},
    simulation::{Simulation, SimulationState},
};
use nalgebra::{Point3, Vector3};

// Relative tolerance for energy bookkeeping sums
const TOL: f32 = 1e-3;

fn floor() -> Mesh {
    Mesh::new(
        vec![
            Point3::new(-1.0, -1.0, 0.0),
            Point3::new(1.0, -1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ],
        vec![0, 1, 2],
        vec![],
    )
    .unwrap()
}

fn box_room() -> Mesh {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets/box_room.obj");
    Mesh::from_file(path.to_str().unwrap()).unwrap()
}

fn quiet(settings: Settings) -> Settings {
    Settings {
        progress: false,
        ..settings
    }
}

fn downward_beam(mesh: &Mesh) -> Scene<'_> {
    Scene::new(
        mesh,
        SceneConfig {
            material: Material::Plastic,
            sources: vec![Source::directed(
                Point3::new(0.0, 0.0, 2.0),
                Vector3::new(0.0, 0.0, -1.0),
            )],
        },
    )
    .unwrap()
}

#[test]
fn floor_single_ray() {
    let mesh = floor();
    let scene = downward_beam(&mesh);
    let settings = quiet(Settings {
        fps: 60,
        voxel_size: 1.0,
        num_rays: 1,
        max_bounces: 10,
        min_energy: 0.0,
        record_paths: true,
        ..Settings::default()
    });
    let mut simulation = Simulation::new(&scene, settings).unwrap();
    let results = simulation.run().unwrap().clone();

    // exactly one intersection, then the reflected ray escapes
    assert_eq!(results.hits, 1);
    assert_eq!(results.terminations.escaped, 1);

    // the impact voxel holds energy in bin 0
    let grid = simulation.grid();
    assert_eq!(grid.time_bin(2.0).unwrap(), 0);
    let impact = grid.voxel_id(grid.voxel_index(&Point3::origin()));
    assert!(simulation.energy_at(impact, 0) > 0.0);
    assert_eq!(simulation.bin_count(), 1);

    // the continuation is the vertical mirror of the incoming direction
    let path = &results.paths[0];
    assert_eq!(path.segments().len(), 2);
    let incoming = path.segments()[0].direction;
    let outgoing = path.segments()[1].direction;
    assert!((outgoing - Vector3::new(incoming.x, incoming.y, -incoming.z)).norm() < 1e-6);
    assert_eq!(path.termination, Some(Termination::Escaped));
}

#[test]
fn coincident_deposits_sum() {
    let mesh = floor();
    let scene = downward_beam(&mesh);
    let one = |num_rays| {
        let mut simulation = Simulation::new(
            &scene,
            quiet(Settings {
                num_rays,
                ..Settings::default()
            }),
        )
        .unwrap();
        simulation.run().unwrap();
        let grid = simulation.grid();
        simulation.energy_at(grid.voxel_id(grid.voxel_index(&Point3::origin())), 0)
    };

    let single = one(1);
    assert!(single > 0.0);
    assert!((one(3) - 3.0 * single).abs() < 1e-4);
}

#[test]
fn box_room_accounts_for_all_energy() {
    let mut config = settings::load_default_config().unwrap();
    config.simulation.num_rays = 200;
    config.simulation.seed = Some(7);
    config.simulation.record_paths = true;

    let mesh = box_room();
    assert_eq!(mesh.num_triangles(), 12);
    let scene = Scene::new(&mesh, config.scene.clone()).unwrap();
    let mut simulation = Simulation::new(&scene, quiet(config.simulation.clone())).unwrap();
    let results = simulation.run().unwrap().clone();

    let emitted = 200.0 * config.simulation.max_energy;
    assert!((results.budget.emitted - emitted).abs() < TOL * emitted);
    assert!(results.budget.missing().abs() < TOL * emitted);
    assert_eq!(results.num_rays(), 200);
    assert_eq!(results.paths.len(), 200);
    assert!(results.hits > 0);

    // everything deposited is in the grid
    let total = simulation.grid().total_energy();
    assert!((total - results.budget.deposited).abs() < TOL * total);
    assert!(simulation.bin_count() > 0);

    // energy never increases along a chain; distance and bounces never decrease
    for path in &results.paths {
        assert!(path.segments().len() as u32 <= config.simulation.max_bounces + 1);
        for pair in path.segments().windows(2) {
            assert!(pair[1].energy <= pair[0].energy);
            assert!(pair[1].total_distance >= pair[0].total_distance);
            assert_eq!(pair[1].bounce_count, pair[0].bounce_count + 1);
        }
    }
}

#[test]
fn closed_room_keeps_every_ray() {
    let mesh = box_room();
    let mut config = settings::load_default_config().unwrap();
    config.simulation.num_rays = 500;
    config.simulation.max_bounces = 40;
    config.simulation.min_energy = 0.0;
    config.simulation.seed = Some(3);

    // the centre, a corner and the opposite corner, just inside the walls
    for position in [
        Point3::new(2.0, 1.5, 1.2),
        Point3::new(0.3, 0.2, 0.1),
        Point3::new(3.99, 2.99, 2.49),
    ] {
        let scene = Scene::new(
            &mesh,
            SceneConfig {
                material: Material::Concrete,
                sources: vec![Source::omni(position)],
            },
        )
        .unwrap();
        let mut simulation = Simulation::new(&scene, quiet(config.simulation.clone())).unwrap();
        let results = simulation.run().unwrap();

        assert_eq!(results.terminations.escaped, 0, "rays escaped from {}", position);
        assert_eq!(results.terminations.max_bounces, 500);
        assert_eq!(results.hits, 500 * 40);
        assert_eq!(results.budget.escaped, 0.0);
    }
}

#[test]
fn seeded_runs_emit_identical_rays() {
    let mesh = box_room();
    let mut config = settings::load_default_config().unwrap();
    config.simulation.num_rays = 50;
    config.simulation.seed = Some(11);
    let scene = Scene::new(&mesh, config.scene.clone()).unwrap();

    let mut a = Simulation::new(&scene, quiet(config.simulation.clone())).unwrap();
    let mut b = Simulation::new(&scene, quiet(config.simulation.clone())).unwrap();
    assert_eq!(a.rays(), b.rays());

    let hits_a = a.run().unwrap().hits;
    let hits_b = b.run().unwrap().hits;
    assert_eq!(hits_a, hits_b);
    let (ta, tb) = (a.grid().total_energy(), b.grid().total_energy());
    assert!((ta - tb).abs() < TOL * ta);
}

#[test]
fn second_run_is_rejected() {
    let mesh = floor();
    let scene = downward_beam(&mesh);
    let mut simulation = Simulation::new(&scene, quiet(Settings::default())).unwrap();
    simulation.run().unwrap();
    assert!(matches!(simulation.run(), Err(SimError::InvalidArgument(_))));
    assert_eq!(simulation.state(), SimulationState::Completed);
}

#[test]
fn invalid_inputs_fail_fast() {
    // mesh provider arrays
    assert!(matches!(
        Mesh::new(vec![Point3::origin()], vec![0, 0], vec![]),
        Err(SimError::InvalidArgument(_))
    ));

    // scene without sources
    let mesh = floor();
    assert!(matches!(
        Scene::new(&mesh, SceneConfig::default()),
        Err(SimError::InvalidArgument(_))
    ));

    // non-positive fps and voxel size
    let scene = downward_beam(&mesh);
    for settings in [
        Settings { fps: 0, ..Settings::default() },
        Settings { voxel_size: 0.0, ..Settings::default() },
        Settings { voxel_size: -0.5, ..Settings::default() },
    ] {
        assert!(matches!(
            Simulation::new(&scene, settings),
            Err(SimError::InvalidArgument(_))
        ));
    }
}

#[test]
fn frames_are_written() {
    let mesh = floor();
    let scene = downward_beam(&mesh);
    let mut simulation = Simulation::new(
        &scene,
        quiet(Settings {
            num_rays: 1,
            ..Settings::default()
        }),
    )
    .unwrap();
    simulation.run().unwrap();

    let dir = std::env::temp_dir().join(format!("acoustic-trace-it-{}", std::process::id()));
    let frames = output::write_frames(simulation.grid(), &dir).unwrap();
    let summary = output::write_summary(&simulation, &dir).unwrap();

    let frames: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(frames).unwrap()).unwrap();
    let grid = simulation.grid();
    let impact = grid.voxel_id(grid.voxel_index(&Point3::origin())).to_string();
    let frame_0 = frames["frame_0"].as_array().unwrap();
    assert_eq!(frame_0.len(), 1);
    assert!(frame_0[0][impact.as_str()].as_f64().unwrap() > 0.0);

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
    assert_eq!(summary["hits"], 1);
    assert_eq!(summary["state"], "completed");

    std::fs::remove_dir_all(&dir).unwrap();
}
