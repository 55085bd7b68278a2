//! The simulation orchestrator.
//!
//! A [`Simulation`] partitions the scene's triangles once, emits the source
//! rays, and then traces every ray through the trace-bounce-deposit loop in
//! parallel. Each rayon worker accumulates into its own partial
//! [`EnergyGrid`]; the partials are summed element-wise at the end, so no two
//! threads ever write to the same grid.
//!
//! # Lifecycle
//!
//! `Created` → `Running` → `Completed`, or `Failed` if tracing returns an
//! error. A simulation runs at most once.

use std::fmt;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::budget::EnergyBudget;
use crate::error::{Result, SimError};
use crate::ray::{Ray, RayHit, RayPath, Termination};
use crate::result::Results;
use crate::scene::Scene;
use crate::settings::Settings;
use crate::trigroup::TriangleGroups;
use crate::voxel::EnergyGrid;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Mesh;
    use crate::scene::{Material, SceneConfig, Source};
    use nalgebra::Vector3;

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

    /// Two facing floors at z = 0 and z = 1 that trap a vertical ray.
    fn parallel_plates() -> Mesh {
        Mesh::new(
            vec![
                Point3::new(-1.0, -1.0, 0.0),
                Point3::new(1.0, -1.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(-1.0, -1.0, 1.0),
                Point3::new(1.0, -1.0, 1.0),
                Point3::new(0.0, 1.0, 1.0),
            ],
            vec![0, 1, 2, 3, 4, 5],
            vec![],
        )
        .unwrap()
    }

    fn settings() -> Settings {
        Settings {
            num_rays: 1,
            max_bounces: 10,
            min_energy: 0.0,
            seed: Some(1),
            progress: false,
            record_paths: true,
            ..Settings::default()
        }
    }

    fn beam(mesh: &Mesh, origin: Point3<f32>, material: Material) -> Scene<'_> {
        Scene::new(
            mesh,
            SceneConfig {
                material,
                sources: vec![Source::directed(origin, -Vector3::z())],
            },
        )
        .unwrap()
    }

    #[test]
    fn single_bounce_off_floor() {
        let mesh = floor();
        let scene = beam(&mesh, Point3::new(0.0, 0.0, 2.0), Material::Concrete);
        let sim = Simulation::new(&scene, settings()).unwrap();

        let outcome = sim.trace(&sim.rays()[0]).unwrap();
        assert_eq!(outcome.path.num_bounces(), 1);
        assert_eq!(outcome.path.termination, Some(Termination::Escaped));
        assert_eq!(outcome.deposits.len(), 1);
        assert!((outcome.deposits[0].distance - 2.0).abs() < 1e-5);
        assert_eq!(outcome.deposits[0].energy, 100.0);

        let up = &outcome.path.segments()[1];
        assert!((up.direction - Vector3::z()).norm() < 1e-6);
        assert!((up.energy - 98.0).abs() < 1e-4);
        assert!(outcome.budget.missing().abs() < 1e-4);
    }

    #[test]
    fn bounce_limit_terminates_trapped_ray() {
        let mesh = parallel_plates();
        let scene = beam(&mesh, Point3::new(0.0, 0.0, 0.5), Material::Glass);
        let sim = Simulation::new(
            &scene,
            Settings {
                max_bounces: 7,
                ..settings()
            },
        )
        .unwrap();

        let outcome = sim.trace(&sim.rays()[0]).unwrap();
        assert_eq!(outcome.termination(), Termination::MaxBounces);
        assert_eq!(outcome.path.num_bounces(), 7);
        assert_eq!(outcome.deposits.len(), 7);
        assert!(outcome.budget.trnc_bounces > 0.0);
        assert!(outcome.budget.missing().abs() < 1e-3);
    }

    #[test]
    fn energy_threshold_terminates_trapped_ray() {
        let mesh = parallel_plates();
        let scene = beam(&mesh, Point3::new(0.0, 0.0, 0.5), Material::Fabric);
        let sim = Simulation::new(
            &scene,
            Settings {
                max_bounces: 100,
                min_energy: 10.0,
                ..settings()
            },
        )
        .unwrap();

        // 100, 50, 25, 12.5, 6.25: four hits before dropping under 10
        let outcome = sim.trace(&sim.rays()[0]).unwrap();
        assert_eq!(outcome.termination(), Termination::EnergyExhausted);
        assert_eq!(outcome.path.num_bounces(), 4);
        assert!((outcome.budget.trnc_energy - 6.25).abs() < 1e-4);
        assert!(outcome.budget.missing().abs() < 1e-3);
    }

    #[test]
    fn run_once_only() {
        let mesh = floor();
        let scene = beam(&mesh, Point3::new(0.0, 0.0, 2.0), Material::Plastic);
        let mut sim = Simulation::new(&scene, settings()).unwrap();
        assert_eq!(sim.state(), SimulationState::Created);

        sim.run().unwrap();
        assert_eq!(sim.state(), SimulationState::Completed);
        assert!(matches!(sim.run(), Err(SimError::InvalidArgument(_))));
        assert_eq!(sim.state(), SimulationState::Completed);
    }

    #[test]
    fn parallel_run_matches_single_traces() {
        let mesh = parallel_plates();
        let scene = Scene::new(
            &mesh,
            SceneConfig {
                material: Material::Wood,
                sources: vec![Source::omni(Point3::new(0.1, -0.2, 0.5))],
            },
        )
        .unwrap();
        let mut sim = Simulation::new(
            &scene,
            Settings {
                num_rays: 97,
                seed: Some(5),
                ..settings()
            },
        )
        .unwrap();

        let outcomes: Vec<TraceOutcome> = sim
            .rays()
            .iter()
            .map(|ray| sim.trace(ray).unwrap())
            .collect();
        let hits: usize = outcomes.iter().map(|o| o.path.num_bounces()).sum();
        let deposited: f32 = outcomes
            .iter()
            .flat_map(|o| o.deposits.iter().map(|d| d.energy))
            .sum();

        let results = sim.run().unwrap().clone();
        assert_eq!(results.num_rays(), 97);
        assert_eq!(results.hits, hits);
        assert!((sim.grid().total_energy() - deposited).abs() < 1e-3 * deposited.max(1.0));
        let ids: Vec<u32> = results.paths.iter().map(|p| p.ray_id).collect();
        assert_eq!(ids, (0..97).collect::<Vec<_>>());
    }

    #[test]
    fn rays_emitted_per_source() {
        let mesh = floor();
        let scene = Scene::new(
            &mesh,
            SceneConfig {
                material: Material::Plastic,
                sources: vec![
                    Source::omni(Point3::new(0.0, 0.0, 1.0)),
                    Source::omni(Point3::new(0.5, 0.0, 1.0)),
                ],
            },
        )
        .unwrap();
        let sim = Simulation::new(
            &scene,
            Settings {
                num_rays: 5,
                ..settings()
            },
        )
        .unwrap();

        let ids: Vec<u32> = sim.rays().iter().map(|r| r.ray_id).collect();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert!(sim.rays()[5..].iter().all(|r| r.origin.x == 0.5));
    }

    #[test]
    fn invalid_settings_allocate_nothing() {
        let mesh = floor();
        let scene = beam(&mesh, Point3::new(0.0, 0.0, 2.0), Material::Plastic);
        for bad in [
            Settings { fps: 0, ..settings() },
            Settings { voxel_size: 0.0, ..settings() },
            Settings { voxel_size: -1.0, ..settings() },
        ] {
            assert!(matches!(
                Simulation::new(&scene, bad),
                Err(SimError::InvalidArgument(_))
            ));
        }
    }
}

/// Lifecycle state of a [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationState {
    Created,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SimulationState::Created => "created",
            SimulationState::Running => "running",
            SimulationState::Completed => "completed",
            SimulationState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Energy arriving at a surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deposit {
    pub position: Point3<f32>,
    /// Path length from the source to `position`.
    pub distance: f32,
    pub energy: f32,
}

/// The result of tracing one ray to termination.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceOutcome {
    pub path: RayPath,
    /// One deposit per hit, in path order.
    pub deposits: Vec<Deposit>,
    pub budget: EnergyBudget,
}

impl TraceOutcome {
    pub fn termination(&self) -> Termination {
        // `trace` always terminates the path before returning
        self.path.termination.unwrap_or(Termination::Escaped)
    }
}

/// Per-worker accumulator for the parallel trace.
#[derive(Default)]
struct Tally {
    grid: Option<EnergyGrid>,
    results: Results,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Result<Tally> {
        self.grid = match (self.grid, other.grid) {
            (Some(mut a), Some(b)) => {
                a.merge(&b)?;
                Some(a)
            }
            (a, b) => a.or(b),
        };
        self.results.merge(other.results);
        Ok(self)
    }
}

/// A simulation over a borrowed scene.
pub struct Simulation<'s> {
    scene: &'s Scene<'s>,
    settings: Settings,
    groups: TriangleGroups,
    grid: EnergyGrid,
    rays: Vec<Ray>,
    state: SimulationState,
    results: Results,
}

impl<'s> Simulation<'s> {
    /// Validates `settings`, partitions the scene, allocates the grid and
    /// emits `num_rays` rays from every source.
    pub fn new(scene: &'s Scene<'s>, settings: Settings) -> Result<Self> {
        settings.validate()?;

        let grid = EnergyGrid::new(
            scene.aabb(),
            settings.voxel_size,
            settings.fps,
            settings.speed_of_sound,
        )?;
        log::debug!(
            "grid of {:?} voxels ({} total), bin width {:.6} s",
            grid.grid_dimensions(),
            grid.num_voxels(),
            grid.bin_width()
        );

        let groups = TriangleGroups::build(scene.triangles()?, settings.group_size)?;
        log::info!(
            "partitioned {} triangles into {} groups (largest {})",
            groups.num_triangles(),
            groups.len(),
            groups.largest_group()
        );

        let rays = emit_rays(scene, &settings)?;

        log::info!("simulation {}: {} rays", SimulationState::Created, rays.len());

        Ok(Self {
            scene,
            settings,
            groups,
            grid,
            rays,
            state: SimulationState::Created,
            results: Results::new(),
        })
    }

    /// Traces every ray to termination and accumulates the energy grid.
    pub fn run(&mut self) -> Result<&Results> {
        if self.state != SimulationState::Created {
            return Err(SimError::invalid(format!(
                "simulation cannot run from state {}",
                self.state
            )));
        }
        self.state = SimulationState::Running;
        log::info!("simulation {}", self.state);

        let start = Instant::now();
        match self.trace_all() {
            Ok(tally) => {
                if let Some(partial) = tally.grid {
                    if let Err(e) = self.grid.merge(&partial) {
                        return Err(self.fail(e));
                    }
                }
                self.results = tally.results;
                self.results.paths.sort_by_key(|path| path.ray_id);
                self.results.elapsed = start.elapsed();
                self.state = SimulationState::Completed;

                log::info!(
                    "simulation {}: {} rays, {} hits, {} bins in {:.2?}",
                    self.state,
                    self.results.num_rays(),
                    self.results.hits,
                    self.grid.bin_count(),
                    self.results.elapsed
                );
                log::debug!("{}", self.results.budget);
                Ok(&self.results)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn fail(&mut self, error: SimError) -> SimError {
        self.state = SimulationState::Failed;
        log::error!("simulation {}: {}", self.state, error);
        error
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.settings.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(self.rays.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>7}/{len:7} {msg} ETA: {eta_precise}",
        ) {
            pb.set_style(style.progress_chars("█▇▆▅▄▃▂▁"));
        }
        pb.set_message("rays".to_string());
        pb
    }

    fn trace_all(&self) -> Result<Tally> {
        let pb = self.progress_bar();
        // one chunk per worker, so at most that many partial grids exist
        let chunk = self
            .rays
            .len()
            .div_ceil(rayon::current_num_threads())
            .max(1);

        let tally = self
            .rays
            .par_chunks(chunk)
            .map(|rays| {
                let mut tally = Tally::default();
                for ray in rays {
                    self.trace_into(ray, &mut tally)?;
                    pb.inc(1);
                }
                Ok::<_, SimError>(tally)
            })
            .try_reduce(Tally::default, Tally::merge)?;

        pb.finish_and_clear();
        Ok(tally)
    }

    fn trace_into(&self, ray: &Ray, tally: &mut Tally) -> Result<()> {
        let partial = &mut tally.grid;
        let (path, budget) = self.follow(ray, |hit, distance, energy| {
            if partial.is_none() {
                *partial = Some(self.grid.empty_like()?);
            }
            match partial.as_mut() {
                Some(grid) => grid.deposit(&hit.position, distance, energy),
                None => Ok(()),
            }
        })?;

        let results = &mut tally.results;
        results.hits += path.num_bounces();
        results.budget += budget;
        results.terminations.record(path.termination.unwrap_or(Termination::Escaped));
        if self.settings.record_paths {
            results.paths.push(path);
        }
        Ok(())
    }

    /// Traces a single ray without touching the simulation's grid, returning
    /// its bounce chain and the deposits it would make.
    pub fn trace(&self, ray: &Ray) -> Result<TraceOutcome> {
        let mut deposits = Vec::new();
        let (path, budget) = self.follow(ray, |hit, distance, energy| {
            deposits.push(Deposit {
                position: hit.position,
                distance,
                energy,
            });
            Ok(())
        })?;
        Ok(TraceOutcome {
            path,
            deposits,
            budget,
        })
    }

    /// The trace-bounce loop. `on_hit` receives each hit with the total path
    /// length at arrival and the energy arriving there.
    fn follow<F>(&self, ray: &Ray, mut on_hit: F) -> Result<(RayPath, EnergyBudget)>
    where
        F: FnMut(&RayHit, f32, f32) -> Result<()>,
    {
        let absorption = self.scene.material().absorption();
        let mut budget = EnergyBudget {
            emitted: ray.energy,
            ..EnergyBudget::new()
        };
        let mut path = RayPath::new(ray.clone());

        let reason = loop {
            let current = path.last();
            if current.energy < self.settings.min_energy {
                break Termination::EnergyExhausted;
            }
            if current.bounce_count >= self.settings.max_bounces {
                break Termination::MaxBounces;
            }
            let Some(hit) = self.groups.intersect(current) else {
                break Termination::Escaped;
            };

            on_hit(&hit, current.total_distance + hit.distance, current.energy)?;
            budget.deposited += current.energy;

            let next = current.continuation(&hit, absorption);
            budget.absorbed += current.energy - next.energy;
            path.push(next);
        };

        budget.terminate(reason, path.last().energy);
        path.terminate(reason);
        Ok((path, budget))
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn scene(&self) -> &Scene<'s> {
        self.scene
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn grid(&self) -> &EnergyGrid {
        &self.grid
    }

    pub fn bin_count(&self) -> usize {
        self.grid.bin_count()
    }

    /// Energy in `bin` of voxel `voxel_id`; zero if unset.
    pub fn energy_at(&self, voxel_id: usize, bin: usize) -> f32 {
        self.grid.energy_at(voxel_id, bin)
    }

    /// Results of the last run. Empty until the simulation has completed.
    pub fn results(&self) -> &Results {
        &self.results
    }

    pub fn groups(&self) -> &TriangleGroups {
        &self.groups
    }

    /// The emitted rays, in id order.
    pub fn rays(&self) -> &[Ray] {
        &self.rays
    }
}

fn emit_rays(scene: &Scene, settings: &Settings) -> Result<Vec<Ray>> {
    let total = (settings.num_rays as usize)
        .checked_mul(scene.num_sources())
        .filter(|&n| n <= u32::MAX as usize)
        .ok_or_else(|| {
            SimError::invalid(format!(
                "{} rays for each of {} sources exceeds the ray id range",
                settings.num_rays,
                scene.num_sources()
            ))
        })?;

    let mut rays = Vec::new();
    rays.try_reserve_exact(total)
        .map_err(|e| SimError::alloc("ray set", e))?;

    let mut rng = match settings.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    for (i, source) in scene.sources().iter().enumerate() {
        if !scene.aabb().contains_point(&source.position) {
            log::warn!(
                "source {} at {} lies outside the scene bounds, its rays may escape unreflected",
                i,
                source.position
            );
        }
        let first_id = i as u32 * settings.num_rays;
        rays.extend(source.emit(settings.num_rays, first_id, settings.max_energy, &mut rng));
    }

    Ok(rays)
}
