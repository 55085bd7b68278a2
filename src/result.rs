//! Aggregated outcome of a simulation run.

use std::fmt;
use std::time::Duration;

use crate::budget::{EnergyBudget, TerminationCounts};
use crate::ray::RayPath;


/// Bookkeeping collected while tracing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    pub budget: EnergyBudget,
    pub terminations: TerminationCounts,
    /// Total number of ray-surface intersections.
    pub hits: usize,
    /// Bounce chains, ordered by ray id. Empty unless paths are recorded.
    pub paths: Vec<RayPath>,
    /// Wall-clock time spent tracing.
    pub elapsed: Duration,
}

impl Results {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds another partial result into this one. Elapsed times are not summed.
    pub fn merge(&mut self, other: Results) {
        self.budget += other.budget;
        self.terminations += other.terminations;
        self.hits += other.hits;
        self.paths.extend(other.paths);
    }

    pub fn num_rays(&self) -> usize {
        self.terminations.total()
    }

    pub fn mean_bounces(&self) -> f32 {
        match self.num_rays() {
            0 => 0.0,
            n => self.hits as f32 / n as f32,
        }
    }
}

impl fmt::Display for Results {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Results:")?;
        writeln!(f, "  Rays traced: {}", self.num_rays())?;
        writeln!(f, "  Hits: {}", self.hits)?;
        writeln!(f, "  Mean bounces: {:.3}", self.mean_bounces())?;
        writeln!(
            f,
            "  Terminations: {} exhausted, {} bounce limit, {} escaped",
            self.terminations.energy_exhausted,
            self.terminations.max_bounces,
            self.terminations.escaped
        )?;
        writeln!(f, "  Time taken: {:.2?}", self.elapsed)?;
        write!(f, "{}", self.budget)
    }
}
