//! Energy conservation tracking for ray tracing.
//!
//! Every unit of energy emitted by a source ends up in exactly one of four
//! sinks: absorbed by a surface, carried out of the scene by an escaping ray,
//! or left on a ray that was cut short by the energy threshold or the bounce
//! limit. The energy deposited into the grid is a record of arrivals, not a
//! sink, and is tracked separately.

use std::{fmt, ops::*};

use serde::Serialize;

use crate::ray::Termination;


/// Energy budget of a simulation run.
///
/// **Context**: With a bounce limit and an energy threshold the trace never
/// follows every ray to zero energy, so conservation is checked by accounting
/// for the energy each termination leaves behind.
///
/// **How it Works**: The trace adds each ray's starting energy to `emitted`,
/// the absorbed fraction of every reflection to `absorbed`, and the remaining
/// energy of a terminated ray to the sink matching its termination. The
/// [`missing`](EnergyBudget::missing) remainder should then be zero up to
/// floating point error.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct EnergyBudget {
    pub emitted: f32,      // energy leaving the sources
    pub deposited: f32,    // energy recorded into the grid at hits
    pub absorbed: f32,     // energy absorbed by surfaces
    pub escaped: f32,      // energy carried out of the scene
    pub trnc_energy: f32,  // energy left on rays below the threshold
    pub trnc_bounces: f32, // energy left on rays at the bounce limit
}

impl Add for EnergyBudget {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            emitted: self.emitted + other.emitted,
            deposited: self.deposited + other.deposited,
            absorbed: self.absorbed + other.absorbed,
            escaped: self.escaped + other.escaped,
            trnc_energy: self.trnc_energy + other.trnc_energy,
            trnc_bounces: self.trnc_bounces + other.trnc_bounces,
        }
    }
}

impl AddAssign for EnergyBudget {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl EnergyBudget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emitted energy not accounted for by any sink.
    pub fn missing(&self) -> f32 {
        self.emitted - (self.absorbed + self.escaped + self.trnc_energy + self.trnc_bounces)
    }

    /// Records the energy a ray still carried when it stopped.
    pub fn terminate(&mut self, reason: Termination, energy: f32) {
        match reason {
            Termination::Escaped => self.escaped += energy,
            Termination::EnergyExhausted => self.trnc_energy += energy,
            Termination::MaxBounces => self.trnc_bounces += energy,
        }
    }
}

impl fmt::Display for EnergyBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Energy:")?;
        writeln!(f, "  Emitted:          {:.6}", self.emitted)?;
        writeln!(f, "  Deposited:        {:.6}", self.deposited)?;
        writeln!(f, "  Absorbed:         {:.6}", self.absorbed)?;
        writeln!(f, "  Escaped:          {:.6}", self.escaped)?;
        writeln!(f, "  Trunc. Energy:    {:.6}", self.trnc_energy)?;
        writeln!(f, "  Trunc. Bounces:   {:.6}", self.trnc_bounces)?;
        writeln!(f, "  Missing:          {:.6}", self.missing())
    }
}

/// Number of rays stopped by each termination condition.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TerminationCounts {
    pub energy_exhausted: usize,
    pub max_bounces: usize,
    pub escaped: usize,
}

impl TerminationCounts {
    pub fn record(&mut self, reason: Termination) {
        match reason {
            Termination::EnergyExhausted => self.energy_exhausted += 1,
            Termination::MaxBounces => self.max_bounces += 1,
            Termination::Escaped => self.escaped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.energy_exhausted + self.max_bounces + self.escaped
    }
}

impl Add for TerminationCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            energy_exhausted: self.energy_exhausted + other.energy_exhausted,
            max_bounces: self.max_bounces + other.max_bounces,
            escaped: self.escaped + other.escaped,
        }
    }
}

impl AddAssign for TerminationCounts {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}
