//! Acoustic ray tracing into a voxelised, time-binned energy field.
//!
//! Rays are emitted from point sources into a triangulated scene, reflected
//! specularly off its surfaces with material absorption, and the energy
//! arriving at every hit is accumulated into the grid voxel containing the hit
//! and the time bin of its arrival.
//!
//! The main entry points are [`scene::Scene`] and [`simulation::Simulation`].

pub mod budget;
pub mod config;
pub mod error;
pub mod geom;
pub mod output;
pub mod ray;
pub mod result;
pub mod scene;
pub mod settings;
pub mod simulation;
pub mod trigroup;
pub mod voxel;
