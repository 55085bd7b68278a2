//! The scene to be simulated: a borrowed mesh, its surface material and the
//! sound sources that emit rays into it.

use std::fmt;
use std::str::FromStr;

use nalgebra::{Point3, Vector3};
use rand::Rng;
use rand_distr::{Distribution, UnitSphere};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::geom::{Aabb, Mesh, Triangle};
use crate::ray::Ray;


/// Surface material of the scene. Each material absorbs a fixed fraction of
/// the energy of every ray that reflects off it:
/// `energy_next = energy * (1 - absorption)`.
///
/// The named coefficients are typical values at 1 kHz.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    /// Hard plastic panels, 0.05.
    #[default]
    Plastic,
    /// Painted or bare concrete, 0.02.
    Concrete,
    /// Wooden boards, 0.07.
    Wood,
    /// Window glass, 0.03.
    Glass,
    /// Heavy carpet on concrete, 0.37.
    Carpet,
    /// Draped fabric, 0.50.
    Fabric,
    /// A user-supplied absorption coefficient in `[0, 1]`.
    Custom { absorption: f32 },
}

impl Material {
    /// Fraction of incident energy absorbed per reflection.
    pub fn absorption(&self) -> f32 {
        match self {
            Material::Plastic => 0.05,
            Material::Concrete => 0.02,
            Material::Wood => 0.07,
            Material::Glass => 0.03,
            Material::Carpet => 0.37,
            Material::Fabric => 0.50,
            Material::Custom { absorption } => *absorption,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let a = self.absorption();
        if (0.0..=1.0).contains(&a) {
            Ok(())
        } else {
            Err(SimError::invalid(format!(
                "absorption coefficient must be in [0, 1], got {}",
                a
            )))
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Material::Plastic => write!(f, "plastic"),
            Material::Concrete => write!(f, "concrete"),
            Material::Wood => write!(f, "wood"),
            Material::Glass => write!(f, "glass"),
            Material::Carpet => write!(f, "carpet"),
            Material::Fabric => write!(f, "fabric"),
            Material::Custom { absorption } => write!(f, "custom ({})", absorption),
        }
    }
}

/// Parses a material name, or a bare number as a custom absorption coefficient.
impl FromStr for Material {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let material = match s.to_lowercase().as_str() {
            "plastic" => Material::Plastic,
            "concrete" => Material::Concrete,
            "wood" => Material::Wood,
            "glass" => Material::Glass,
            "carpet" => Material::Carpet,
            "fabric" => Material::Fabric,
            other => match other.parse::<f32>() {
                Ok(absorption) => Material::Custom { absorption },
                Err(_) => return Err(SimError::invalid(format!("unknown material '{}'", s))),
            },
        };
        material.validate()?;
        Ok(material)
    }
}

/// A point sound source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub position: Point3<f32>,
    /// Beam direction. Omnidirectional when absent.
    #[serde(default)]
    pub direction: Option<Vector3<f32>>,
}

impl Source {
    pub fn omni(position: Point3<f32>) -> Self {
        Self {
            position,
            direction: None,
        }
    }

    pub fn directed(position: Point3<f32>, direction: Vector3<f32>) -> Self {
        Self {
            position,
            direction: Some(direction),
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.position.coords.iter().all(|c| c.is_finite()) {
            return Err(SimError::invalid(format!(
                "source position {} is not finite",
                self.position
            )));
        }
        if let Some(direction) = self.direction {
            if !direction.iter().all(|c| c.is_finite()) || direction.norm() == 0.0 {
                return Err(SimError::invalid(format!(
                    "source direction {} cannot be normalised",
                    direction
                )));
            }
        }
        Ok(())
    }

    /// Emits `count` rays with sequential ids starting at `first_id`.
    /// Omnidirectional sources sample directions uniformly on the unit sphere.
    pub fn emit<R: Rng + ?Sized>(
        &self,
        count: u32,
        first_id: u32,
        energy: f32,
        rng: &mut R,
    ) -> Vec<Ray> {
        (0..count)
            .map(|i| {
                let direction = match self.direction {
                    Some(direction) => direction,
                    None => {
                        let [x, y, z]: [f32; 3] = UnitSphere.sample(rng);
                        Vector3::new(x, y, z)
                    }
                };
                Ray::emit(self.position, direction, first_id + i, energy)
            })
            .collect()
    }
}

/// Scene description supplied by configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub material: Material,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// A validated scene. Borrows the mesh, which must outlive it.
#[derive(Debug, Clone)]
pub struct Scene<'m> {
    mesh: &'m Mesh,
    sources: Vec<Source>,
    material: Material,
    aabb: Aabb,
}

impl<'m> Scene<'m> {
    pub fn new(mesh: &'m Mesh, config: SceneConfig) -> Result<Self> {
        if config.sources.is_empty() {
            return Err(SimError::invalid("scene needs at least one source"));
        }
        for source in &config.sources {
            source.validate()?;
        }
        config.material.validate()?;

        let aabb = mesh.aabb();
        log::debug!(
            "scene: {} triangles, {} sources, material {}, bounds {} to {}",
            mesh.num_triangles(),
            config.sources.len(),
            config.material,
            aabb.min,
            aabb.max
        );

        Ok(Self {
            mesh,
            sources: config.sources,
            material: config.material,
            aabb,
        })
    }

    pub fn mesh(&self) -> &'m Mesh {
        self.mesh
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn num_sources(&self) -> usize {
        self.sources.len()
    }

    pub fn material(&self) -> Material {
        self.material
    }

    /// World bounds of the mesh, computed once at construction.
    pub fn aabb(&self) -> &Aabb {
        &self.aabb
    }

    /// Copies the mesh triangles into a new buffer for partitioning.
    pub fn triangles(&self) -> Result<Vec<Triangle>> {
        let mut triangles = Vec::new();
        triangles
            .try_reserve_exact(self.mesh.num_triangles())
            .map_err(|e| SimError::alloc("triangle buffer", e))?;
        triangles.extend(self.mesh.iter_triangles());
        Ok(triangles)
    }
}
