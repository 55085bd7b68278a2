//! Geometric primitives for the acoustic scene.
//!
//! Positions are `Point3<f32>` and directions are `Vector3<f32>`. This module
//! provides axis-aligned bounding boxes, the immutable [`Triangle`] used by the
//! partitioner and the intersection tests, and the [`Mesh`] that supplies
//! triangles to a scene.

use nalgebra::{Point3, Vector3};

use crate::error::{Result, SimError};


/// Axis-aligned bounding box.
///
/// The empty box has `min = +inf` and `max = -inf` on every axis, so that
/// growing it by any point yields that point. The `midpoint` is kept equal to
/// `(min + max) / 2` whenever the box is non-empty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
    pub midpoint: Point3<f32>,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Aabb {
    /// A box containing nothing.
    pub fn empty() -> Self {
        Self {
            min: Point3::new(f32::INFINITY, f32::INFINITY, f32::INFINITY),
            max: Point3::new(f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY),
            midpoint: Point3::origin(),
        }
    }

    fn from_bounds(min: Point3<f32>, max: Point3<f32>) -> Self {
        let mut aabb = Self {
            min,
            max,
            midpoint: Point3::origin(),
        };
        aabb.update_midpoint();
        aabb
    }

    /// The tight bound of a set of points.
    pub fn from_points(points: &[Point3<f32>]) -> Self {
        let mut aabb = Self::empty();
        for point in points {
            aabb.grow(*point);
        }
        aabb
    }

    fn update_midpoint(&mut self) {
        if !self.is_empty() {
            self.midpoint = nalgebra::center(&self.min, &self.max);
        }
    }

    /// Grows the box to include a point.
    pub fn grow(&mut self, point: Point3<f32>) {
        self.min = self.min.inf(&point);
        self.max = self.max.sup(&point);
        self.update_midpoint();
    }

    /// The smallest box containing both `a` and `b`.
    pub fn join(a: &Aabb, b: &Aabb) -> Aabb {
        Self::from_bounds(a.min.inf(&b.min), a.max.sup(&b.max))
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Size of the box along each axis. Zero for an empty box.
    pub fn extent(&self) -> Vector3<f32> {
        if self.is_empty() {
            Vector3::zeros()
        } else {
            self.max - self.min
        }
    }

    pub fn contains_point(&self, point: &Point3<f32>) -> bool {
        (0..3).all(|i| point[i] >= self.min[i] && point[i] <= self.max[i])
    }

    /// Whether `other` lies entirely inside this box. An empty box is inside everything.
    pub fn contains(&self, other: &Aabb) -> bool {
        other.is_empty() || (self.contains_point(&other.min) && self.contains_point(&other.max))
    }

    /// Returns a copy enlarged by `eps` on every side.
    pub fn padded(&self, eps: f32) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        let pad = Vector3::repeat(eps);
        Self::from_bounds(self.min - pad, self.max + pad)
    }

    /// Slab test. Returns the parametric interval `(enter, exit)` over which the
    /// ray `origin + t * direction` lies inside the box, clipped to `[t_min, t_max]`,
    /// or `None` if the ray misses the box within that range.
    pub fn ray_interval(
        &self,
        origin: &Point3<f32>,
        direction: &Vector3<f32>,
        t_min: f32,
        t_max: f32,
    ) -> Option<(f32, f32)> {
        if self.is_empty() {
            return None;
        }

        let mut enter = t_min;
        let mut exit = t_max;

        for axis in 0..3 {
            let o = origin[axis];
            let d = direction[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);

            if d == 0.0 {
                // parallel to this slab: either always inside it or never
                if o < lo || o > hi {
                    return None;
                }
                continue;
            }

            let inv = 1.0 / d;
            let (mut t0, mut t1) = ((lo - o) * inv, (hi - o) * inv);
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            enter = enter.max(t0);
            exit = exit.min(t1);
            if enter > exit {
                return None;
            }
        }

        Some((enter, exit))
    }
}

/// A triangle of the scene. Immutable once built; the derived fields are
/// computed by [`Triangle::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triangle {
    pub v1: Point3<f32>,
    pub v2: Point3<f32>,
    pub v3: Point3<f32>,
    /// Unit geometric normal, or zero for a degenerate triangle.
    pub normal: Vector3<f32>,
    /// Average of the three vertices, the triangle's representative point.
    pub centroid: Point3<f32>,
    pub aabb: Aabb,
}

impl Triangle {
    pub fn new(v1: Point3<f32>, v2: Point3<f32>, v3: Point3<f32>) -> Self {
        let normal = (v2 - v1)
            .cross(&(v3 - v1))
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(Vector3::zeros);
        let centroid = Point3::from((v1.coords + v2.coords + v3.coords) / 3.0);
        let aabb = Aabb::from_points(&[v1, v2, v3]);

        Self {
            v1,
            v2,
            v3,
            normal,
            centroid,
            aabb,
        }
    }

    /// Returns the same triangle with its normal reversed.
    fn flipped(mut self) -> Self {
        self.normal = -self.normal;
        self
    }

    /// A triangle with no area, which no ray can hit.
    pub fn is_degenerate(&self) -> bool {
        self.normal == Vector3::zeros()
    }
}

/// An indexed triangle mesh, as supplied by the mesh provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Point3<f32>>,
    /// Vertex indices, three per triangle.
    pub indices: Vec<u32>,
    /// Per-vertex normals. Either empty or one per vertex.
    pub normals: Vec<Vector3<f32>>,
}

impl Mesh {
    pub fn new(
        vertices: Vec<Point3<f32>>,
        indices: Vec<u32>,
        normals: Vec<Vector3<f32>>,
    ) -> Result<Self> {
        if indices.is_empty() {
            return Err(SimError::invalid("mesh has no triangles"));
        }
        if indices.len() % 3 != 0 {
            return Err(SimError::invalid(format!(
                "index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(SimError::invalid(format!(
                "index {} out of range for {} vertices",
                bad,
                vertices.len()
            )));
        }
        if !normals.is_empty() && normals.len() != vertices.len() {
            return Err(SimError::invalid(format!(
                "{} normals given for {} vertices",
                normals.len(),
                vertices.len()
            )));
        }
        if vertices.iter().any(|v| !v.coords.iter().all(|c| c.is_finite())) {
            return Err(SimError::invalid("mesh contains non-finite vertex positions"));
        }

        Ok(Self {
            vertices,
            indices,
            normals,
        })
    }

    /// Loads every model of a Wavefront OBJ file into one mesh.
    pub fn from_file(filename: &str) -> Result<Self> {
        let options = tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        };
        let (models, _) = tobj::load_obj(filename, &options)
            .map_err(|e| SimError::invalid(format!("failed to load '{}': {}", filename, e)))?;

        let mut vertices = Vec::new();
        let mut indices = Vec::new();
        let mut normals = Vec::new();
        let mut with_normals = true;

        for model in &models {
            let mesh = &model.mesh;
            let offset = vertices.len() as u32;

            vertices.extend(
                mesh.positions
                    .chunks_exact(3)
                    .map(|p| Point3::new(p[0], p[1], p[2])),
            );
            indices.extend(mesh.indices.iter().map(|i| i + offset));

            if mesh.normals.len() == mesh.positions.len() {
                normals.extend(
                    mesh.normals
                        .chunks_exact(3)
                        .map(|n| Vector3::new(n[0], n[1], n[2])),
                );
            } else {
                with_normals = false;
            }
        }

        if !with_normals {
            normals.clear();
        }

        log::debug!(
            "loaded {} model(s) from '{}': {} vertices, {} triangles",
            models.len(),
            filename,
            vertices.len(),
            indices.len() / 3
        );

        Self::new(vertices, indices, normals)
    }

    pub fn num_triangles(&self) -> usize {
        self.indices.len() / 3
    }

    /// World bounds of all vertices.
    pub fn aabb(&self) -> Aabb {
        Aabb::from_points(&self.vertices)
    }

    /// Builds the triangle list. When vertex normals are present, each
    /// triangle's normal is turned to agree with their average.
    pub fn triangles(&self) -> Vec<Triangle> {
        self.iter_triangles().collect()
    }

    /// Lazy form of [`Mesh::triangles`].
    pub fn iter_triangles(&self) -> impl ExactSizeIterator<Item = Triangle> + '_ {
        self.indices.chunks_exact(3).map(move |idx| {
            let [a, b, c] = [idx[0] as usize, idx[1] as usize, idx[2] as usize];
            let tri = Triangle::new(self.vertices[a], self.vertices[b], self.vertices[c]);
            if self.normals.is_empty() {
                return tri;
            }
            let shading = self.normals[a] + self.normals[b] + self.normals[c];
            if tri.normal.dot(&shading) < 0.0 {
                tri.flipped()
            } else {
                tri
            }
        })
    }
}
