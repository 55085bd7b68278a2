//! Ray segments, ray-triangle intersection and specular reflection.
//!
//! A traced ray is a chain of segments: the source-emitted segment followed by
//! one segment per reflection. The chain is stored as an owned sequence in a
//! [`RayPath`], so dropping the path drops every segment.

use nalgebra::{Point3, Vector3};
use serde::Serialize;

use crate::config::{COPLANAR_EPSILON, INTERSECT_EPSILON};
use crate::geom::Triangle;


/// One straight segment of a traced ray.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ray {
    pub origin: Point3<f32>,
    /// Unit propagation direction.
    pub direction: Vector3<f32>,
    pub energy: f32,
    /// Path length travelled before this segment started.
    pub total_distance: f32,
    pub bounce_count: u32,
    pub ray_id: u32,
    /// Index of the triangle this segment leaves, if it is a reflection.
    #[serde(skip)]
    pub surface: Option<usize>,
}

impl Ray {
    /// Creates a source-emitted ray. The direction is normalised.
    pub fn emit(origin: Point3<f32>, direction: Vector3<f32>, ray_id: u32, energy: f32) -> Self {
        Self {
            origin,
            direction: direction.normalize(),
            energy,
            total_distance: 0.0,
            bounce_count: 0,
            ray_id,
            surface: None,
        }
    }

    /// The segment leaving `hit` after a specular reflection off a surface
    /// absorbing the fraction `absorption` of the incident energy.
    pub fn continuation(&self, hit: &RayHit, absorption: f32) -> Ray {
        Ray {
            origin: hit.position,
            direction: reflect(&self.direction, &hit.normal).normalize(),
            energy: self.energy * (1.0 - absorption),
            total_distance: self.total_distance + hit.distance,
            bounce_count: self.bounce_count + 1,
            ray_id: self.ray_id,
            surface: hit.triangle,
        }
    }
}

/// A ray-surface intersection.
#[derive(Debug, Clone, PartialEq)]
pub struct RayHit {
    pub position: Point3<f32>,
    /// Unit normal of the surface that was hit.
    pub normal: Vector3<f32>,
    /// Distance from the segment origin to `position`.
    pub distance: f32,
    /// Index of the hit triangle in the scanned buffer, when known.
    pub triangle: Option<usize>,
}

/// Möller-Trumbore ray-triangle test.
///
/// Returns a hit only if its parameter `t` satisfies `0 < t < t_best`, so that
/// callers scanning many triangles keep only the nearest hit by passing the
/// best distance so far. Degenerate triangles are never hit.
pub fn intersect(ray: &Ray, triangle: &Triangle, t_best: f32) -> Option<RayHit> {
    if triangle.is_degenerate() {
        return None;
    }

    let e1 = triangle.v2 - triangle.v1;
    let e2 = triangle.v3 - triangle.v1;

    let p = ray.direction.cross(&e2);
    let det = e1.dot(&p);
    if det.abs() < INTERSECT_EPSILON {
        return None; // parallel or degenerate
    }
    let inv_det = 1.0 / det;

    let s = ray.origin - triangle.v1;
    let u = s.dot(&p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(&e1);
    let v = ray.direction.dot(&q) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = e2.dot(&q) * inv_det;
    if t <= 0.0 || t >= t_best {
        return None;
    }

    // barycentric, so the point stays inside the triangle
    Some(RayHit {
        position: triangle.v1 + e1 * u + e2 * v,
        normal: triangle.normal,
        distance: t,
        triangle: None,
    })
}

/// Whether two triangles lie in the same plane.
pub fn coplanar(a: &Triangle, b: &Triangle) -> bool {
    !a.is_degenerate()
        && !b.is_degenerate()
        && a.normal.cross(&b.normal).norm() < COPLANAR_EPSILON
        && a.normal.dot(&(b.v1 - a.v1)).abs() < COPLANAR_EPSILON
}

/// Tests `candidates`, given as indices into `buffer` with their triangles,
/// and keeps the nearest hit in `best`.
///
/// A reflected segment starts on the plane of the triangle it leaves and can
/// only meet that plane again at `t = 0`, so every triangle coplanar with
/// `buffer[ray.surface]` is skipped. Every other triangle is accepted at any
/// `t > 0`, which keeps short hits on an adjacent wall near an edge.
pub fn scan<'a, I>(ray: &Ray, buffer: &[Triangle], candidates: I, best: &mut Option<RayHit>)
where
    I: IntoIterator<Item = (usize, &'a Triangle)>,
{
    let departed = ray.surface.and_then(|index| buffer.get(index));
    for (index, tri) in candidates {
        if departed.is_some_and(|surface| coplanar(surface, tri)) {
            continue;
        }
        let t_best = best.as_ref().map_or(f32::INFINITY, |hit| hit.distance);
        if let Some(hit) = intersect(ray, tri, t_best) {
            *best = Some(RayHit {
                triangle: Some(index),
                ..hit
            });
        }
    }
}

/// Nearest hit of `ray` over a slice of triangles, by exhaustive scan.
pub fn nearest_hit(ray: &Ray, triangles: &[Triangle]) -> Option<RayHit> {
    let mut best = None;
    scan(ray, triangles, triangles.iter().enumerate(), &mut best);
    best
}

/// Mirror reflection of `incident` about the plane with normal `normal`.
/// The normal is normalised first, so its length and sign do not matter.
pub fn reflect(incident: &Vector3<f32>, normal: &Vector3<f32>) -> Vector3<f32> {
    let n = normal.normalize();
    incident - 2.0 * incident.dot(&n) * n
}

/// Why a traced ray stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Termination {
    /// Energy fell below the configured minimum.
    EnergyExhausted,
    /// The configured bounce limit was reached.
    MaxBounces,
    /// No surface was hit; the ray left the scene.
    Escaped,
}

/// The full bounce chain of one emitted ray.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RayPath {
    pub ray_id: u32,
    /// Emitted segment first, then one segment per reflection. Never empty.
    segments: Vec<Ray>,
    /// Set once tracing has finished.
    pub termination: Option<Termination>,
}

impl RayPath {
    pub fn new(emitted: Ray) -> Self {
        Self {
            ray_id: emitted.ray_id,
            segments: vec![emitted],
            termination: None,
        }
    }

    /// The segment currently being traced.
    pub fn last(&self) -> &Ray {
        // a path is created with its emitted segment and never shrinks
        &self.segments[self.segments.len() - 1]
    }

    /// Emitted segment first, then one segment per reflection.
    pub fn segments(&self) -> &[Ray] {
        &self.segments
    }

    pub fn push(&mut self, segment: Ray) {
        self.segments.push(segment);
    }

    pub fn terminate(&mut self, reason: Termination) {
        self.termination = Some(reason);
    }

    pub fn num_bounces(&self) -> usize {
        self.segments.len() - 1
    }
}
