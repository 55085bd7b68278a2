//! Spatial partitioning of scene triangles into bounded-size groups.
//!
//! The partitioner takes the flat triangle list of a scene and reorders it in
//! place so that each leaf [`TriGroup`] is a contiguous range of one backing
//! buffer. Groups are split iteratively along the longest axis of the AABB of
//! their triangle centroids, using an explicit worklist rather than recursion.
//! The resulting flat list of leaves is used for broad-phase culling during
//! ray intersection.
//!
//! # Key Components
//!
//! - [`TriGroup`]: a range view into the backing buffer with its bounds
//! - [`split_group`]: one longest-axis split, with the 2- and 3-axis fallbacks
//! - [`TriangleGroups`]: the owned buffer plus its leaf groups

use std::ops::Range;

use itertools::Itertools;

use crate::config::AABB_PADDING;
use crate::error::{Result, SimError};
use crate::geom::{Aabb, Triangle};
use crate::ray::{self, Ray, RayHit};


/// A contiguous run of triangles in the backing buffer of a [`TriangleGroups`].
#[derive(Debug, Clone, PartialEq)]
pub struct TriGroup {
    offset: usize,
    n: usize,
    /// Tight bound of the member triangles' centroids. Drives splitting.
    pub aabb: Aabb,
    /// Bound of the member triangles' full extents. Drives ray culling.
    pub bounds: Aabb,
}

impl TriGroup {
    /// Creates a group over `buffer[range]`, computing both bounds.
    pub fn new(buffer: &[Triangle], range: Range<usize>) -> Self {
        let mut aabb = Aabb::empty();
        let mut bounds = Aabb::empty();
        for tri in &buffer[range.clone()] {
            aabb.grow(tri.centroid);
            bounds = Aabb::join(&bounds, &tri.aabb);
        }
        Self {
            offset: range.start,
            n: range.len(),
            aabb,
            bounds,
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.n
    }

    pub fn triangles<'a>(&self, buffer: &'a [Triangle]) -> &'a [Triangle] {
        &buffer[self.range()]
    }
}

/// Outcome of a single split attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Split {
    Divided(TriGroup, TriGroup),
    /// No combination of axis thresholds separates the group.
    Irreducible,
}

/// Axes ordered by descending extent of the box. Ties keep the lower axis first.
fn ranked_axes(aabb: &Aabb) -> [usize; 3] {
    let extent = aabb.extent();
    let ranked = (0..3)
        .sorted_by(|&a, &b| extent[b].total_cmp(&extent[a]))
        .collect::<Vec<_>>();
    [ranked[0], ranked[1], ranked[2]]
}

/// Moves every triangle whose centroid is `<=` the threshold on all `axes` to
/// the front of the slice, preserving the relative order of the moved ones.
/// Returns the number of triangles on the left.
fn partition(triangles: &mut [Triangle], axes: &[usize], threshold: &[f32; 3]) -> usize {
    let mut left = 0;
    for i in 0..triangles.len() {
        let c = triangles[i].centroid;
        if axes.iter().all(|&axis| c[axis] <= threshold[axis]) {
            if left < i {
                triangles.swap(left, i);
            }
            left += 1;
        }
    }
    left
}

/// Splits one group along the longest axis of its centroid box.
///
/// If every triangle lands on one side, the test is retried with the two, then
/// all three, longest axes combined (a triangle goes left only if it is left
/// on every considered axis). If that is still degenerate the group is
/// [`Split::Irreducible`] and its triangles are left where they were.
pub fn split_group(buffer: &mut [Triangle], group: &TriGroup) -> Split {
    let axes = ranked_axes(&group.aabb);
    let threshold = [group.aabb.midpoint.x, group.aabb.midpoint.y, group.aabb.midpoint.z];
    let range = group.range();

    for num_axes in 1..=3 {
        let left_n = partition(&mut buffer[range.clone()], &axes[..num_axes], &threshold);
        if left_n > 0 && left_n < group.len() {
            let mid = range.start + left_n;
            return Split::Divided(
                TriGroup::new(buffer, range.start..mid),
                TriGroup::new(buffer, mid..range.end),
            );
        }
    }

    Split::Irreducible
}

/// The leaf groups of a partitioned scene, together with the triangle buffer
/// they index into.
#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGroups {
    triangles: Vec<Triangle>,
    groups: Vec<TriGroup>,
}

impl TriangleGroups {
    /// Partitions `triangles` into leaves of at most `n_max` triangles, except
    /// for irreducible groups, which are kept whole.
    pub fn build(mut triangles: Vec<Triangle>, n_max: usize) -> Result<Self> {
        if n_max == 0 {
            return Err(SimError::invalid("maximum group size must be at least 1"));
        }
        if triangles.is_empty() {
            return Err(SimError::invalid("cannot partition an empty triangle list"));
        }

        let mut groups = Vec::new();
        let mut worklist = vec![TriGroup::new(&triangles, 0..triangles.len())];

        while let Some(parent) = worklist.pop() {
            match split_group(&mut triangles, &parent) {
                Split::Irreducible => {
                    if parent.len() > n_max {
                        log::warn!(
                            "keeping irreducible group of {} triangles (limit {})",
                            parent.len(),
                            n_max
                        );
                    }
                    groups.push(parent);
                }
                Split::Divided(left, right) => {
                    for child in [left, right] {
                        if child.len() <= n_max {
                            groups.push(child);
                        } else {
                            worklist.push(child);
                        }
                    }
                }
            }
        }

        log::debug!(
            "partitioned {} triangles into {} groups (limit {})",
            triangles.len(),
            groups.len(),
            n_max
        );

        Ok(Self { triangles, groups })
    }

    /// Number of leaf groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn num_triangles(&self) -> usize {
        self.groups.iter().map(TriGroup::len).sum()
    }

    /// Size of the largest leaf.
    pub fn largest_group(&self) -> usize {
        self.groups.iter().map(TriGroup::len).max().unwrap_or(0)
    }

    /// Iterates over the leaves together with their triangles.
    pub fn iter(&self) -> impl Iterator<Item = (&TriGroup, &[Triangle])> {
        self.groups
            .iter()
            .map(move |group| (group, group.triangles(&self.triangles)))
    }

    /// Finds the nearest hit of `ray` over all groups. Groups whose bounds the
    /// ray cannot enter before the current best hit are skipped. The hit's
    /// `triangle` indexes the partitioned buffer, so it can be carried on the
    /// reflected segment.
    pub fn intersect(&self, ray: &Ray) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;

        for (group, triangles) in self.iter() {
            let t_best = best.as_ref().map_or(f32::INFINITY, |hit| hit.distance);
            if group
                .bounds
                .padded(AABB_PADDING)
                .ray_interval(&ray.origin, &ray.direction, 0.0, t_best)
                .is_none()
            {
                continue;
            }

            ray::scan(
                ray,
                &self.triangles,
                group.range().zip(triangles),
                &mut best,
            );
        }

        best
    }
}
