/// Energy carried by a freshly emitted ray.
pub const RAY_MAX_ENERGY: f32 = 100.0;
/// Propagation speed of sound in air at 20 degrees C, in metres per second.
pub const DEFAULT_SPEED_OF_SOUND: f32 = 343.0;
/// Default maximum number of triangles per leaf group of the partition.
pub const DEFAULT_GROUP_SIZE: usize = 64;
/// Tolerance on normals and plane offsets for treating two triangles as coplanar.
/// A reflected segment ignores every triangle coplanar with the one it leaves.
pub const COPLANAR_EPSILON: f32 = 1e-5;
/// Determinant threshold below which a ray is considered parallel to a triangle.
pub const INTERSECT_EPSILON: f32 = 1e-7;
/// Padding applied to group bounds before slab culling, so flat groups are never culled.
pub const AABB_PADDING: f32 = 1e-4;
