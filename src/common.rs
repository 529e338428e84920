mod aabb;
pub mod transform_ops;

pub use aabb::Aabb;

/// Tolerance used for floating-point comparisons throughout the crate.
pub const EPSILON: f32 = 1e-5;

/// Smallest absolute magnitude a scale component may take.
///
/// Scale components are clamped away from zero before a local matrix is
/// built so the matrix stays invertible.
pub const MIN_SCALE: f32 = 1e-4;
