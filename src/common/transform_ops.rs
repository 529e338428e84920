//! Pure math helpers for the transform core.
//!
//! Orientation conversions (Euler degrees, axis-angle, quaternions), local
//! axis computation, look-at rotation construction, and the scale clamp used
//! when building local matrices. All functions are stateless so they can be
//! shared by rotators, animation blending, and tests.

use cgmath::{Deg, Euler, InnerSpace, Matrix3, Quaternion, Rad, Rotation, Rotation3, Vector3};

use super::{EPSILON, MIN_SCALE};

// =============================================================================
// Angle Normalization
// =============================================================================

/// Wraps an angle in degrees into the open interval (-360, 360).
///
/// The sign of the input is preserved: 370 becomes 10, -370 becomes -10,
/// and -181 stays -181. This is the normalization applied when Euler angles
/// are written.
pub fn normalize_degrees(angle: f32) -> f32 {
    angle % 360.0
}

/// Wraps an angle in degrees into [-180, 180).
///
/// This is the normalization applied when Euler angles are derived back from
/// a quaternion or axis-angle representation.
pub fn normalize_degrees_signed(angle: f32) -> f32 {
    ((angle % 360.0) + 540.0) % 360.0 - 180.0
}

// =============================================================================
// Orientation Conversions
// =============================================================================

/// Builds a quaternion from Euler angles given in degrees.
pub fn quaternion_from_euler_degrees(angles: Vector3<f32>) -> Quaternion<f32> {
    Quaternion::from(Euler::new(Deg(angles.x), Deg(angles.y), Deg(angles.z)))
}

/// Derives Euler angles in degrees from a quaternion.
///
/// The returned angles are normalized to [-180, 180). Round-tripping an
/// arbitrary rotation through this function returns an equivalent, not
/// necessarily bitwise-identical, set of angles.
pub fn euler_degrees_from_quaternion(quat: Quaternion<f32>) -> Vector3<f32> {
    let euler: Euler<Rad<f32>> = Euler::from(quat);
    Vector3::new(
        normalize_degrees_signed(Deg::from(euler.x).0),
        normalize_degrees_signed(Deg::from(euler.y).0),
        normalize_degrees_signed(Deg::from(euler.z).0),
    )
}

/// Creates a rotation quaternion from an axis and angle, with safety for
/// zero-length axes.
///
/// If the axis has near-zero magnitude, returns an identity quaternion.
pub fn quaternion_from_axis_angle_safe(axis: Vector3<f32>, angle_deg: f32) -> Quaternion<f32> {
    if axis.magnitude2() > EPSILON {
        Quaternion::from_axis_angle(axis.normalize(), Deg(angle_deg))
    } else {
        Quaternion::new(1.0, 0.0, 0.0, 0.0)
    }
}

/// Applies a rotation to an existing orientation (rotation * current).
pub fn compose_rotation(
    current_rotation: Quaternion<f32>,
    rotation: Quaternion<f32>,
) -> Quaternion<f32> {
    rotation * current_rotation
}

// =============================================================================
// Axis Computation
// =============================================================================

/// Computes the local X axis (right) for a given orientation.
pub fn local_axis_x(rotation: Quaternion<f32>) -> Vector3<f32> {
    rotation.rotate_vector(Vector3::unit_x())
}

/// Computes the local Y axis (up) for a given orientation.
pub fn local_axis_y(rotation: Quaternion<f32>) -> Vector3<f32> {
    rotation.rotate_vector(Vector3::unit_y())
}

/// Computes the local Z axis (forward) for a given orientation.
pub fn local_axis_z(rotation: Quaternion<f32>) -> Vector3<f32> {
    rotation.rotate_vector(Vector3::unit_z())
}

// =============================================================================
// Look Rotation
// =============================================================================

/// Builds the orientation whose local +Z axis points along `forward`.
///
/// A forward direction alone leaves the roll around the forward axis free;
/// `up` resolves it. If `up` is (near-)parallel to `forward` a fallback up
/// axis is substituted, and a degenerate `forward` yields identity.
pub fn look_rotation(forward: Vector3<f32>, up: Vector3<f32>) -> Quaternion<f32> {
    if forward.magnitude2() <= EPSILON {
        return Quaternion::new(1.0, 0.0, 0.0, 0.0);
    }
    let f = forward.normalize();

    let mut reference_up = up;
    if reference_up.magnitude2() <= EPSILON || reference_up.cross(f).magnitude2() <= EPSILON {
        // Up is unusable; pick whichever world axis is least aligned with forward
        reference_up = if f.y.abs() < 0.99 {
            Vector3::unit_y()
        } else {
            Vector3::unit_z()
        };
    }

    let right = reference_up.cross(f).normalize();
    let corrected_up = f.cross(right);

    Quaternion::from(Matrix3::from_cols(right, corrected_up, f))
}

// =============================================================================
// Scale Clamping
// =============================================================================

/// Clamps each scale component away from zero, preserving sign.
///
/// Components with magnitude below [`MIN_SCALE`] are raised to it so the
/// resulting local matrix stays invertible. Components that are exactly zero
/// clamp to positive [`MIN_SCALE`].
pub fn clamp_scale(scale: Vector3<f32>) -> Vector3<f32> {
    fn clamp_component(value: f32) -> f32 {
        if value.abs() >= MIN_SCALE {
            value
        } else if value < 0.0 {
            -MIN_SCALE
        } else {
            MIN_SCALE
        }
    }

    Vector3::new(
        clamp_component(scale.x),
        clamp_component(scale.y),
        clamp_component(scale.z),
    )
}
