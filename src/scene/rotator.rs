use cgmath::{InnerSpace, Point3, Quaternion, Vector3};

use super::NodeId;
use crate::common::transform_ops::{
    compose_rotation, euler_degrees_from_quaternion, local_axis_y, local_axis_z, look_rotation,
    normalize_degrees, quaternion_from_axis_angle_safe, quaternion_from_euler_degrees,
};
use crate::common::EPSILON;

/// What a targetting rotator is currently tracking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackingMode {
    /// No target; orientation is whatever was last set.
    NotTracking,
    /// Continuously re-orient toward another node's world location.
    TargetNode(NodeId),
    /// Continuously re-orient toward a fixed world location.
    FixedLocation(Point3<f32>),
}

/// Constraint applied while computing a tracking orientation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargettingConstraint {
    /// Full three-axis rotation toward the target.
    Free,
    /// Rotation locked around the given axis (e.g. unit Y to keep a
    /// billboard standing upright). The axis doubles as the up reference.
    AxisLocked(Vector3<f32>),
}

/// The orientation strategy owned by a node.
///
/// All variants represent one net orientation; richer variants are created
/// by "upgrading" on the first write that needs them, seeded from the
/// current orientation. A rotator never downgrades automatically.
#[derive(Debug, Clone, PartialEq)]
pub enum Rotator {
    /// Identity orientation, the cheapest starting state.
    None,
    /// Freely mutable rotation with Euler, axis-angle, and quaternion views
    /// over one canonical quaternion.
    ///
    /// `euler` holds the angles exactly as the caller wrote them (wrapped to
    /// ±360°) so that a set/get round trip is lossless. It is cleared by any
    /// quaternion-level write, after which reads derive ±180°-normalized
    /// angles from the quaternion.
    Mutable {
        quat: Quaternion<f32>,
        euler: Option<Vector3<f32>>,
    },
    /// Orientation given by a forward direction plus an up reference that
    /// resolves the roll around the forward axis. Both vectors are unit
    /// length and local to the owning node.
    Directional {
        forward: Vector3<f32>,
        up: Vector3<f32>,
    },
    /// Directional rotation that additionally re-seeks a target every frame.
    Targetting {
        forward: Vector3<f32>,
        up: Vector3<f32>,
        mode: TrackingMode,
        constraint: TargettingConstraint,
    },
}

impl Default for Rotator {
    fn default() -> Self {
        Self::None
    }
}

impl Rotator {
    /// Creates the cheapest rotator representing the given orientation:
    /// `None` for identity, `Mutable` otherwise.
    pub fn from_quaternion(quat: Quaternion<f32>) -> Self {
        let identity = (quat.s - 1.0).abs() < EPSILON && quat.v.magnitude2() < EPSILON;
        if identity {
            Self::None
        } else {
            Self::Mutable { quat, euler: None }
        }
    }

    /// The net orientation this rotator currently represents.
    pub fn orientation(&self) -> Quaternion<f32> {
        match self {
            Self::None => Quaternion::new(1.0, 0.0, 0.0, 0.0),
            Self::Mutable { quat, .. } => *quat,
            Self::Directional { forward, up } => look_rotation(*forward, *up),
            Self::Targetting { forward, up, .. } => look_rotation(*forward, *up),
        }
    }

    /// Euler angles in degrees.
    ///
    /// Returns the written angles verbatim while the Euler view is
    /// authoritative, otherwise angles derived from the canonical quaternion
    /// and normalized to ±180°.
    pub fn angles(&self) -> Vector3<f32> {
        match self {
            Self::Mutable {
                euler: Some(angles),
                ..
            } => *angles,
            _ => euler_degrees_from_quaternion(self.orientation()),
        }
    }

    /// Sets the orientation from Euler angles in degrees.
    ///
    /// Angles are wrapped to ±360° and kept verbatim so `angles()` round
    /// trips losslessly. Upgrades to `Mutable` if needed.
    pub fn set_angles(&mut self, angles: Vector3<f32>) {
        let wrapped = Vector3::new(
            normalize_degrees(angles.x),
            normalize_degrees(angles.y),
            normalize_degrees(angles.z),
        );
        *self = Self::Mutable {
            quat: quaternion_from_euler_degrees(wrapped),
            euler: Some(wrapped),
        };
    }

    /// Rotates the current orientation by `angle_deg` around `axis`.
    ///
    /// A zero axis is a precondition violation: fatal in debug builds, a
    /// logged no-op in release builds. Upgrades to `Mutable`; the Euler view
    /// stops being authoritative after this write.
    pub fn rotate_by(&mut self, axis: Vector3<f32>, angle_deg: f32) {
        if axis.magnitude2() <= EPSILON {
            debug_assert!(false, "rotate_by called with a zero axis");
            log::warn!("rotate_by ignored: zero rotation axis");
            return;
        }
        let delta = quaternion_from_axis_angle_safe(axis, angle_deg);
        *self = Self::Mutable {
            quat: compose_rotation(self.orientation(), delta),
            euler: None,
        };
    }

    /// Sets the orientation from a quaternion.
    ///
    /// Directional and targetting rotators keep their variant and re-derive
    /// their direction vectors; a targetting rotator that is actively
    /// tracking ignores the write, since tracking owns its orientation.
    pub fn set_orientation(&mut self, quat: Quaternion<f32>) {
        match self {
            Self::None | Self::Mutable { .. } => {
                *self = Self::Mutable { quat, euler: None };
            }
            Self::Directional { forward, up } => {
                *forward = local_axis_z(quat);
                *up = local_axis_y(quat);
            }
            Self::Targetting {
                forward, up, mode, ..
            } => {
                if *mode == TrackingMode::NotTracking {
                    *forward = local_axis_z(quat);
                    *up = local_axis_y(quat);
                }
            }
        }
    }

    /// The local forward direction (+Z of the current orientation).
    pub fn forward(&self) -> Vector3<f32> {
        match self {
            Self::Directional { forward, .. } | Self::Targetting { forward, .. } => *forward,
            _ => local_axis_z(self.orientation()),
        }
    }

    /// The local up reference direction.
    pub fn up(&self) -> Vector3<f32> {
        match self {
            Self::Directional { up, .. } | Self::Targetting { up, .. } => *up,
            _ => local_axis_y(self.orientation()),
        }
    }

    /// Sets the forward direction, upgrading to `Directional` if the rotator
    /// is not already direction-based. The vector is normalized; a zero
    /// vector is a precondition violation and is ignored in release builds.
    pub fn set_forward(&mut self, forward: Vector3<f32>) {
        if forward.magnitude2() <= EPSILON {
            debug_assert!(false, "set_forward called with a zero vector");
            log::warn!("set_forward ignored: zero direction vector");
            return;
        }
        self.upgrade_to_directional();
        match self {
            Self::Directional { forward: f, .. } | Self::Targetting { forward: f, .. } => {
                *f = forward.normalize();
            }
            _ => unreachable!(),
        }
    }

    /// Sets the up reference direction. Same upgrade and zero-vector rules
    /// as [`Rotator::set_forward`].
    pub fn set_up(&mut self, up: Vector3<f32>) {
        if up.magnitude2() <= EPSILON {
            debug_assert!(false, "set_up called with a zero vector");
            log::warn!("set_up ignored: zero direction vector");
            return;
        }
        self.upgrade_to_directional();
        match self {
            Self::Directional { up: u, .. } | Self::Targetting { up: u, .. } => {
                *u = up.normalize();
            }
            _ => unreachable!(),
        }
    }

    /// Starts tracking another node. Upgrades to `Targetting`.
    pub fn set_target(&mut self, target: NodeId) {
        self.upgrade_to_targetting();
        if let Self::Targetting { mode, .. } = self {
            *mode = TrackingMode::TargetNode(target);
        }
    }

    /// Starts tracking a fixed world location. Upgrades to `Targetting`.
    pub fn set_target_location(&mut self, location: Point3<f32>) {
        self.upgrade_to_targetting();
        if let Self::Targetting { mode, .. } = self {
            *mode = TrackingMode::FixedLocation(location);
        }
    }

    /// Stops tracking. The rotator stays `Targetting` (no downgrade) and
    /// keeps its last orientation.
    pub fn clear_target(&mut self) {
        if let Self::Targetting { mode, .. } = self {
            *mode = TrackingMode::NotTracking;
        }
    }

    /// The current tracking mode; non-targetting rotators report
    /// `NotTracking`.
    pub fn tracking_mode(&self) -> TrackingMode {
        match self {
            Self::Targetting { mode, .. } => *mode,
            _ => TrackingMode::NotTracking,
        }
    }

    /// Sets the constraint used while tracking. Upgrades to `Targetting`.
    pub fn set_targetting_constraint(&mut self, constraint: TargettingConstraint) {
        self.upgrade_to_targetting();
        if let Self::Targetting { constraint: c, .. } = self {
            *c = constraint;
        }
    }

    /// The constraint used while tracking.
    pub fn targetting_constraint(&self) -> TargettingConstraint {
        match self {
            Self::Targetting { constraint, .. } => *constraint,
            _ => TargettingConstraint::Free,
        }
    }

    /// Re-orients a targetting rotator so the node's world forward points
    /// along `world_direction`, given the composed world rotation of the
    /// node's ancestors. Called once per update pass while tracking.
    pub(super) fn apply_tracking(
        &mut self,
        world_direction: Vector3<f32>,
        parent_world_rotation: Quaternion<f32>,
    ) {
        if world_direction.magnitude2() <= EPSILON {
            // Node sits exactly on its target; keep the last orientation
            return;
        }

        let (constraint, up_ref) = match self {
            Self::Targetting { constraint, up, .. } => (*constraint, *up),
            _ => return,
        };

        let (direction, up) = match constraint {
            TargettingConstraint::Free => (world_direction, up_ref),
            TargettingConstraint::AxisLocked(axis) => {
                // Project the direction onto the plane perpendicular to the
                // locked axis so the node only yaws around it
                let axis = axis.normalize();
                let projected = world_direction - axis * world_direction.dot(axis);
                if projected.magnitude2() <= EPSILON {
                    return;
                }
                (projected, axis)
            }
        };

        use cgmath::Rotation;
        let world_orientation = look_rotation(direction, up);
        let local = parent_world_rotation.invert() * world_orientation;

        if let Self::Targetting { forward, up, .. } = self {
            *forward = local_axis_z(local);
            *up = local_axis_y(local);
        }
    }

    /// Upgrades to `Directional`, seeded from the current net orientation.
    /// Targetting rotators (already direction-based) are left alone.
    fn upgrade_to_directional(&mut self) {
        match self {
            Self::Directional { .. } | Self::Targetting { .. } => {}
            _ => {
                let orientation = self.orientation();
                *self = Self::Directional {
                    forward: local_axis_z(orientation),
                    up: local_axis_y(orientation),
                };
            }
        }
    }

    /// Upgrades to `Targetting`, seeded from the current net orientation.
    fn upgrade_to_targetting(&mut self) {
        if matches!(self, Self::Targetting { .. }) {
            return;
        }
        let orientation = self.orientation();
        *self = Self::Targetting {
            forward: local_axis_z(orientation),
            up: local_axis_y(orientation),
            mode: TrackingMode::NotTracking,
            constraint: TargettingConstraint::Free,
        };
    }
}
