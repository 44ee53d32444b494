use crate::error::{XrError, XrResult};
use bitflags::bitflags;
use glam::{Quat, Vec3};

/// Monotonic runtime timestamp in nanoseconds. Valid times are positive.
pub type XrTime = i64;
/// Span between two [`XrTime`]s, in nanoseconds.
pub type XrDuration = i64;

/// Unit quaternions may drift off-normal by this much before the runtime
/// rejects them.
pub const QUAT_NORM_TOLERANCE: f32 = 0.01;

/// Rigid transform: rotate by `orientation`, then translate by `position`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pose {
    pub orientation: Quat,
    pub position: Vec3,
}

impl Pose {
    pub const IDENTITY: Self = Self {
        orientation: Quat::IDENTITY,
        position: Vec3::ZERO,
    };

    #[inline]
    pub fn new(orientation: Quat, position: Vec3) -> Self {
        Self {
            orientation,
            position,
        }
    }

    #[inline]
    pub fn from_translation(position: Vec3) -> Self {
        Self {
            orientation: Quat::IDENTITY,
            position,
        }
    }

    #[inline]
    pub fn is_identity(&self) -> bool {
        self.orientation == Quat::IDENTITY && self.position == Vec3::ZERO
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    #[inline]
    pub fn multiply(&self, other: &Pose) -> Pose {
        Pose {
            orientation: self.orientation * other.orientation,
            position: self.position + self.orientation * other.position,
        }
    }

    #[inline]
    pub fn invert(&self) -> Pose {
        let inv = self.orientation.conjugate();
        Pose {
            orientation: inv,
            position: -(inv * self.position),
        }
    }

    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.orientation * point
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

bitflags! {
    /// Validity/tracking bits carried through relation composition.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct RelationFlags: u32 {
        const ORIENTATION_VALID = 1 << 0;
        const POSITION_VALID = 1 << 1;
        const LINEAR_VELOCITY_VALID = 1 << 2;
        const ANGULAR_VELOCITY_VALID = 1 << 3;
        const ORIENTATION_TRACKED = 1 << 4;
        const POSITION_TRACKED = 1 << 5;
    }
}

impl RelationFlags {
    /// Everything a fully tracked static pose provides: pose valid and
    /// tracked, with (zero) velocities valid.
    pub const TRACKED_POSE: Self = Self::from_bits_truncate(
        Self::ORIENTATION_VALID.bits()
            | Self::POSITION_VALID.bits()
            | Self::LINEAR_VELOCITY_VALID.bits()
            | Self::ANGULAR_VELOCITY_VALID.bits()
            | Self::ORIENTATION_TRACKED.bits()
            | Self::POSITION_TRACKED.bits(),
    );
}

/// Pose plus first derivatives and their validity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Relation {
    pub pose: Pose,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub flags: RelationFlags,
}

impl Relation {
    /// A relation carrying no information at all.
    pub const EMPTY: Self = Self {
        pose: Pose::IDENTITY,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        flags: RelationFlags::empty(),
    };

    pub const IDENTITY: Self = Self {
        pose: Pose::IDENTITY,
        linear_velocity: Vec3::ZERO,
        angular_velocity: Vec3::ZERO,
        flags: RelationFlags::TRACKED_POSE,
    };

    /// A static offset: the pose is exact and its velocities are zero.
    #[inline]
    pub fn from_pose(pose: Pose) -> Self {
        Self {
            pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            flags: RelationFlags::TRACKED_POSE,
        }
    }

    /// Inverts the pose. Velocity validity does not survive inversion.
    pub fn invert(&self) -> Self {
        Self {
            pose: self.pose.invert(),
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            flags: self.flags
                & !(RelationFlags::LINEAR_VELOCITY_VALID | RelationFlags::ANGULAR_VELOCITY_VALID),
        }
    }
}

impl Default for Relation {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Field of view half-angles in radians; left/down are typically negative.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Offset2Di {
    pub x: i32,
    pub y: i32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Extent2Di {
    pub width: i32,
    pub height: i32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect2Di {
    pub offset: Offset2Di,
    pub extent: Extent2Di,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Extent2Df {
    pub width: f32,
    pub height: f32,
}

/// Rejects quaternions that are non-finite or more than 1% off unit length.
pub fn validate_quat(q: Quat) -> XrResult<()> {
    if !q.is_finite() {
        return Err(XrError::PoseInvalid);
    }
    if (q.length() - 1.0).abs() > QUAT_NORM_TOLERANCE {
        return Err(XrError::PoseInvalid);
    }
    Ok(())
}

pub fn validate_pose(pose: &Pose) -> XrResult<()> {
    validate_quat(pose.orientation)?;
    if !pose.position.is_finite() {
        return Err(XrError::PoseInvalid);
    }
    Ok(())
}

/// Projects a rotation onto the Y axis, discarding pitch and roll. Used to
/// anchor Local-type spaces to where the user first looked.
pub fn project_to_yaw(q: Quat) -> Quat {
    let twist = Quat::from_xyzw(0.0, q.y, 0.0, q.w);
    if twist.length_squared() <= f32::EPSILON {
        Quat::IDENTITY
    } else {
        twist.normalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn pose_multiply_applies_right_operand_first() {
        let rotate = Pose::new(Quat::from_rotation_y(FRAC_PI_2), Vec3::ZERO);
        let translate = Pose::from_translation(Vec3::new(1.0, 0.0, 0.0));

        // Translate in the rotated frame: the offset ends up on -Z.
        let composed = rotate.multiply(&translate);
        assert!(composed.position.abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-6));
    }

    #[test]
    fn pose_invert_round_trips() {
        let pose = Pose::new(
            Quat::from_rotation_y(0.3) * Quat::from_rotation_x(0.1),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let round_trip = pose.multiply(&pose.invert());
        assert!(round_trip.position.abs_diff_eq(Vec3::ZERO, 1e-5));
        assert!(round_trip.orientation.abs_diff_eq(Quat::IDENTITY, 1e-5));
    }

    #[test]
    fn quat_validation_tolerance() {
        assert_eq!(validate_quat(Quat::IDENTITY), Ok(()));
        assert_eq!(
            validate_quat(Quat::from_xyzw(0.0, 0.0, 0.0, 1.005)),
            Ok(())
        );
        assert_eq!(
            validate_quat(Quat::from_xyzw(1.0, 1.0, 1.0, 1.0)),
            Err(XrError::PoseInvalid)
        );
        assert_eq!(
            validate_quat(Quat::from_xyzw(0.0, 0.0, 0.0, f32::NAN)),
            Err(XrError::PoseInvalid)
        );
    }

    #[test]
    fn yaw_projection_drops_pitch_and_roll() {
        let q = Quat::from_rotation_y(0.8) * Quat::from_rotation_x(0.4);
        let yaw = project_to_yaw(q);
        assert_eq!(yaw.x, 0.0);
        assert_eq!(yaw.z, 0.0);
        assert!((yaw.length() - 1.0).abs() < 1e-6);

        // Pure pitch has no yaw component at all.
        assert_eq!(project_to_yaw(Quat::from_rotation_x(0.4)), Quat::IDENTITY);
    }

    #[test]
    fn inverted_relation_loses_velocity_validity() {
        let rel = Relation {
            pose: Pose::from_translation(Vec3::X),
            linear_velocity: Vec3::Y,
            angular_velocity: Vec3::Z,
            flags: RelationFlags::TRACKED_POSE,
        };
        let inv = rel.invert();
        assert!(!inv.flags.contains(RelationFlags::LINEAR_VELOCITY_VALID));
        assert!(!inv.flags.contains(RelationFlags::ANGULAR_VELOCITY_VALID));
        assert!(inv.flags.contains(RelationFlags::ORIENTATION_VALID));
    }
}
