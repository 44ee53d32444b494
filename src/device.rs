//! Abstract device interface. Concrete drivers (and the fakes the test
//! suite uses) live behind these traits; the core never talks to hardware
//! directly.

use crate::error::XrResult;
use crate::math::{Fov, Pose, Relation, XrDuration, XrTime};
use derive_more::From;
use glam::Vec2;
use std::sync::Arc;

/// The roles a device can fill on a system.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeviceRole {
    Head,
    LeftHand,
    RightHand,
    Gamepad,
    HandTrackingLeft,
    HandTrackingRight,
}

/// One sample from a device input.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct InputState {
    pub active: bool,
    pub timestamp: XrTime,
    pub value: InputValue,
}

#[derive(Copy, Clone, Debug, PartialEq, From)]
pub enum InputValue {
    Bool(bool),
    Float(f32),
    Vec2(Vec2),
    Pose(Relation),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct HapticEvent {
    pub duration: XrDuration,
    pub frequency: f32,
    pub amplitude: f32,
}

/// One eye's pose (relative to the head) and field of view.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewPose {
    pub pose: Pose,
    pub fov: Fov,
}

pub const HAND_JOINT_COUNT: usize = 26;

#[derive(Copy, Clone, Debug)]
pub struct HandJoint {
    pub relation: Relation,
    pub radius: f32,
}

pub type HandJointSet = [HandJoint; HAND_JOINT_COUNT];

/// Recommended/maximum render target parameters for one view.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewConfigurationView {
    pub recommended_width: u32,
    pub max_width: u32,
    pub recommended_height: u32,
    pub max_height: u32,
    pub recommended_sample_count: u32,
    pub max_sample_count: u32,
}

pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    fn supports_hand_tracking(&self) -> bool {
        false
    }

    /// Looks up one row of the device's input table by name. `None` means
    /// the device has no such input at all.
    fn input_state(&self, input: &str) -> Option<InputState>;

    fn has_output(&self, output: &str) -> bool;

    fn apply_haptic(&self, output: &str, event: HapticEvent);

    fn stop_haptic(&self, output: &str);

    /// The device pose in its tracking-origin frame at `time`.
    fn relation_at(&self, time: XrTime) -> Relation;

    /// Head relation plus per-eye poses built from `eye_relation`, the
    /// offset between the two eyes (IPD along +X).
    fn view_relations(&self, eye_relation: Pose, time: XrTime) -> (Relation, [ViewPose; 2]);

    /// Offset from the device's tracking origin to the shared stage origin.
    fn tracking_origin_offset(&self) -> Pose {
        Pose::IDENTITY
    }

    fn hand_joints(&self, _time: XrTime) -> Option<HandJointSet> {
        None
    }

    fn supported_blend_modes(&self) -> Vec<crate::compositor::EnvironmentBlendMode> {
        vec![crate::compositor::EnvironmentBlendMode::Opaque]
    }

    /// Per-view render parameters; only meaningful on the head device.
    fn view_configuration_views(&self) -> [ViewConfigurationView; 2] {
        let view = ViewConfigurationView {
            recommended_width: 1600,
            max_width: 3200,
            recommended_height: 1600,
            max_height: 3200,
            recommended_sample_count: 1,
            max_sample_count: 4,
        };
        [view; 2]
    }
}

/// The devices discovered at instance creation, already sorted into roles.
pub struct ProbedDevices {
    pub head: Arc<dyn Device>,
    pub left: Option<Arc<dyn Device>>,
    pub right: Option<Arc<dyn Device>>,
    pub gamepad: Option<Arc<dyn Device>>,
    pub hand_left: Option<Arc<dyn Device>>,
    pub hand_right: Option<Arc<dyn Device>>,
}

pub trait DeviceProber: Send + Sync {
    fn probe(&self) -> XrResult<ProbedDevices>;
}
