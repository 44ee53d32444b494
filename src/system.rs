//! The system: the head device plus whatever role devices the prober found,
//! and the view configuration they support.

use crate::compositor::EnvironmentBlendMode;
use crate::device::{Device, DeviceProber, DeviceRole, ViewConfigurationView};
use crate::error::{XrError, XrResult};
use log::info;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormFactor {
    HeadMountedDisplay,
    HandheldDisplay,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ViewConfigurationType {
    PrimaryStereo,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ViewConfigurationProperties {
    pub view_configuration: ViewConfigurationType,
    pub fov_mutable: bool,
}

#[derive(Clone, Debug)]
pub struct SystemProperties {
    pub system_name: String,
    pub orientation_tracking: bool,
    pub position_tracking: bool,
    pub hand_tracking: bool,
    pub max_layer_count: u32,
    pub max_swapchain_width: u32,
    pub max_swapchain_height: u32,
}

/// The most layers one frame may submit.
pub const MAX_COMPOSITION_LAYERS: usize = 16;

pub struct System {
    pub(crate) head: Arc<dyn Device>,
    pub(crate) left: Option<Arc<dyn Device>>,
    pub(crate) right: Option<Arc<dyn Device>>,
    pub(crate) gamepad: Option<Arc<dyn Device>>,
    pub(crate) hand_left: Option<Arc<dyn Device>>,
    pub(crate) hand_right: Option<Arc<dyn Device>>,
    views: [ViewConfigurationView; 2],
    blend_modes: Vec<EnvironmentBlendMode>,
}

impl System {
    pub(crate) fn from_prober(prober: &dyn DeviceProber) -> XrResult<Self> {
        let devices = prober.probe()?;
        let views = devices.head.view_configuration_views();
        let blend_modes = devices.head.supported_blend_modes();
        if blend_modes.is_empty() {
            return Err(XrError::RuntimeFailure("head device has no blend modes"));
        }

        info!(
            "System: head={:?} left={:?} right={:?} gamepad={:?}",
            devices.head.name(),
            devices.left.as_ref().map(|d| d.name().to_owned()),
            devices.right.as_ref().map(|d| d.name().to_owned()),
            devices.gamepad.as_ref().map(|d| d.name().to_owned()),
        );

        Ok(Self {
            head: devices.head,
            left: devices.left,
            right: devices.right,
            gamepad: devices.gamepad,
            hand_left: devices.hand_left,
            hand_right: devices.hand_right,
            views,
            blend_modes,
        })
    }

    pub(crate) fn device_for_role(&self, role: DeviceRole) -> Option<&Arc<dyn Device>> {
        match role {
            DeviceRole::Head => Some(&self.head),
            DeviceRole::LeftHand => self.left.as_ref(),
            DeviceRole::RightHand => self.right.as_ref(),
            DeviceRole::Gamepad => self.gamepad.as_ref(),
            DeviceRole::HandTrackingLeft => self.hand_left.as_ref(),
            DeviceRole::HandTrackingRight => self.hand_right.as_ref(),
        }
    }

    pub(crate) fn views(&self) -> &[ViewConfigurationView; 2] {
        &self.views
    }

    pub(crate) fn blend_modes(&self) -> &[EnvironmentBlendMode] {
        &self.blend_modes
    }

    pub(crate) fn supports_blend_mode(&self, mode: EnvironmentBlendMode) -> bool {
        self.blend_modes.contains(&mode)
    }

    pub(crate) fn properties(&self) -> SystemProperties {
        SystemProperties {
            system_name: self.head.name().to_owned(),
            orientation_tracking: true,
            position_tracking: true,
            hand_tracking: self.head.supports_hand_tracking()
                || self.hand_left.is_some()
                || self.hand_right.is_some(),
            max_layer_count: MAX_COMPOSITION_LAYERS as u32,
            max_swapchain_width: self.views[0].max_width,
            max_swapchain_height: self.views[0].max_height,
        }
    }
}
