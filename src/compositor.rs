//! Abstract compositor and swapchain backend interfaces, plus the typed
//! layer descriptors the session submission path emits into them.
//!
//! Concrete backends (Vulkan/GL/D3D native compositors) are produced by a
//! [`CompositorFactory`]; the core never includes a graphics API header's
//! worth of detail.

use crate::error::XrResult;
use crate::math::{Extent2Df, Fov, Pose, Rect2Di, XrDuration};
use bitflags::bitflags;
use glam::{Quat, Vec2};
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnvironmentBlendMode {
    Opaque,
    Additive,
    AlphaBlend,
}

/// Timing handed back by the compositor's frame clock. `frame_id` is opaque
/// and monotonic; the same id must flow through begin and commit.
#[derive(Copy, Clone, Debug)]
pub struct FrameTiming {
    pub frame_id: i64,
    pub display_time_ns: i64,
    pub display_period_ns: i64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompositorEvent {
    StateChange { visible: bool, focused: bool },
    OverlayChange { visible: bool },
}

/// How a commit is synchronized with the client's graphics work.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommitSync {
    None,
    TimelineSemaphore(u64),
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SwapchainUsageFlags: u32 {
        const COLOR_ATTACHMENT = 1 << 0;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 1;
        const UNORDERED_ACCESS = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
        const SAMPLED = 1 << 5;
        const MUTABLE_FORMAT = 1 << 6;
    }
}

#[derive(Copy, Clone, Debug)]
pub struct SwapchainCreateInfo {
    pub usage: SwapchainUsageFlags,
    pub format: i64,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
    pub face_count: u32,
    pub array_size: u32,
    pub mip_count: u32,
    /// Static swapchains admit exactly one acquire/wait/release cycle.
    pub is_static: bool,
}

/// Passed to the factory when a session brings up its native compositor.
#[derive(Copy, Clone, Debug)]
pub struct CompositorCreateInfo {
    pub force_timeline_semaphores: bool,
}

pub trait SwapchainBackend: Send + Sync {
    fn image_count(&self) -> usize;

    /// Hands out the next image index. The returned image must be in the
    /// Ready state or the core treats it as a backend bug.
    fn acquire(&self) -> XrResult<u32>;

    /// Blocks until the image is ready for writing, up to `timeout`.
    fn wait(&self, index: u32, timeout: XrDuration) -> XrResult<()>;

    fn release(&self, index: u32) -> XrResult<()>;
}

pub trait CompositorBackend: Send + Sync {
    fn begin_session(&self) -> XrResult<()>;

    fn end_session(&self);

    /// Blocks until the pacing clock says the next frame should start.
    fn wait_frame(&self) -> XrResult<FrameTiming>;

    fn begin_frame(&self, frame_id: i64) -> XrResult<()>;

    fn discard_frame(&self, frame_id: i64);

    fn layer_begin(&self, frame_id: i64, blend_mode: EnvironmentBlendMode);

    fn submit_layer(&self, layer: &SubmittedLayer);

    fn layer_commit(&self, frame_id: i64, sync: CommitSync) -> XrResult<()>;

    fn create_swapchain(&self, info: &SwapchainCreateInfo) -> XrResult<Arc<dyn SwapchainBackend>>;

    fn poll_event(&self) -> Option<CompositorEvent>;
}

pub trait CompositorFactory: Send + Sync {
    fn create_native_compositor(
        &self,
        info: &CompositorCreateInfo,
    ) -> XrResult<Arc<dyn CompositorBackend>>;
}

/// One projection view, pose already resolved into the compositor's frame.
pub struct SubmittedView {
    pub pose: Pose,
    pub fov: Fov,
    pub swapchain: Arc<dyn SwapchainBackend>,
    pub image_rect: Rect2Di,
    pub image_array_index: u32,
    pub depth: Option<SubmittedDepth>,
}

#[derive(Copy, Clone, Debug)]
pub struct SubmittedDepth {
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

/// A layer after validation and space resolution, ready for the backend.
pub struct SubmittedLayer {
    /// Pose relative to the compositor frame, or to the view when
    /// `view_space` is set.
    pub pose: Pose,
    pub view_space: bool,
    pub data: SubmittedLayerData,
}

pub enum SubmittedLayerData {
    Projection {
        views: [SubmittedView; 2],
    },
    Quad {
        swapchain: Arc<dyn SwapchainBackend>,
        image_rect: Rect2Di,
        image_array_index: u32,
        size: Extent2Df,
    },
    Cube {
        swapchain: Arc<dyn SwapchainBackend>,
        image_array_index: u32,
        orientation: Quat,
    },
    Cylinder {
        swapchain: Arc<dyn SwapchainBackend>,
        image_rect: Rect2Di,
        image_array_index: u32,
        radius: f32,
        central_angle: f32,
        aspect_ratio: f32,
    },
    Equirect {
        swapchain: Arc<dyn SwapchainBackend>,
        image_rect: Rect2Di,
        image_array_index: u32,
        radius: f32,
        scale: Vec2,
        bias: Vec2,
    },
    Equirect2 {
        swapchain: Arc<dyn SwapchainBackend>,
        image_rect: Rect2Di,
        image_array_index: u32,
        radius: f32,
        central_horizontal_angle: f32,
        upper_vertical_angle: f32,
        lower_vertical_angle: f32,
    },
}
