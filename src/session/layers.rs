//! Composition layer validation and the submission path into the
//! compositor backend.

use super::Session;
use crate::compositor::{
    CompositorBackend, SubmittedDepth, SubmittedLayer, SubmittedLayerData, SubmittedView,
};
use crate::error::{XrError, XrResult};
use crate::handles::Handle;
use crate::instance::Instance;
use crate::math::{self, Extent2Df, Fov, Pose, Rect2Di, XrTime};
use crate::relation_chain::RelationChain;
use crate::spaces::{ReferenceSpaceType, Space, SpaceKind};
use crate::swapchain::Swapchain;
use glam::{Quat, Vec2};
use log::trace;
use std::f32::consts::TAU;
use std::sync::Arc;

#[derive(Copy, Clone, Debug)]
pub struct SwapchainSubImage {
    pub swapchain: Handle<Swapchain>,
    pub image_rect: Rect2Di,
    pub image_array_index: u32,
}

#[derive(Copy, Clone, Debug)]
pub struct DepthInfo {
    pub min_depth: f32,
    pub max_depth: f32,
    pub near_z: f32,
    pub far_z: f32,
}

#[derive(Copy, Clone, Debug)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    pub sub_image: SwapchainSubImage,
    pub depth: Option<DepthInfo>,
}

/// The composition layers a frame may submit. Everything past Projection
/// and Quad is gated on its extension.
pub enum Layer {
    Projection {
        space: Handle<Space>,
        views: Vec<ProjectionView>,
    },
    Quad {
        space: Handle<Space>,
        pose: Pose,
        sub_image: SwapchainSubImage,
        size: Extent2Df,
    },
    Cube {
        space: Handle<Space>,
        orientation: Quat,
        swapchain: Handle<Swapchain>,
        image_array_index: u32,
    },
    Cylinder {
        space: Handle<Space>,
        pose: Pose,
        sub_image: SwapchainSubImage,
        radius: f32,
        central_angle: f32,
        aspect_ratio: f32,
    },
    Equirect {
        space: Handle<Space>,
        pose: Pose,
        sub_image: SwapchainSubImage,
        radius: f32,
        scale: Vec2,
        bias: Vec2,
    },
    Equirect2 {
        space: Handle<Space>,
        pose: Pose,
        sub_image: SwapchainSubImage,
        radius: f32,
        central_horizontal_angle: f32,
        upper_vertical_angle: f32,
        lower_vertical_angle: f32,
    },
}

impl Layer {
    fn space(&self) -> Handle<Space> {
        match self {
            Self::Projection { space, .. }
            | Self::Quad { space, .. }
            | Self::Cube { space, .. }
            | Self::Cylinder { space, .. }
            | Self::Equirect { space, .. }
            | Self::Equirect2 { space, .. } => *space,
        }
    }
}

pub struct FrameEndInfo<'a> {
    pub display_time: XrTime,
    pub environment_blend_mode: crate::compositor::EnvironmentBlendMode,
    pub layers: &'a [Layer],
}

/// A layer whose handles resolved during validation; submission works from
/// these so a concurrent destroy can't fail the frame halfway through.
pub(super) struct ResolvedLayer<'a> {
    layer: &'a Layer,
    space: Arc<Space>,
    swapchains: Vec<Arc<Swapchain>>,
}

impl Session {
    pub(super) fn validate_layers<'a>(
        self: &Arc<Self>,
        instance: &Arc<Instance>,
        layers: &'a [Layer],
    ) -> XrResult<Vec<ResolvedLayer<'a>>> {
        layers
            .iter()
            .map(|layer| self.validate_layer(instance, layer))
            .collect()
    }

    fn validate_layer<'a>(
        self: &Arc<Self>,
        instance: &Arc<Instance>,
        layer: &'a Layer,
    ) -> XrResult<ResolvedLayer<'a>> {
        let extensions = &instance.extensions;
        match layer {
            Layer::Projection { .. } | Layer::Quad { .. } => {}
            Layer::Cube { .. } if !extensions.khr_composition_layer_cube => {
                return Err(XrError::LayerInvalid("cube layers not enabled"));
            }
            Layer::Cylinder { .. } if !extensions.khr_composition_layer_cylinder => {
                return Err(XrError::LayerInvalid("cylinder layers not enabled"));
            }
            Layer::Equirect { .. } if !extensions.khr_composition_layer_equirect => {
                return Err(XrError::LayerInvalid("equirect layers not enabled"));
            }
            Layer::Equirect2 { .. } if !extensions.khr_composition_layer_equirect2 => {
                return Err(XrError::LayerInvalid("equirect2 layers not enabled"));
            }
            _ => {}
        }

        let space = instance.registry.get(layer.space())?;
        let owner = space.session.upgrade().ok_or(XrError::HandleInvalid)?;
        if !Arc::ptr_eq(&owner, self) {
            return Err(XrError::ValidationFailure("space belongs to another session"));
        }

        let mut swapchains = Vec::new();
        match layer {
            Layer::Projection { views, .. } => {
                if views.len() != 2 {
                    return Err(XrError::ValidationFailure(
                        "projection layers need exactly two views",
                    ));
                }
                let with_depth = views.iter().filter(|v| v.depth.is_some()).count();
                if with_depth != 0 && with_depth != views.len() {
                    return Err(XrError::ValidationFailure(
                        "depth must be chained on all views or none",
                    ));
                }
                for view in views {
                    math::validate_pose(&view.pose)?;
                    swapchains.push(self.validate_sub_image(instance, &view.sub_image)?);
                    if let Some(depth) = &view.depth {
                        validate_depth(depth)?;
                    }
                }
            }
            Layer::Quad {
                pose,
                sub_image,
                size,
                ..
            } => {
                math::validate_pose(pose)?;
                if !(size.width.is_finite() && size.height.is_finite()) {
                    return Err(XrError::ValidationFailure("non-finite quad size"));
                }
                swapchains.push(self.validate_sub_image(instance, sub_image)?);
            }
            Layer::Cube {
                orientation,
                swapchain,
                image_array_index,
                ..
            } => {
                math::validate_quat(*orientation)?;
                let swapchain = instance.registry.get(*swapchain)?;
                self.validate_swapchain_released(&swapchain)?;
                if *image_array_index >= swapchain.create_info().array_size {
                    return Err(XrError::ValidationFailure("image array index out of range"));
                }
                swapchains.push(swapchain);
            }
            Layer::Cylinder {
                pose,
                sub_image,
                radius,
                central_angle,
                aspect_ratio,
                ..
            } => {
                math::validate_pose(pose)?;
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(XrError::ValidationFailure("negative cylinder radius"));
                }
                if !(0.0..=TAU).contains(central_angle) {
                    return Err(XrError::ValidationFailure("cylinder central angle out of range"));
                }
                if !aspect_ratio.is_finite() || *aspect_ratio <= 0.0 {
                    return Err(XrError::ValidationFailure("non-positive cylinder aspect ratio"));
                }
                swapchains.push(self.validate_sub_image(instance, sub_image)?);
            }
            Layer::Equirect {
                pose,
                sub_image,
                radius,
                ..
            } => {
                math::validate_pose(pose)?;
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(XrError::ValidationFailure("negative equirect radius"));
                }
                swapchains.push(self.validate_sub_image(instance, sub_image)?);
            }
            Layer::Equirect2 {
                pose,
                sub_image,
                radius,
                central_horizontal_angle,
                upper_vertical_angle,
                lower_vertical_angle,
                ..
            } => {
                math::validate_pose(pose)?;
                if !radius.is_finite() || *radius < 0.0 {
                    return Err(XrError::ValidationFailure("negative equirect radius"));
                }
                if !(0.0..=TAU).contains(central_horizontal_angle) {
                    return Err(XrError::ValidationFailure(
                        "equirect horizontal angle out of range",
                    ));
                }
                for angle in [upper_vertical_angle, lower_vertical_angle] {
                    if !angle.is_finite() {
                        return Err(XrError::ValidationFailure("non-finite equirect angle"));
                    }
                }
                swapchains.push(self.validate_sub_image(instance, sub_image)?);
            }
        }

        Ok(ResolvedLayer {
            layer,
            space,
            swapchains,
        })
    }

    fn validate_sub_image(
        self: &Arc<Self>,
        instance: &Arc<Instance>,
        sub_image: &SwapchainSubImage,
    ) -> XrResult<Arc<Swapchain>> {
        let swapchain = instance.registry.get(sub_image.swapchain)?;
        self.validate_swapchain_released(&swapchain)?;

        let info = swapchain.create_info();
        if sub_image.image_array_index >= info.array_size {
            return Err(XrError::ValidationFailure("image array index out of range"));
        }

        let rect = &sub_image.image_rect;
        if rect.offset.x < 0 || rect.offset.y < 0 {
            return Err(XrError::SwapchainRectInvalid);
        }
        if rect.extent.width <= 0 || rect.extent.height <= 0 {
            return Err(XrError::SwapchainRectInvalid);
        }
        let right = rect.offset.x as i64 + rect.extent.width as i64;
        let bottom = rect.offset.y as i64 + rect.extent.height as i64;
        if right > info.width as i64 || bottom > info.height as i64 {
            return Err(XrError::SwapchainRectInvalid);
        }
        Ok(swapchain)
    }

    fn validate_swapchain_released(self: &Arc<Self>, swapchain: &Arc<Swapchain>) -> XrResult<()> {
        let owner = swapchain.session.upgrade().ok_or(XrError::HandleInvalid)?;
        if !Arc::ptr_eq(&owner, self) {
            return Err(XrError::ValidationFailure(
                "swapchain belongs to another session",
            ));
        }
        let Some(released) = swapchain.released_index() else {
            return Err(XrError::LayerInvalid("swapchain has no released image"));
        };
        if released as usize >= swapchain.image_count() {
            return Err(XrError::RuntimeFailure("released image index out of range"));
        }
        Ok(())
    }

    /// Emits every resolved layer into the compositor and commits the
    /// frame. Action-space layers whose pose source is inactive are
    /// skipped, not errors.
    pub(super) fn submit_layers(
        self: &Arc<Self>,
        instance: &Arc<Instance>,
        compositor: &dyn CompositorBackend,
        frame_id: i64,
        info: &FrameEndInfo<'_>,
        resolved: Vec<ResolvedLayer<'_>>,
    ) -> XrResult<()> {
        compositor.layer_begin(frame_id, info.environment_blend_mode);

        for entry in &resolved {
            let Some((pose, view_space)) =
                self.layer_space_pose(instance, &entry.space, info.display_time)?
            else {
                trace!("Skipping layer with inactive action space");
                continue;
            };

            let data = match entry.layer {
                Layer::Projection { views, .. } => {
                    let mut submitted = Vec::with_capacity(2);
                    for (view, swapchain) in views.iter().zip(&entry.swapchains) {
                        submitted.push(SubmittedView {
                            pose: pose.multiply(&view.pose),
                            fov: view.fov,
                            swapchain: swapchain.backend.clone(),
                            image_rect: view.sub_image.image_rect,
                            image_array_index: view.sub_image.image_array_index,
                            depth: view.depth.map(|d| SubmittedDepth {
                                min_depth: d.min_depth,
                                max_depth: d.max_depth,
                                near_z: d.near_z,
                                far_z: d.far_z,
                            }),
                        });
                    }
                    let Ok(views) = <[SubmittedView; 2]>::try_from(submitted) else {
                        return Err(XrError::RuntimeFailure("projection view count changed"));
                    };
                    SubmittedLayerData::Projection { views }
                }
                Layer::Quad {
                    sub_image, size, ..
                } => SubmittedLayerData::Quad {
                    swapchain: entry.swapchains[0].backend.clone(),
                    image_rect: sub_image.image_rect,
                    image_array_index: sub_image.image_array_index,
                    size: *size,
                },
                Layer::Cube {
                    orientation,
                    image_array_index,
                    ..
                } => SubmittedLayerData::Cube {
                    swapchain: entry.swapchains[0].backend.clone(),
                    image_array_index: *image_array_index,
                    orientation: *orientation,
                },
                Layer::Cylinder {
                    sub_image,
                    radius,
                    central_angle,
                    aspect_ratio,
                    ..
                } => SubmittedLayerData::Cylinder {
                    swapchain: entry.swapchains[0].backend.clone(),
                    image_rect: sub_image.image_rect,
                    image_array_index: sub_image.image_array_index,
                    radius: *radius,
                    central_angle: *central_angle,
                    aspect_ratio: *aspect_ratio,
                },
                Layer::Equirect {
                    sub_image,
                    radius,
                    scale,
                    bias,
                    ..
                } => SubmittedLayerData::Equirect {
                    swapchain: entry.swapchains[0].backend.clone(),
                    image_rect: sub_image.image_rect,
                    image_array_index: sub_image.image_array_index,
                    radius: *radius,
                    scale: *scale,
                    bias: *bias,
                },
                Layer::Equirect2 {
                    sub_image,
                    radius,
                    central_horizontal_angle,
                    upper_vertical_angle,
                    lower_vertical_angle,
                    ..
                } => SubmittedLayerData::Equirect2 {
                    swapchain: entry.swapchains[0].backend.clone(),
                    image_rect: sub_image.image_rect,
                    image_array_index: sub_image.image_array_index,
                    radius: *radius,
                    central_horizontal_angle: *central_horizontal_angle,
                    upper_vertical_angle: *upper_vertical_angle,
                    lower_vertical_angle: *lower_vertical_angle,
                },
            };

            // Non-projection layers carry their own pose within the space.
            let pose = match entry.layer {
                Layer::Projection { .. } | Layer::Cube { .. } => pose,
                Layer::Quad { pose: p, .. }
                | Layer::Cylinder { pose: p, .. }
                | Layer::Equirect { pose: p, .. }
                | Layer::Equirect2 { pose: p, .. } => pose.multiply(p),
            };

            compositor.submit_layer(&SubmittedLayer {
                pose,
                view_space,
                data,
            });
        }

        if compositor
            .layer_commit(frame_id, self.commit_sync(instance, frame_id))
            .is_err()
        {
            self.mark_loss_pending();
            return Err(XrError::InstanceLost);
        }
        Ok(())
    }

    /// The layer space's pose in the compositor frame: tracking origin
    /// removed for world spaces, identity-anchored for View spaces (which
    /// instead set the view-space flag). `None` means the layer should be
    /// skipped because its action space is inactive.
    fn layer_space_pose(
        self: &Arc<Self>,
        instance: &Arc<Instance>,
        space: &Arc<Space>,
        display_time: XrTime,
    ) -> XrResult<Option<(Pose, bool)>> {
        match space.kind {
            SpaceKind::Reference(ReferenceSpaceType::View) => Ok(Some((space.pose, true))),
            SpaceKind::Reference(reference) => {
                let mut chain = RelationChain::new();
                chain.push_pose_if_not_identity(space.pose);
                chain.push_relation(self.reference_in_stage(reference, display_time)?);
                let origin = instance.system.head.tracking_origin_offset();
                if !origin.is_identity() {
                    chain.push_inverted_pose(origin);
                }
                Ok(Some((chain.resolve().pose, false)))
            }
            SpaceKind::Action { action, subaction } => {
                let Some(relation) = self.action_pose_relation(action, subaction, display_time)
                else {
                    return Ok(None);
                };
                let mut chain = RelationChain::new();
                chain.push_pose_if_not_identity(space.pose);
                chain.push_relation(relation);
                let origin = instance.system.head.tracking_origin_offset();
                if !origin.is_identity() {
                    chain.push_inverted_pose(origin);
                }
                Ok(Some((chain.resolve().pose, false)))
            }
        }
    }
}

fn validate_depth(depth: &DepthInfo) -> XrResult<()> {
    for value in [depth.min_depth, depth.max_depth] {
        if !(0.0..=1.0).contains(&value) {
            return Err(XrError::ValidationFailure("depth bounds outside [0, 1]"));
        }
    }
    if depth.min_depth > depth.max_depth {
        return Err(XrError::ValidationFailure("min depth above max depth"));
    }
    if !depth.near_z.is_finite() || !depth.far_z.is_finite() || depth.near_z == depth.far_z {
        return Err(XrError::ValidationFailure("degenerate depth range"));
    }
    Ok(())
}
