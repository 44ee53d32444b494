//! Frame pacing: waitFrame / beginFrame / endFrame ordering, and view
//! location.
//!
//! The contract is asymmetric: the N+1-th waitFrame blocks until the N-th
//! beginFrame, which a binary semaphore states exactly. The wait counter on
//! top of it bounds how many waited frames can exist (two, when the client
//! pipelines) and lets beginFrame tell a pipelined begin from a misuse.

use super::layers::FrameEndInfo;
use super::{Session, SessionState};
use crate::compositor::{CommitSync, CompositorBackend, FrameTiming};
use crate::error::{XrError, XrResult};
use crate::instance::Instance;
use crate::handles::Handle;
use crate::math::{self, Fov, Pose, RelationFlags, XrDuration, XrTime};
use crate::relation_chain::RelationChain;
use crate::spaces::{Space, SpaceKind};
use crate::system::ViewConfigurationType;
use bitflags::bitflags;
use glam::Vec3;
use log::{info, trace};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Synthesized display period for sessions without a compositor clock.
const HEADLESS_FRAME_PERIOD_NS: i64 = 16_666_667;

/// A binary semaphore. A plain condition variable would let two waiters
/// race past one release; the open/closed bit is the whole point.
pub(crate) struct BinarySemaphore {
    open: Mutex<bool>,
    cond: Condvar,
}

impl BinarySemaphore {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
            cond: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        *open = false;
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cond.notify_one();
    }
}

pub(crate) struct FramePacer {
    /// Acquired by waitFrame, released by beginFrame.
    wait_gate: BinarySemaphore,
    /// Frames that have been waited but not yet ended (or discarded).
    active_wait_frames: AtomicU32,
    /// Compositor ids of the frame pair; -1 when absent.
    waited_frame: AtomicI64,
    begun_frame: AtomicI64,
    frame_started: AtomicBool,
    /// Serializes begin/end bookkeeping against each other.
    begin_end_lock: Mutex<()>,
    headless_next_id: AtomicI64,
    last_predicted: AtomicI64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            wait_gate: BinarySemaphore::new(),
            active_wait_frames: AtomicU32::new(0),
            waited_frame: AtomicI64::new(-1),
            begun_frame: AtomicI64::new(-1),
            frame_started: AtomicBool::new(false),
            begin_end_lock: Mutex::new(()),
            headless_next_id: AtomicI64::new(1),
            last_predicted: AtomicI64::new(0),
        }
    }

    /// Discards whatever the frame pair still holds and reopens the gate.
    /// Used when a session ends mid-frame.
    pub(crate) fn discard_in_flight(&self, compositor: Option<&dyn CompositorBackend>) {
        let _guard = self.begin_end_lock.lock().unwrap();
        for id in [
            self.begun_frame.swap(-1, Ordering::AcqRel),
            self.waited_frame.swap(-1, Ordering::AcqRel),
        ] {
            if id != -1 {
                if let Some(compositor) = compositor {
                    compositor.discard_frame(id);
                }
            }
        }
        self.frame_started.store(false, Ordering::Release);
        self.active_wait_frames.store(0, Ordering::Release);
        self.wait_gate.release();
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameWaitState {
    pub predicted_display_time: XrTime,
    pub predicted_display_period: XrDuration,
    pub should_render: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameBeginOutcome {
    Started,
    /// The previous begun frame was thrown away to begin this one.
    Discarded,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct ViewStateFlags: u32 {
        const ORIENTATION_VALID = 1 << 0;
        const POSITION_VALID = 1 << 1;
        const ORIENTATION_TRACKED = 1 << 2;
        const POSITION_TRACKED = 1 << 3;
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct View {
    pub pose: Pose,
    pub fov: Fov,
}

impl Session {
    /// Blocks until the pacing gate and the compositor both say the next
    /// frame may start, then predicts its display time.
    pub fn wait_frame(&self) -> XrResult<FrameWaitState> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }

        self.frame.wait_gate.acquire();
        self.frame.active_wait_frames.fetch_add(1, Ordering::AcqRel);

        let timing = match &self.compositor {
            Some(compositor) => match compositor.wait_frame() {
                Ok(timing) => timing,
                Err(_) => {
                    self.frame.active_wait_frames.fetch_sub(1, Ordering::AcqRel);
                    self.frame.wait_gate.release();
                    self.mark_loss_pending();
                    return Err(XrError::InstanceLost);
                }
            },
            None => self.headless_timing(),
        };

        if timing.display_time_ns <= 0 {
            self.frame.active_wait_frames.fetch_sub(1, Ordering::AcqRel);
            self.frame.wait_gate.release();
            return Err(XrError::RuntimeFailure("non-positive predicted display time"));
        }

        self.frame.waited_frame.store(timing.frame_id, Ordering::Release);
        let predicted_display_time = instance.xr_time_from_monotonic_ns(timing.display_time_ns);
        let should_render = self.compositor.is_some()
            && matches!(
                self.state(),
                SessionState::Visible | SessionState::Focused | SessionState::Stopping
            );

        if instance.config.frame_timing_spew {
            info!(
                "waitFrame: frame {} predicted display {predicted_display_time} period {}",
                timing.frame_id, timing.display_period_ns
            );
        }
        Ok(FrameWaitState {
            predicted_display_time,
            predicted_display_period: timing.display_period_ns,
            should_render,
        })
    }

    /// Fabricates strictly advancing frame timing when there is no
    /// compositor clock to ask.
    fn headless_timing(&self) -> FrameTiming {
        let frame_id = self.frame.headless_next_id.fetch_add(1, Ordering::AcqRel);
        let now = crate::monotonic_time_ns();
        let previous = self
            .frame
            .last_predicted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some((now + HEADLESS_FRAME_PERIOD_NS).max(last + HEADLESS_FRAME_PERIOD_NS))
            })
            .unwrap();
        let display_time_ns =
            (now + HEADLESS_FRAME_PERIOD_NS).max(previous + HEADLESS_FRAME_PERIOD_NS);
        FrameTiming {
            frame_id,
            display_time_ns,
            display_period_ns: HEADLESS_FRAME_PERIOD_NS,
        }
    }

    pub fn begin_frame(&self) -> XrResult<FrameBeginOutcome> {
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        let _guard = self.frame.begin_end_lock.lock().unwrap();

        let active = self.frame.active_wait_frames.load(Ordering::Acquire);
        if active == 0 {
            return Err(XrError::CallOrderInvalid);
        }

        if !self.frame.frame_started.load(Ordering::Acquire) {
            // A concurrent waitFrame may have bumped the counter without
            // having produced its frame id yet; that begin is early.
            let frame_id = self.frame.waited_frame.swap(-1, Ordering::AcqRel);
            if frame_id == -1 {
                return Err(XrError::CallOrderInvalid);
            }
            self.begin_with_compositor(frame_id)?;
            self.frame.frame_started.store(true, Ordering::Release);
            self.frame.begun_frame.store(frame_id, Ordering::Release);
            self.frame.wait_gate.release();
            Ok(FrameBeginOutcome::Started)
        } else if active == 2 {
            let frame_id = self.frame.waited_frame.swap(-1, Ordering::AcqRel);
            if frame_id == -1 {
                return Err(XrError::CallOrderInvalid);
            }
            // Pipelined begin-begin: the frame begun earlier never reached
            // endFrame, so it is discarded in favor of the newly waited one.
            let discarded = self.frame.begun_frame.load(Ordering::Acquire);
            if let Some(compositor) = &self.compositor {
                compositor.discard_frame(discarded);
            }
            trace!("beginFrame discarding frame {discarded}");
            self.frame.active_wait_frames.fetch_sub(1, Ordering::AcqRel);

            self.begin_with_compositor(frame_id)?;
            self.frame.begun_frame.store(frame_id, Ordering::Release);
            self.frame.wait_gate.release();
            Ok(FrameBeginOutcome::Discarded)
        } else {
            Err(XrError::CallOrderInvalid)
        }
    }

    fn begin_with_compositor(&self, frame_id: i64) -> XrResult<()> {
        if let Some(compositor) = &self.compositor {
            if compositor.begin_frame(frame_id).is_err() {
                self.mark_loss_pending();
                return Err(XrError::InstanceLost);
            }
        }
        Ok(())
    }

    /// Submits (or discards) the begun frame. Validation happens before any
    /// state is consumed, so a rejected frame can be resubmitted.
    pub fn end_frame(self: &Arc<Self>, info: &FrameEndInfo<'_>) -> XrResult<()> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        let _guard = self.frame.begin_end_lock.lock().unwrap();
        if !self.frame.frame_started.load(Ordering::Acquire) {
            return Err(XrError::CallOrderInvalid);
        }
        if info.display_time <= 0 {
            return Err(XrError::TimeInvalid);
        }
        if !instance.system.supports_blend_mode(info.environment_blend_mode) {
            return Err(XrError::EnvironmentBlendModeUnsupported);
        }
        if info.layers.len() > crate::system::MAX_COMPOSITION_LAYERS {
            return Err(XrError::LimitReached);
        }

        let resolved = self.validate_layers(&instance, info.layers)?;

        let frame_id = self.frame.begun_frame.swap(-1, Ordering::AcqRel);
        if let Some(compositor) = &self.compositor {
            if resolved.is_empty() {
                trace!("endFrame: no layers, discarding frame {frame_id}");
                compositor.discard_frame(frame_id);
            } else {
                self.submit_layers(&instance, compositor.as_ref(), frame_id, info, resolved)?;
            }
        }

        self.frame.frame_started.store(false, Ordering::Release);
        self.frame.active_wait_frames.fetch_sub(1, Ordering::AcqRel);
        if instance.config.frame_timing_spew {
            info!(
                "endFrame: frame {frame_id} display time {} layers {}",
                info.display_time,
                info.layers.len()
            );
        }
        Ok(())
    }

    pub(crate) fn commit_sync(&self, instance: &Arc<Instance>, frame_id: i64) -> CommitSync {
        if instance.config.force_timeline_semaphores {
            CommitSync::TimelineSemaphore(frame_id as u64)
        } else {
            CommitSync::None
        }
    }

    /// Locates the per-eye views relative to `base` at `display_time`.
    pub fn locate_views(
        self: &Arc<Self>,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        base: Handle<Space>,
    ) -> XrResult<(ViewStateFlags, [View; 2])> {
        let instance = self.instance()?;
        if view_configuration != ViewConfigurationType::PrimaryStereo {
            return Err(XrError::ViewConfigurationUnsupported);
        }
        if display_time <= 0 {
            return Err(XrError::TimeInvalid);
        }
        let base = instance.registry.get(base)?;
        let owner = base.session.upgrade().ok_or(XrError::HandleInvalid)?;
        if !Arc::ptr_eq(&owner, self) {
            return Err(XrError::ValidationFailure("space belongs to another session"));
        }

        let head = &instance.system.head;
        let eye_relation =
            Pose::from_translation(Vec3::X * instance.config.default_ipd_meters);
        let (head_relation, eyes) = head.view_relations(eye_relation, display_time);

        // Head relation -> tracking origin -> (base anchor)^-1 -> (base
        // pose)^-1, leaving the head expressed in the base space.
        let head_in_stage = {
            let mut chain = RelationChain::new();
            chain
                .push_relation(head_relation)
                .push_pose_if_not_identity(head.tracking_origin_offset());
            chain.resolve()
        };
        self.maybe_adopt_initial_head(&head_in_stage);

        let mut chain = RelationChain::new();
        chain.push_relation(head_in_stage);
        match base.kind {
            SpaceKind::Reference(reference) => {
                let anchor = self.reference_in_stage(reference, display_time)?;
                crate::spaces::push_inverted_stage_relation(&mut chain, anchor);
            }
            SpaceKind::Action { action, subaction } => {
                match self.action_pose_relation(action, subaction, display_time) {
                    Some(relation) => {
                        chain.push_inverted_relation(relation);
                    }
                    None => {
                        return Ok((
                            ViewStateFlags::empty(),
                            [View {
                                pose: Pose::IDENTITY,
                                fov: eyes[0].fov,
                            }; 2],
                        ))
                    }
                }
            }
        }
        if !base.pose.is_identity() {
            chain.push_inverted_pose(base.pose);
        }
        let head_in_base = chain.resolve();

        let mut flags = ViewStateFlags::all();
        let mut views = [View {
            pose: Pose::IDENTITY,
            fov: Fov::default(),
        }; 2];
        for (view, eye) in views.iter_mut().zip(eyes.iter()) {
            let mut pose = head_in_base.pose.multiply(&eye.pose);
            let norm = pose.orientation.length();
            if (norm - 1.0).abs() > math::QUAT_NORM_TOLERANCE {
                return Err(XrError::RuntimeFailure("device produced invalid view quaternion"));
            }
            if norm != 1.0 {
                pose.orientation = pose.orientation.normalize();
            }
            view.pose = pose;
            view.fov = eye.fov;
            flags &= view_flags(head_in_base.flags);
        }
        Ok((flags, views))
    }
}

fn view_flags(flags: RelationFlags) -> ViewStateFlags {
    let mut out = ViewStateFlags::empty();
    if flags.contains(RelationFlags::ORIENTATION_VALID) {
        out |= ViewStateFlags::ORIENTATION_VALID;
    }
    if flags.contains(RelationFlags::POSITION_VALID) {
        out |= ViewStateFlags::POSITION_VALID;
    }
    if flags.contains(RelationFlags::ORIENTATION_TRACKED) {
        out |= ViewStateFlags::ORIENTATION_TRACKED;
    }
    if flags.contains(RelationFlags::POSITION_TRACKED) {
        out |= ViewStateFlags::POSITION_TRACKED;
    }
    out
}
