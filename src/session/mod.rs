//! Session objects: the lifecycle state machine lives here, frame pacing
//! in `frame`, layer validation and submission in `layers`.

mod frame;
mod layers;

pub use frame::{FrameBeginOutcome, FrameWaitState, View, ViewStateFlags};
pub use layers::{
    DepthInfo, FrameEndInfo, Layer, ProjectionView, SwapchainSubImage,
};

use crate::compositor::{
    CompositorBackend, SwapchainCreateInfo,
};
use crate::error::{XrError, XrResult};
use crate::events::Event;
use crate::handles::{Handle, HandleKey, HandleObject};
use crate::input::SessionInput;
use crate::instance::Instance;
use crate::math::{self, Pose, Relation, RelationFlags};
use crate::swapchain::Swapchain;
use crate::system::ViewConfigurationType;
use frame::FramePacer;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

/// How a session talks to graphics: not at all, or through a native
/// compositor from the instance's factory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GraphicsBinding {
    /// No compositor, no swapchains, synthesized frame timing. Gated on the
    /// headless extension.
    Headless,
    Native,
}

pub struct SessionCreateInfo {
    pub graphics: GraphicsBinding,
}

pub struct Session {
    pub(crate) instance: Weak<Instance>,
    pub(crate) handle: OnceLock<Handle<Session>>,
    pub(crate) compositor: Option<Arc<dyn CompositorBackend>>,
    state: Mutex<SessionState>,
    running: AtomicBool,
    exiting: AtomicBool,
    #[allow(dead_code)]
    has_begun: AtomicBool,
    has_ended_once: AtomicBool,
    compositor_visible: AtomicBool,
    compositor_focused: AtomicBool,
    pub(crate) frame: FramePacer,
    pub(crate) input: SessionInput,
    /// Anchor of Local-type spaces: the first valid head pose, yaw only.
    initial_head: RwLock<Option<Pose>>,
}

impl Session {
    pub(crate) fn create(
        instance: &Arc<Instance>,
        info: &SessionCreateInfo,
    ) -> XrResult<Handle<Session>> {
        let compositor = match info.graphics {
            GraphicsBinding::Headless => {
                if !instance.extensions.mnd_headless {
                    return Err(XrError::GraphicsDeviceInvalid);
                }
                None
            }
            GraphicsBinding::Native => Some(instance.create_native_compositor()?),
        };

        let session = Arc::new(Session {
            instance: Arc::downgrade(instance),
            handle: OnceLock::new(),
            compositor,
            state: Mutex::new(SessionState::Idle),
            running: AtomicBool::new(false),
            exiting: AtomicBool::new(false),
            has_begun: AtomicBool::new(false),
            has_ended_once: AtomicBool::new(false),
            compositor_visible: AtomicBool::new(false),
            compositor_focused: AtomicBool::new(false),
            frame: FramePacer::new(),
            input: SessionInput::default(),
            initial_head: RwLock::new(None),
        });

        let handle = instance.registry.register(instance.root_key(), session.clone())?;
        session.handle.set(handle).ok();
        instance
            .sessions
            .lock()
            .unwrap()
            .push(Arc::downgrade(&session));

        // Sessions are born Idle and immediately advance to Ready.
        info!("New session created");
        let mut state = session.state.lock().unwrap();
        session.push_state_event(instance, SessionState::Idle);
        session.transition_locked(&mut state, instance, SessionState::Ready);

        Ok(handle)
    }

    pub(crate) fn instance(&self) -> XrResult<Arc<Instance>> {
        self.instance.upgrade().ok_or(XrError::HandleInvalid)
    }

    pub(crate) fn key(&self) -> XrResult<HandleKey> {
        self.handle
            .get()
            .map(|h| h.key())
            .ok_or(XrError::RuntimeFailure("session not registered"))
    }

    #[inline]
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn initial_head_relation(&self) -> Option<Pose> {
        *self.initial_head.read().unwrap()
    }

    /// Adopts the first head relation with a valid orientation as the Local
    /// anchor, projected to yaw only.
    pub(crate) fn maybe_adopt_initial_head(&self, head: &Relation) {
        if !head.flags.contains(RelationFlags::ORIENTATION_VALID) {
            return;
        }
        let mut anchor = self.initial_head.write().unwrap();
        if anchor.is_none() {
            *anchor = Some(Pose {
                orientation: math::project_to_yaw(head.pose.orientation),
                position: head.pose.position,
            });
            debug!("Adopted initial head relation: {:?}", anchor.unwrap());
        }
    }

    /// Begins the session: only legal in Ready, and only once per
    /// Ready-to-Idle round trip.
    pub fn begin(&self, view_configuration: ViewConfigurationType) -> XrResult<()> {
        let instance = self.instance()?;
        if view_configuration != ViewConfigurationType::PrimaryStereo {
            return Err(XrError::ViewConfigurationUnsupported);
        }

        let mut state = self.state.lock().unwrap();
        if self.is_running() {
            return Err(XrError::SessionRunning);
        }
        if *state != SessionState::Ready {
            return Err(XrError::SessionNotReady);
        }
        if let Some(compositor) = &self.compositor {
            compositor.begin_session()?;
        }
        self.running.store(true, Ordering::Release);
        self.has_begun.store(true, Ordering::Release);
        info!("Session began");

        // Without a compositor there is nothing to drive visibility, so a
        // headless session goes straight to Focused.
        if self.compositor.is_none() {
            self.step_state_towards_locked(&mut state, &instance, SessionState::Focused);
        }
        Ok(())
    }

    /// Ends a stopping session, discarding any in-flight frames.
    pub fn end(&self) -> XrResult<()> {
        let instance = self.instance()?;
        // The state lock is not held across the pacing lock; frame paths
        // take them in the other order.
        if self.state() != SessionState::Stopping {
            return Err(XrError::SessionNotStopping);
        }

        self.frame.discard_in_flight(self.compositor.as_deref());
        if let Some(compositor) = &self.compositor {
            compositor.end_session();
        }
        self.running.store(false, Ordering::Release);
        self.has_ended_once.store(true, Ordering::Release);
        self.compositor_visible.store(false, Ordering::Release);
        self.compositor_focused.store(false, Ordering::Release);

        let mut state = self.state.lock().unwrap();
        if *state != SessionState::Stopping {
            return Err(XrError::SessionNotStopping);
        }
        self.transition_locked(&mut state, &instance, SessionState::Idle);
        if self.exiting.load(Ordering::Acquire) {
            self.transition_locked(&mut state, &instance, SessionState::Exiting);
        } else {
            // Eagerly re-arm, same as at creation.
            self.transition_locked(&mut state, &instance, SessionState::Ready);
        }
        Ok(())
    }

    /// Asks the session to wind down: the state walks down the ladder and
    /// parks in Stopping until the client calls `end`.
    pub fn request_exit(&self) -> XrResult<()> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        self.exiting.store(true, Ordering::Release);

        let mut state = self.state.lock().unwrap();
        while matches!(*state, SessionState::Focused | SessionState::Visible) {
            let next = match *state {
                SessionState::Focused => SessionState::Visible,
                _ => SessionState::Synchronized,
            };
            self.transition_locked(&mut state, &instance, next);
        }
        self.transition_locked(&mut state, &instance, SessionState::Stopping);
        Ok(())
    }

    pub fn create_swapchain(
        self: &Arc<Self>,
        info: &SwapchainCreateInfo,
    ) -> XrResult<Handle<Swapchain>> {
        let instance = self.instance()?;
        let compositor = self
            .compositor
            .as_ref()
            .ok_or(XrError::ValidationFailure("headless session has no swapchains"))?;

        let properties = instance.system.properties();
        if info.width == 0
            || info.height == 0
            || info.width > properties.max_swapchain_width
            || info.height > properties.max_swapchain_height
        {
            return Err(XrError::ValidationFailure("bad swapchain extent"));
        }
        if info.sample_count == 0 || info.array_size == 0 || info.mip_count == 0 {
            return Err(XrError::ValidationFailure("zero swapchain parameter"));
        }
        if info.face_count != 1 && info.face_count != 6 {
            return Err(XrError::ValidationFailure("face count must be 1 or 6"));
        }

        let backend = compositor.create_swapchain(info)?;
        if backend.image_count() == 0 {
            return Err(XrError::RuntimeFailure("backend swapchain has no images"));
        }
        let swapchain = Arc::new(Swapchain::new(Arc::downgrade(self), backend, *info));
        let handle = instance.registry.register(self.key()?, swapchain.clone())?;
        Ok(handle)
    }

    /// Re-anchors Local-type spaces at the current head pose and announces
    /// the pending change.
    pub fn reset_local_space(self: &Arc<Self>) -> XrResult<()> {
        let instance = self.instance()?;
        let head = self.head_in_stage(instance.now())?;
        if !head.flags.contains(RelationFlags::ORIENTATION_VALID) {
            return Err(XrError::PoseInvalid);
        }

        let new_anchor = Pose {
            orientation: math::project_to_yaw(head.pose.orientation),
            position: head.pose.position,
        };
        let previous = {
            let mut anchor = self.initial_head.write().unwrap();
            anchor.replace(new_anchor)
        };

        let pose_in_previous = previous
            .map(|p| p.invert().multiply(&new_anchor))
            .unwrap_or(Pose::IDENTITY);
        if let Some(&handle) = self.handle.get() {
            instance.events.push(Event::ReferenceSpaceChangePending {
                session: handle,
                reference: crate::spaces::ReferenceSpaceType::Local,
                pose_valid: previous.is_some(),
                pose_in_previous_space: pose_in_previous,
            });
        }
        Ok(())
    }

    /// Folds a compositor visibility report into the state ladder.
    pub(crate) fn apply_compositor_state(&self, visible: bool, focused: bool) {
        self.compositor_visible.store(visible, Ordering::Release);
        self.compositor_focused.store(focused, Ordering::Release);

        if !self.is_running() || self.exiting.load(Ordering::Acquire) {
            return;
        }
        let Ok(instance) = self.instance() else {
            return;
        };

        let target = if visible && focused {
            SessionState::Focused
        } else if visible {
            SessionState::Visible
        } else {
            SessionState::Synchronized
        };
        let mut state = self.state.lock().unwrap();
        self.step_state_towards_locked(&mut state, &instance, target);
    }

    /// Drains compositor events. Called from the instance's poll loop.
    pub(crate) fn pump_compositor_events(&self) {
        let Some(compositor) = &self.compositor else {
            return;
        };
        let Ok(instance) = self.instance() else {
            return;
        };
        while let Some(event) = compositor.poll_event() {
            match event {
                crate::compositor::CompositorEvent::StateChange { visible, focused } => {
                    debug!("Compositor state change: visible={visible} focused={focused}");
                    self.apply_compositor_state(visible, focused);
                }
                crate::compositor::CompositorEvent::OverlayChange { visible } => {
                    instance
                        .events
                        .push(Event::MainSessionVisibilityChanged { visible });
                }
            }
        }
    }

    /// Walks the Ready..Focused ladder one state at a time, emitting an
    /// event per hop.
    fn step_state_towards_locked(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        instance: &Arc<Instance>,
        target: SessionState,
    ) {
        fn rank(state: SessionState) -> Option<u8> {
            match state {
                SessionState::Ready => Some(0),
                SessionState::Synchronized => Some(1),
                SessionState::Visible => Some(2),
                SessionState::Focused => Some(3),
                _ => None,
            }
        }
        fn at(rank: u8) -> SessionState {
            match rank {
                0 => SessionState::Ready,
                1 => SessionState::Synchronized,
                2 => SessionState::Visible,
                _ => SessionState::Focused,
            }
        }

        let (Some(mut current), Some(target)) = (rank(**state), rank(target)) else {
            return;
        };
        // The ladder never descends below Synchronized while running.
        let target = target.max(1);
        while current != target {
            current = if current < target {
                current + 1
            } else {
                current - 1
            };
            self.transition_locked(state, instance, at(current));
        }
    }

    fn transition_locked(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        instance: &Arc<Instance>,
        new_state: SessionState,
    ) {
        **state = new_state;
        info!("Session state changed: {new_state:?}");
        self.push_state_event(instance, new_state);
    }

    pub(crate) fn push_state_event(&self, instance: &Arc<Instance>, state: SessionState) {
        if let Some(&handle) = self.handle.get() {
            instance.events.push(Event::SessionStateChanged {
                session: handle,
                state,
                time: instance.now(),
            });
        }
    }

    /// Marks the session lost. Nothing recovers from this.
    pub(crate) fn mark_loss_pending(&self) {
        let Ok(instance) = self.instance() else {
            return;
        };
        let mut state = self.state.lock().unwrap();
        if *state != SessionState::LossPending {
            self.transition_locked(&mut state, &instance, SessionState::LossPending);
        }
    }
}

impl HandleObject for Session {
    fn on_destroy(&self) {
        if self.is_running() {
            if let Some(compositor) = &self.compositor {
                compositor.end_session();
            }
            self.running.store(false, Ordering::Release);
        }
        if let Some(instance) = self.instance.upgrade() {
            instance
                .sessions
                .lock()
                .unwrap()
                .retain(|weak| weak.upgrade().is_some_and(|s| !std::ptr::eq(&*s, self)));
        }
    }
}
