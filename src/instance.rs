//! The instance: root of the handle tree and the entry-point surface the
//! ABI layer dispatches into. Every public method validates its handles
//! through the registry before touching anything.

use crate::compositor::{
    CompositorBackend, CompositorCreateInfo, CompositorFactory, EnvironmentBlendMode,
    SwapchainCreateInfo,
};
use crate::config::RuntimeConfig;
use crate::device::{DeviceProber, HapticEvent, ViewConfigurationView};
use crate::error::{XrError, XrResult};
use crate::events::{Event, EventQueue};
use crate::handles::{Handle, HandleKey, HandleKind, HandleObject, Registered, Registry};
use crate::input::{
    Action, ActionKey, ActionSet, ActionSetKey, ActionStateBool, ActionStateFloat,
    ActionStatePose, ActionStateVector2, ActiveActionSet, SubactionPath, SyncResult,
};
use crate::math::{Pose, XrDuration, XrTime};
use crate::paths::{PathId, PathStore};
use crate::session::{
    FrameBeginOutcome, FrameEndInfo, FrameWaitState, Session, SessionCreateInfo, View,
    ViewStateFlags,
};
use crate::spaces::{ReferenceSpaceType, Space, SpaceLocation};
use crate::swapchain::Swapchain;
use crate::system::{
    FormFactor, System, SystemProperties, ViewConfigurationProperties, ViewConfigurationType,
};
use crate::util::fill_buffer;
use bitflags::bitflags;
use log::{debug, info};
use slotmap::SlotMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

pub const MAX_DEBUG_MESSENGERS: usize = 16;

/// Extensions the runtime knows how to enable.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionSet {
    pub mnd_headless: bool,
    pub ext_debug_utils: bool,
    pub ext_hand_tracking: bool,
    pub khr_composition_layer_cube: bool,
    pub khr_composition_layer_cylinder: bool,
    pub khr_composition_layer_equirect: bool,
    pub khr_composition_layer_equirect2: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ApplicationInfo {
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
}

#[derive(Clone, Debug, Default)]
pub struct InstanceCreateInfo {
    pub application_info: ApplicationInfo,
    pub enabled_extensions: ExtensionSet,
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct DebugSeverityFlags: u32 {
        const VERBOSE = 1 << 0;
        const INFO = 1 << 1;
        const WARNING = 1 << 2;
        const ERROR = 1 << 3;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct DebugTypeFlags: u32 {
        const GENERAL = 1 << 0;
        const VALIDATION = 1 << 1;
        const PERFORMANCE = 1 << 2;
    }
}

pub struct DebugMessage<'a> {
    pub severity: DebugSeverityFlags,
    pub ty: DebugTypeFlags,
    pub message: &'a str,
    pub function_name: Option<&'a str>,
}

type DebugCallback = Box<dyn Fn(&DebugMessage<'_>) + Send + Sync>;

pub struct DebugMessenger {
    instance: Weak<Instance>,
    severities: DebugSeverityFlags,
    types: DebugTypeFlags,
    callback: DebugCallback,
}

impl HandleObject for DebugMessenger {
    fn on_destroy(&self) {
        // The messenger detaches itself from the instance's list.
        if let Some(instance) = self.instance.upgrade() {
            instance
                .messengers
                .lock()
                .unwrap()
                .retain(|weak| weak.upgrade().is_some_and(|m| !std::ptr::eq(&*m, self)));
        }
    }
}

/// Paths every instance interns eagerly: the user paths and all shipped
/// profile paths.
pub(crate) struct WellKnownPaths {
    pub user: PathId,
    pub head: PathId,
    pub left_hand: PathId,
    pub right_hand: PathId,
    pub gamepad: PathId,
}

impl WellKnownPaths {
    fn intern(paths: &PathStore) -> XrResult<Self> {
        for profile in crate::input::profiles::Profiles::get().iter() {
            paths.get_or_create(profile.profile_path())?;
        }
        Ok(Self {
            user: paths.get_or_create(SubactionPath::User.path_str())?,
            head: paths.get_or_create(SubactionPath::Head.path_str())?,
            left_hand: paths.get_or_create(SubactionPath::LeftHand.path_str())?,
            right_hand: paths.get_or_create(SubactionPath::RightHand.path_str())?,
            gamepad: paths.get_or_create(SubactionPath::Gamepad.path_str())?,
        })
    }

    pub fn subaction_from_path(&self, path: PathId) -> Option<SubactionPath> {
        if path == self.user {
            Some(SubactionPath::User)
        } else if path == self.head {
            Some(SubactionPath::Head)
        } else if path == self.left_hand {
            Some(SubactionPath::LeftHand)
        } else if path == self.right_hand {
            Some(SubactionPath::RightHand)
        } else if path == self.gamepad {
            Some(SubactionPath::Gamepad)
        } else {
            None
        }
    }
}

pub struct Instance {
    pub(crate) registry: Registry,
    pub(crate) paths: PathStore,
    pub(crate) events: EventQueue,
    pub(crate) extensions: ExtensionSet,
    pub(crate) system: System,
    pub(crate) config: RuntimeConfig,
    pub(crate) well_known: WellKnownPaths,
    pub(crate) sessions: Mutex<Vec<Weak<Session>>>,
    pub(crate) messengers: Mutex<Vec<Weak<DebugMessenger>>>,
    pub(crate) actions: RwLock<SlotMap<ActionKey, Weak<Action>>>,
    pub(crate) action_sets: RwLock<SlotMap<ActionSetKey, Weak<ActionSet>>>,
    pub(crate) set_names: Mutex<HashSet<String>>,
    compositor_factory: Arc<dyn CompositorFactory>,
    application_info: ApplicationInfo,
    root: OnceLock<HandleKey>,
    destroyed: AtomicBool,
}

impl Instance {
    /// Brings up the whole runtime core: captures the process-wide config,
    /// probes devices into a system, and interns the well-known paths.
    pub fn create(
        info: &InstanceCreateInfo,
        prober: &dyn DeviceProber,
        compositor_factory: Arc<dyn CompositorFactory>,
    ) -> XrResult<Arc<Instance>> {
        crate::init_logging();
        if info.application_info.application_name.is_empty() {
            return Err(XrError::ValidationFailure("empty application name"));
        }

        let config = RuntimeConfig::from_env();
        let system = System::from_prober(prober)?;
        let paths = PathStore::new();
        let well_known = WellKnownPaths::intern(&paths)?;

        let instance = Arc::new(Instance {
            registry: Registry::new(),
            paths,
            events: EventQueue::new(),
            extensions: info.enabled_extensions,
            system,
            config,
            well_known,
            sessions: Mutex::new(Vec::new()),
            messengers: Mutex::new(Vec::new()),
            actions: RwLock::new(SlotMap::with_key()),
            action_sets: RwLock::new(SlotMap::with_key()),
            set_names: Mutex::new(HashSet::new()),
            compositor_factory,
            application_info: info.application_info.clone(),
            root: OnceLock::new(),
            destroyed: AtomicBool::new(false),
        });
        let root = instance.registry.register_root(&instance);
        instance.root.set(root).ok();

        info!(
            "Instance created for {:?} (config {config:?})",
            instance.application_info.application_name
        );
        Ok(instance)
    }

    /// Tears the whole tree down: sessions first, then action sets, then
    /// messengers, then paths. The system devices drop with the instance.
    pub fn destroy(self: &Arc<Self>) -> XrResult<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(XrError::HandleInvalid);
        }

        let children = self.registry.children_of(self.root_key());
        for kind in [
            HandleKind::Session,
            HandleKind::ActionSet,
            HandleKind::DebugMessenger,
        ] {
            for &(key, child_kind) in &children {
                if child_kind == kind {
                    self.registry.destroy(key)?;
                }
            }
        }
        self.registry.destroy(self.root_key())?;
        self.paths.destroy_all();
        info!("Instance destroyed");
        Ok(())
    }

    pub(crate) fn root_key(&self) -> HandleKey {
        *self.root.get().expect("instance is always registered")
    }

    /// Current runtime time. Positive and strictly monotonic.
    pub fn now(&self) -> XrTime {
        crate::monotonic_time_ns()
    }

    /// Converts a compositor timestamp into runtime time. The two share the
    /// monotonic clock domain, so this validates more than it computes.
    pub(crate) fn xr_time_from_monotonic_ns(&self, ns: i64) -> XrTime {
        debug_assert!(ns > 0);
        ns
    }

    pub(crate) fn create_native_compositor(&self) -> XrResult<Arc<dyn CompositorBackend>> {
        self.compositor_factory
            .create_native_compositor(&CompositorCreateInfo {
                force_timeline_semaphores: self.config.force_timeline_semaphores,
            })
    }

    // ---- Events ----

    /// Drives compositor event polling for every live session, then hands
    /// out at most one queued event.
    pub fn poll_event(&self) -> Option<Event> {
        let sessions: Vec<_> = self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for session in sessions {
            session.pump_compositor_events();
        }
        self.events.poll(&self.registry)
    }

    // ---- Paths ----

    pub fn string_to_path(&self, string: &str) -> XrResult<PathId> {
        self.paths.get_or_create(string)
    }

    /// Two-call: the path string without its NUL terminator.
    pub fn path_to_string(&self, path: PathId, out: Option<&mut [u8]>) -> XrResult<usize> {
        let string = self.paths.string(path)?;
        fill_buffer(string.to_bytes(), out)
    }

    // ---- System ----

    pub fn get_system(&self, form_factor: FormFactor) -> XrResult<SystemProperties> {
        if form_factor != FormFactor::HeadMountedDisplay {
            return Err(XrError::FormFactorUnsupported);
        }
        let mut properties = self.system.properties();
        // Hand tracking is only advertised when the extension is on.
        properties.hand_tracking &= self.extensions.ext_hand_tracking;
        Ok(properties)
    }

    pub fn enumerate_view_configurations(
        &self,
        out: Option<&mut [ViewConfigurationType]>,
    ) -> XrResult<usize> {
        fill_buffer(&[ViewConfigurationType::PrimaryStereo], out)
    }

    pub fn view_configuration_properties(
        &self,
        view_configuration: ViewConfigurationType,
    ) -> XrResult<ViewConfigurationProperties> {
        if view_configuration != ViewConfigurationType::PrimaryStereo {
            return Err(XrError::ViewConfigurationUnsupported);
        }
        Ok(ViewConfigurationProperties {
            view_configuration,
            fov_mutable: false,
        })
    }

    pub fn enumerate_view_configuration_views(
        &self,
        view_configuration: ViewConfigurationType,
        out: Option<&mut [ViewConfigurationView]>,
    ) -> XrResult<usize> {
        if view_configuration != ViewConfigurationType::PrimaryStereo {
            return Err(XrError::ViewConfigurationUnsupported);
        }
        fill_buffer(self.system.views(), out)
    }

    pub fn enumerate_environment_blend_modes(
        &self,
        view_configuration: ViewConfigurationType,
        out: Option<&mut [EnvironmentBlendMode]>,
    ) -> XrResult<usize> {
        if view_configuration != ViewConfigurationType::PrimaryStereo {
            return Err(XrError::ViewConfigurationUnsupported);
        }
        fill_buffer(self.system.blend_modes(), out)
    }

    // ---- Destruction ----

    fn destroy_child<T: Registered>(&self, handle: Handle<T>) -> XrResult<()> {
        // Resolve first so a wrong-kind or stale handle reports invalid.
        self.registry.get(handle)?;
        self.registry.destroy(handle.key())
    }

    /// Each destroy is recursive: children go down with their parent.
    pub fn destroy_session(&self, session: Handle<Session>) -> XrResult<()> {
        self.destroy_child(session)
    }

    pub fn destroy_action_set(&self, set: Handle<ActionSet>) -> XrResult<()> {
        self.destroy_child(set)
    }

    pub fn destroy_action(&self, action: Handle<Action>) -> XrResult<()> {
        self.destroy_child(action)
    }

    pub fn destroy_space(&self, space: Handle<Space>) -> XrResult<()> {
        self.destroy_child(space)
    }

    pub fn destroy_swapchain(&self, swapchain: Handle<Swapchain>) -> XrResult<()> {
        self.destroy_child(swapchain)
    }

    pub fn destroy_debug_messenger(&self, messenger: Handle<DebugMessenger>) -> XrResult<()> {
        self.destroy_child(messenger)
    }

    // ---- Sessions ----

    pub fn create_session(
        self: &Arc<Self>,
        info: &SessionCreateInfo,
    ) -> XrResult<Handle<Session>> {
        Session::create(self, info)
    }

    pub fn begin_session(
        &self,
        session: Handle<Session>,
        view_configuration: ViewConfigurationType,
    ) -> XrResult<()> {
        self.registry.get(session)?.begin(view_configuration)
    }

    pub fn end_session(&self, session: Handle<Session>) -> XrResult<()> {
        self.registry.get(session)?.end()
    }

    pub fn request_exit_session(&self, session: Handle<Session>) -> XrResult<()> {
        self.registry.get(session)?.request_exit()
    }

    pub fn wait_frame(&self, session: Handle<Session>) -> XrResult<FrameWaitState> {
        self.registry.get(session)?.wait_frame()
    }

    pub fn begin_frame(&self, session: Handle<Session>) -> XrResult<FrameBeginOutcome> {
        self.registry.get(session)?.begin_frame()
    }

    pub fn end_frame(&self, session: Handle<Session>, info: &FrameEndInfo<'_>) -> XrResult<()> {
        self.registry.get(session)?.end_frame(info)
    }

    pub fn locate_views(
        &self,
        session: Handle<Session>,
        view_configuration: ViewConfigurationType,
        display_time: XrTime,
        base: Handle<Space>,
    ) -> XrResult<(ViewStateFlags, [View; 2])> {
        self.registry
            .get(session)?
            .locate_views(view_configuration, display_time, base)
    }

    pub fn reset_local_space(&self, session: Handle<Session>) -> XrResult<()> {
        self.registry.get(session)?.reset_local_space()
    }

    // ---- Spaces ----

    pub fn create_reference_space(
        &self,
        session: Handle<Session>,
        reference: ReferenceSpaceType,
        pose: Pose,
    ) -> XrResult<Handle<Space>> {
        self.registry
            .get(session)?
            .create_reference_space(reference, pose)
    }

    pub fn create_action_space(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
        pose: Pose,
    ) -> XrResult<Handle<Space>> {
        self.registry
            .get(session)?
            .create_action_space(action, subaction, pose)
    }

    pub fn enumerate_reference_spaces(
        &self,
        session: Handle<Session>,
        out: Option<&mut [ReferenceSpaceType]>,
    ) -> XrResult<usize> {
        self.registry.get(session)?.enumerate_reference_spaces(out)
    }

    pub fn locate_space(
        &self,
        space: Handle<Space>,
        base: Handle<Space>,
        time: XrTime,
    ) -> XrResult<SpaceLocation> {
        let session = self
            .registry
            .get(space)?
            .session
            .upgrade()
            .ok_or(XrError::HandleInvalid)?;
        session.locate_space(space, base, time)
    }

    // ---- Swapchains ----

    pub fn create_swapchain(
        &self,
        session: Handle<Session>,
        info: &SwapchainCreateInfo,
    ) -> XrResult<Handle<Swapchain>> {
        self.registry.get(session)?.create_swapchain(info)
    }

    /// Two-call: backend image indices, in array order.
    pub fn enumerate_swapchain_images(
        &self,
        swapchain: Handle<Swapchain>,
        out: Option<&mut [u32]>,
    ) -> XrResult<usize> {
        let swapchain = self.registry.get(swapchain)?;
        let indices: Vec<u32> = (0..swapchain.image_count() as u32).collect();
        fill_buffer(&indices, out)
    }

    pub fn acquire_swapchain_image(&self, swapchain: Handle<Swapchain>) -> XrResult<u32> {
        self.registry.get(swapchain)?.acquire_image()
    }

    pub fn wait_swapchain_image(
        &self,
        swapchain: Handle<Swapchain>,
        timeout: XrDuration,
    ) -> XrResult<()> {
        self.registry.get(swapchain)?.wait_image(timeout)
    }

    pub fn release_swapchain_image(&self, swapchain: Handle<Swapchain>) -> XrResult<()> {
        self.registry.get(swapchain)?.release_image()
    }

    // ---- Input ----

    pub fn attach_session_action_sets(
        &self,
        session: Handle<Session>,
        sets: &[Handle<ActionSet>],
    ) -> XrResult<()> {
        self.registry.get(session)?.attach_action_sets(sets)
    }

    pub fn sync_actions(
        &self,
        session: Handle<Session>,
        active: &[ActiveActionSet],
    ) -> XrResult<SyncResult> {
        self.registry.get(session)?.sync_actions(active)
    }

    pub fn action_state_bool(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateBool> {
        self.registry.get(session)?.action_state_bool(action, subaction)
    }

    pub fn action_state_float(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateFloat> {
        self.registry
            .get(session)?
            .action_state_float(action, subaction)
    }

    pub fn action_state_vector2(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateVector2> {
        self.registry
            .get(session)?
            .action_state_vector2(action, subaction)
    }

    pub fn action_state_pose(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStatePose> {
        self.registry.get(session)?.action_state_pose(action, subaction)
    }

    pub fn apply_haptic_feedback(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
        event: &HapticEvent,
    ) -> XrResult<()> {
        self.registry
            .get(session)?
            .apply_haptic_feedback(action, subaction, event)
    }

    pub fn stop_haptic_feedback(
        &self,
        session: Handle<Session>,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<()> {
        self.registry
            .get(session)?
            .stop_haptic_feedback(action, subaction)
    }

    pub fn current_interaction_profile(
        &self,
        session: Handle<Session>,
        top_level: PathId,
    ) -> XrResult<PathId> {
        self.registry
            .get(session)?
            .current_interaction_profile(top_level)
    }

    // ---- Debug messengers ----

    pub fn create_debug_messenger(
        self: &Arc<Self>,
        severities: DebugSeverityFlags,
        types: DebugTypeFlags,
        callback: impl Fn(&DebugMessage<'_>) + Send + Sync + 'static,
    ) -> XrResult<Handle<DebugMessenger>> {
        if !self.extensions.ext_debug_utils {
            return Err(XrError::ValidationFailure("debug utils extension not enabled"));
        }
        let mut messengers = self.messengers.lock().unwrap();
        messengers.retain(|weak| weak.upgrade().is_some());
        if messengers.len() >= MAX_DEBUG_MESSENGERS {
            return Err(XrError::LimitReached);
        }

        let messenger = Arc::new(DebugMessenger {
            instance: Arc::downgrade(self),
            severities,
            types,
            callback: Box::new(callback),
        });
        let handle = self.registry.register(self.root_key(), messenger.clone())?;
        messengers.push(Arc::downgrade(&messenger));
        debug!("Debug messenger created ({severities:?}, {types:?})");
        Ok(handle)
    }

    /// Fans a message out to every messenger whose filters match.
    pub fn submit_debug_message(&self, message: &DebugMessage<'_>) -> XrResult<()> {
        if !self.extensions.ext_debug_utils {
            return Err(XrError::ValidationFailure("debug utils extension not enabled"));
        }
        let messengers: Vec<_> = self
            .messengers
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for messenger in messengers {
            if messenger.severities.intersects(message.severity)
                && messenger.types.intersects(message.ty)
            {
                (messenger.callback)(message);
            }
        }
        Ok(())
    }

    pub fn application_name(&self) -> &str {
        &self.application_info.application_name
    }
}

impl HandleObject for Instance {}
