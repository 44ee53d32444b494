//! Actions, action sets, and the binding engine.
//!
//! The engine runs in two phases. Suggest: the client names a profile and
//! (action, path) pairs, which land as key entries on the profile's binding
//! rows. Attach: a session freezes its action sets, the engine picks a
//! profile per user path for the connected device, and every action gets a
//! source cache of concrete (device, input) pairs. After that, `sync`
//! samples the caches and state queries read them without touching devices.

pub mod profiles;

use crate::device::{Device, HapticEvent, InputValue};
use crate::error::{XrError, XrResult};
use crate::handles::{Handle, HandleObject};
use crate::instance::Instance;
use crate::math::{Relation, XrTime};
use crate::paths::{PathId, PathStore};
use crate::relation_chain::RelationChain;
use crate::session::{Session, SessionState};
use crossbeam_utils::atomic::AtomicCell;
use glam::Vec2;
use log::{debug, info, warn};
use profiles::InteractionProfile;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

slotmap::new_key_type! {
    pub struct ActionKey;
    pub struct ActionSetKey;
}

pub const MAX_ACTION_NAME_LENGTH: usize = 64;

/// A haptic event with a non-positive duration vibrates for this long.
const MIN_HAPTIC_DURATION_NS: i64 = 2_000_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActionType {
    Boolean,
    Float,
    Vector2,
    Pose,
    Haptic,
}

/// The fixed set of top-level user paths an action can be disambiguated by.
/// `User` is the unfiltered selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SubactionPath {
    User,
    Head,
    LeftHand,
    RightHand,
    Gamepad,
}

impl SubactionPath {
    pub const ALL: [Self; 5] = [
        Self::User,
        Self::Head,
        Self::LeftHand,
        Self::RightHand,
        Self::Gamepad,
    ];

    /// The user paths devices can be assigned to.
    pub(crate) const DEVICE_PATHS: [Self; 4] =
        [Self::Head, Self::LeftHand, Self::RightHand, Self::Gamepad];

    pub fn path_str(&self) -> &'static str {
        match self {
            Self::User => "/user",
            Self::Head => "/user/head",
            Self::LeftHand => "/user/hand/left",
            Self::RightHand => "/user/hand/right",
            Self::Gamepad => "/user/gamepad",
        }
    }

    pub(crate) fn device_role(&self) -> Option<crate::device::DeviceRole> {
        use crate::device::DeviceRole;
        match self {
            Self::User => None,
            Self::Head => Some(DeviceRole::Head),
            Self::LeftHand => Some(DeviceRole::LeftHand),
            Self::RightHand => Some(DeviceRole::RightHand),
            Self::Gamepad => Some(DeviceRole::Gamepad),
        }
    }
}

pub struct ActionSetCreateInfo<'a> {
    pub name: &'a str,
    pub localized_name: &'a str,
    pub priority: u32,
}

pub struct ActionCreateInfo<'a> {
    pub name: &'a str,
    pub localized_name: &'a str,
    pub ty: ActionType,
    pub subaction_paths: &'a [PathId],
}

pub struct ActionSet {
    pub(crate) instance: Weak<Instance>,
    pub(crate) key: ActionSetKey,
    pub(crate) name: String,
    #[allow(dead_code)]
    pub(crate) localized_name: String,
    pub(crate) priority: u32,
    pub(crate) actions: RwLock<Vec<Arc<Action>>>,
    /// Set once any session attaches this set; the set is immutable after.
    attached: AtomicBool,
    /// Bumped whenever a suggest call touches one of this set's actions;
    /// sessions rebind on sync when they see it move.
    generation: AtomicU64,
}

impl ActionSet {
    #[inline]
    pub(crate) fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn mark_attached(&self) {
        self.attached.store(true, Ordering::Release);
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl HandleObject for ActionSet {
    fn on_destroy(&self) {
        if let Some(instance) = self.instance.upgrade() {
            instance.action_sets.write().unwrap().remove(self.key);
            instance.set_names.lock().unwrap().remove(&self.name);
        }
    }
}

pub struct Action {
    pub(crate) set: Weak<ActionSet>,
    pub(crate) key: ActionKey,
    pub(crate) name: String,
    #[allow(dead_code)]
    pub(crate) localized_name: String,
    pub(crate) ty: ActionType,
    /// Declared sub-action filter; empty means only the unfiltered selector
    /// may be queried.
    pub(crate) subactions: Vec<SubactionPath>,
}

impl HandleObject for Action {
    fn on_destroy(&self) {
        if let Some(set) = self.set.upgrade() {
            set.actions.write().unwrap().retain(|a| a.key != self.key);
            if let Some(instance) = set.instance.upgrade() {
                instance.actions.write().unwrap().remove(self.key);
            }
        }
    }
}

/// Per-instance instantiation of a shipped profile template, hung off the
/// profile's canonical path.
pub(crate) struct Profile {
    pub path: PathId,
    pub path_str: &'static str,
    pub bindings: Vec<Binding>,
}

/// One profile row with its suggested-action entries.
pub(crate) struct Binding {
    pub subaction: SubactionPath,
    /// Interned absolute paths this row answers to.
    pub paths: Vec<PathId>,
    pub inputs: Vec<&'static str>,
    pub outputs: Vec<&'static str>,
    /// (action key, index of the matched path), in suggestion order.
    pub keys: Mutex<Vec<(ActionKey, usize)>>,
}

impl Profile {
    fn instantiate(template: &dyn InteractionProfile, paths: &PathStore) -> XrResult<Self> {
        let path = paths.get_or_create(template.profile_path())?;
        let bindings = template
            .rows()
            .into_iter()
            .map(|row| {
                let paths = row
                    .sub_paths
                    .iter()
                    .map(|sub| {
                        paths.get_or_create(&format!("{}/{sub}", row.subaction.path_str()))
                    })
                    .collect::<XrResult<Vec<_>>>()?;
                Ok(Binding {
                    subaction: row.subaction,
                    paths,
                    inputs: row.inputs,
                    outputs: row.outputs,
                    keys: Mutex::new(Vec::new()),
                })
            })
            .collect::<XrResult<Vec<_>>>()?;
        Ok(Self {
            path,
            path_str: template.profile_path(),
            bindings,
        })
    }

    fn binding_references_action(&self, subaction: SubactionPath, key: ActionKey) -> bool {
        self.bindings.iter().any(|b| {
            b.subaction == subaction && b.keys.lock().unwrap().iter().any(|(k, _)| *k == key)
        })
    }
}

/// The value half of a sampled action state.
#[derive(Copy, Clone, Debug, PartialEq)]
pub(crate) enum ActionValue {
    Bool(bool),
    Float(f32),
    Vec2(Vec2),
    Pose,
    Haptic,
}

impl ActionValue {
    fn default_for(ty: ActionType) -> Self {
        match ty {
            ActionType::Boolean => Self::Bool(false),
            ActionType::Float => Self::Float(0.0),
            ActionType::Vector2 => Self::Vec2(Vec2::ZERO),
            ActionType::Pose => Self::Pose,
            ActionType::Haptic => Self::Haptic,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct SampledState {
    pub active: bool,
    pub changed: bool,
    pub timestamp: XrTime,
    pub value: ActionValue,
}

impl SampledState {
    fn inactive(ty: ActionType) -> Self {
        Self {
            active: false,
            changed: false,
            timestamp: 0,
            value: ActionValue::default_for(ty),
        }
    }
}

/// Resolved sources and the latest sample for one action on one sub-action
/// path.
pub(crate) struct SourceCache {
    sources: RwLock<Vec<(Arc<dyn Device>, &'static str)>>,
    haptics: RwLock<Vec<(Arc<dyn Device>, &'static str)>>,
    state: AtomicCell<SampledState>,
    haptic_stop_deadline: AtomicI64,
}

impl SourceCache {
    fn new(ty: ActionType) -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            haptics: RwLock::new(Vec::new()),
            state: AtomicCell::new(SampledState::inactive(ty)),
            haptic_stop_deadline: AtomicI64::new(0),
        }
    }
}

pub(crate) struct ActionAttachment {
    pub action: Arc<Action>,
    /// One cache per declared sub-action path, plus the unfiltered one.
    pub caches: HashMap<SubactionPath, SourceCache>,
}

pub(crate) struct AttachedSet {
    pub set: Arc<ActionSet>,
    generation_seen: AtomicU64,
}

/// A session's frozen attachment: built once, torn down with the session.
pub(crate) struct Attached {
    pub sets: Vec<AttachedSet>,
    pub actions: HashMap<ActionKey, ActionAttachment>,
    pub by_set: HashMap<ActionSetKey, Vec<ActionKey>>,
}

#[derive(Default)]
pub(crate) struct SessionInput {
    pub attached: OnceLock<Attached>,
    /// Currently bound profile per top-level user path.
    pub bound_profiles: Mutex<HashMap<SubactionPath, PathId>>,
}

pub struct SuggestedBinding {
    pub action: Handle<Action>,
    pub binding: PathId,
}

#[derive(Copy, Clone)]
pub struct ActiveActionSet {
    pub set: Handle<ActionSet>,
    /// Restricts the sync to one sub-action path; `User` syncs everything.
    pub subaction: SubactionPath,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyncResult {
    Focused,
    /// The session isn't focused: every action went inactive.
    NotFocused,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ActionStateBool {
    pub current_state: bool,
    pub changed_since_last_sync: bool,
    pub last_change_time: XrTime,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ActionStateFloat {
    pub current_state: f32,
    pub changed_since_last_sync: bool,
    pub last_change_time: XrTime,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ActionStateVector2 {
    pub current_state: Vec2,
    pub changed_since_last_sync: bool,
    pub last_change_time: XrTime,
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ActionStatePose {
    pub is_active: bool,
}

/// Lowercase alphanumerics plus `-_.`; the same rule the path store applies
/// to components.
fn validate_name(name: &str) -> XrResult<()> {
    if name.is_empty() || name.len() >= MAX_ACTION_NAME_LENGTH {
        return Err(XrError::NameInvalid);
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
    {
        return Err(XrError::NameInvalid);
    }
    Ok(())
}

impl Instance {
    pub fn create_action_set(
        self: &Arc<Self>,
        info: &ActionSetCreateInfo,
    ) -> XrResult<Handle<ActionSet>> {
        validate_name(info.name)?;
        if info.localized_name.is_empty() {
            return Err(XrError::ValidationFailure("empty localized name"));
        }

        {
            let mut names = self.set_names.lock().unwrap();
            if !names.insert(info.name.to_owned()) {
                return Err(XrError::NameDuplicated);
            }
        }

        let key = self.action_sets.write().unwrap().insert(Weak::new());
        let set = Arc::new(ActionSet {
            instance: Arc::downgrade(self),
            key,
            name: info.name.to_owned(),
            localized_name: info.localized_name.to_owned(),
            priority: info.priority,
            actions: RwLock::new(Vec::new()),
            attached: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        });
        self.action_sets.write().unwrap()[key] = Arc::downgrade(&set);

        let handle = match self.registry.register(self.root_key(), set.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.action_sets.write().unwrap().remove(key);
                self.set_names.lock().unwrap().remove(&set.name);
                return Err(e);
            }
        };
        debug!("Created action set {:?} (priority {})", set.name, set.priority);
        Ok(handle)
    }

    pub fn create_action(
        self: &Arc<Self>,
        set_handle: Handle<ActionSet>,
        info: &ActionCreateInfo,
    ) -> XrResult<Handle<Action>> {
        let set = self.registry.get(set_handle)?;
        if set.is_attached() {
            return Err(XrError::ActionsetsAlreadyAttached);
        }
        validate_name(info.name)?;
        if info.localized_name.is_empty() {
            return Err(XrError::ValidationFailure("empty localized name"));
        }
        if set
            .actions
            .read()
            .unwrap()
            .iter()
            .any(|a| a.name == info.name)
        {
            return Err(XrError::NameDuplicated);
        }

        let mut subactions = Vec::with_capacity(info.subaction_paths.len());
        for &path in info.subaction_paths {
            let sub = self
                .well_known
                .subaction_from_path(path)
                .ok_or(XrError::PathUnsupported)?;
            if !subactions.contains(&sub) {
                subactions.push(sub);
            }
        }

        let key = self.actions.write().unwrap().insert(Weak::new());
        let action = Arc::new(Action {
            set: Arc::downgrade(&set),
            key,
            name: info.name.to_owned(),
            localized_name: info.localized_name.to_owned(),
            ty: info.ty,
            subactions,
        });
        self.actions.write().unwrap()[key] = Arc::downgrade(&action);

        let handle = match self.registry.register(set_handle.key(), action.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                self.actions.write().unwrap().remove(key);
                return Err(e);
            }
        };
        set.actions.write().unwrap().push(action);
        Ok(handle)
    }

    /// Phase one of the binding engine: stamp (action, path-index) entries
    /// onto the named profile's binding rows. Entries keep suggestion
    /// order. Sessions that already attached pick the change up on their
    /// next sync.
    pub fn suggest_interaction_profile_bindings(
        &self,
        profile_path: PathId,
        suggested: &[SuggestedBinding],
    ) -> XrResult<()> {
        if suggested.is_empty() {
            return Err(XrError::ValidationFailure("no suggested bindings"));
        }
        let profile = self
            .profile_for_path(profile_path)
            .ok_or(XrError::PathUnsupported)?;

        // Resolve everything before mutating anything.
        let actions = suggested
            .iter()
            .map(|entry| self.registry.get(entry.action))
            .collect::<XrResult<Vec<_>>>()?;

        for binding in &profile.bindings {
            binding.keys.lock().unwrap().clear();
        }

        let mut touched_sets = HashSet::new();
        for (entry, action) in suggested.iter().zip(&actions) {
            let mut matched = false;
            for binding in &profile.bindings {
                if let Some(index) = binding.paths.iter().position(|p| *p == entry.binding) {
                    binding.keys.lock().unwrap().push((action.key, index));
                    matched = true;
                }
            }
            if matched {
                if let Some(set) = action.set.upgrade() {
                    touched_sets.insert(set.key);
                }
            } else {
                warn!(
                    "Suggested binding {} for action {:?} matches nothing in {}",
                    self.paths
                        .string(entry.binding)
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|_| "<bad path>".to_owned()),
                    action.name,
                    profile.path_str,
                );
            }
        }

        let sets = self.action_sets.read().unwrap();
        for key in touched_sets {
            if let Some(set) = sets.get(key).and_then(Weak::upgrade) {
                set.bump_generation();
            }
        }

        info!(
            "Suggested {} bindings for {}",
            suggested.len(),
            profile.path_str
        );
        Ok(())
    }

    /// The per-instance profile living on `path`, instantiating it from the
    /// shipped templates on first use.
    pub(crate) fn profile_for_path(&self, path: PathId) -> Option<Arc<Profile>> {
        if let Some(attached) = self.paths.attached(path) {
            return attached.downcast::<Profile>().ok();
        }

        let name = self.paths.string(path).ok()?;
        let template = profiles::Profiles::get().profile_from_path(name.to_str().ok()?)?;
        let profile = Arc::new(Profile::instantiate(template, &self.paths).ok()?);
        match self.paths.attach(path, profile.clone()) {
            Ok(()) => Some(profile),
            // Lost the instantiation race; use the winner.
            Err(_) => self.paths.attached(path)?.downcast::<Profile>().ok(),
        }
    }
}

impl Session {
    /// Phase two: freeze the given action sets against this session and
    /// resolve every action to concrete device sources.
    pub fn attach_action_sets(
        self: &Arc<Self>,
        handles: &[Handle<ActionSet>],
    ) -> XrResult<()> {
        let instance = self.instance()?;
        if handles.is_empty() {
            return Err(XrError::ValidationFailure("no action sets"));
        }
        let sets = handles
            .iter()
            .map(|h| instance.registry.get(*h))
            .collect::<XrResult<Vec<_>>>()?;

        let mut actions = HashMap::new();
        let mut by_set: HashMap<ActionSetKey, Vec<ActionKey>> = HashMap::new();
        for set in &sets {
            if by_set.contains_key(&set.key) {
                return Err(XrError::ValidationFailure("duplicate action set"));
            }
            let keys = by_set.entry(set.key).or_default();
            for action in set.actions.read().unwrap().iter() {
                let mut caches = HashMap::new();
                caches.insert(SubactionPath::User, SourceCache::new(action.ty));
                for &sub in &action.subactions {
                    caches.insert(sub, SourceCache::new(action.ty));
                }
                keys.push(action.key);
                actions.insert(
                    action.key,
                    ActionAttachment {
                        action: action.clone(),
                        caches,
                    },
                );
            }
        }

        let attached = Attached {
            sets: sets
                .iter()
                .map(|set| AttachedSet {
                    set: set.clone(),
                    generation_seen: AtomicU64::new(0),
                })
                .collect(),
            actions,
            by_set,
        };
        if self.input.attached.set(attached).is_err() {
            return Err(XrError::ActionsetsAlreadyAttached);
        }
        for set in &sets {
            set.mark_attached();
        }

        info!("Attached {} action sets", sets.len());
        self.resolve_bindings(&instance);
        Ok(())
    }

    /// Re-scores profiles and re-resolves every source cache from the
    /// current suggestion state. Runs at attach and again whenever a set's
    /// generation moves.
    fn resolve_bindings(self: &Arc<Self>, instance: &Arc<Instance>) {
        let Some(attached) = self.input.attached.get() else {
            return;
        };

        // Pick a profile per user path for whatever device fills the role.
        for subaction in SubactionPath::DEVICE_PATHS {
            let role = subaction.device_role().unwrap();
            let selected = instance
                .system
                .device_for_role(role)
                .and_then(|device| select_profile(instance, attached, subaction, device.name()));

            let mut bound = self.input.bound_profiles.lock().unwrap();
            let previous = bound.get(&subaction).copied();
            let current = selected.as_ref().map(|p| p.path);
            match current {
                Some(path) => {
                    bound.insert(subaction, path);
                }
                None => {
                    bound.remove(&subaction);
                }
            }
            drop(bound);

            if previous != current {
                info!(
                    "{} interaction profile changed: {}",
                    subaction.path_str(),
                    selected.as_ref().map(|p| p.path_str).unwrap_or("<null>"),
                );
                if let Some(&handle) = self.handle.get() {
                    instance
                        .events
                        .push(crate::events::Event::InteractionProfileChanged { session: handle });
                }
            }
        }

        let bound = self.input.bound_profiles.lock().unwrap().clone();
        for attachment in attached.actions.values() {
            for (&cache_sub, cache) in &attachment.caches {
                let mut sources: Vec<(Arc<dyn Device>, &'static str)> = Vec::new();
                let mut haptics: Vec<(Arc<dyn Device>, &'static str)> = Vec::new();

                let scan: &[SubactionPath] = if cache_sub == SubactionPath::User {
                    if attachment.action.subactions.is_empty() {
                        &SubactionPath::DEVICE_PATHS
                    } else {
                        &attachment.action.subactions
                    }
                } else {
                    std::slice::from_ref(&cache_sub)
                };

                for &sub in scan {
                    let Some(role) = sub.device_role() else {
                        continue;
                    };
                    let Some(device) = instance.system.device_for_role(role) else {
                        continue;
                    };
                    let Some(profile) =
                        bound.get(&sub).and_then(|&p| instance.profile_for_path(p))
                    else {
                        continue;
                    };
                    for binding in &profile.bindings {
                        if binding.subaction != sub {
                            continue;
                        }
                        let references = binding
                            .keys
                            .lock()
                            .unwrap()
                            .iter()
                            .any(|(key, _)| *key == attachment.action.key);
                        if !references {
                            continue;
                        }
                        for &input in &binding.inputs {
                            push_source(&mut sources, device, input);
                        }
                        for &output in &binding.outputs {
                            push_source(&mut haptics, device, output);
                        }
                    }
                }

                *cache.sources.write().unwrap() = sources;
                *cache.haptics.write().unwrap() = haptics;
            }
        }

        for entry in &attached.sets {
            entry
                .generation_seen
                .store(entry.set.generation(), Ordering::Release);
        }
    }

    /// Samples every bound source and folds the results into per-action
    /// state. One call per frame, typically.
    pub fn sync_actions(self: &Arc<Self>, active: &[ActiveActionSet]) -> XrResult<SyncResult> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        let attached = self
            .input
            .attached
            .get()
            .ok_or(XrError::ActionsetNotAttached)?;

        let mut resolved_sets = Vec::with_capacity(active.len());
        for entry in active {
            let set = instance.registry.get(entry.set)?;
            if !attached.by_set.contains_key(&set.key) {
                return Err(XrError::ActionsetNotAttached);
            }
            resolved_sets.push((set, entry.subaction));
        }

        // Late suggestions move set generations; rebind before sampling.
        let stale = attached
            .sets
            .iter()
            .any(|s| s.generation_seen.load(Ordering::Acquire) != s.set.generation());
        if stale {
            debug!("Action set generation moved; rebinding");
            self.resolve_bindings(&instance);
        }

        let now = instance.now();
        self.expire_haptic_deadlines(attached, now);

        if self.state() != SessionState::Focused {
            for attachment in attached.actions.values() {
                for cache in attachment.caches.values() {
                    cache
                        .state
                        .store(SampledState::inactive(attachment.action.ty));
                }
            }
            return Ok(SyncResult::NotFocused);
        }

        for (set, filter) in resolved_sets {
            for key in &attached.by_set[&set.key] {
                let attachment = &attached.actions[key];
                for (&sub, cache) in &attachment.caches {
                    if filter != SubactionPath::User
                        && sub != filter
                        && sub != SubactionPath::User
                    {
                        continue;
                    }
                    sample_cache(attachment.action.ty, cache);
                }
            }
        }
        Ok(SyncResult::Focused)
    }

    pub fn action_state_bool(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateBool> {
        let state = self.sampled_state(action, subaction, ActionType::Boolean)?;
        let ActionValue::Bool(current_state) = state.value else {
            return Err(XrError::RuntimeFailure("cache holds wrong value type"));
        };
        Ok(ActionStateBool {
            current_state,
            changed_since_last_sync: state.changed,
            last_change_time: state.timestamp,
            is_active: state.active,
        })
    }

    pub fn action_state_float(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateFloat> {
        let state = self.sampled_state(action, subaction, ActionType::Float)?;
        let ActionValue::Float(current_state) = state.value else {
            return Err(XrError::RuntimeFailure("cache holds wrong value type"));
        };
        Ok(ActionStateFloat {
            current_state,
            changed_since_last_sync: state.changed,
            last_change_time: state.timestamp,
            is_active: state.active,
        })
    }

    pub fn action_state_vector2(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStateVector2> {
        let state = self.sampled_state(action, subaction, ActionType::Vector2)?;
        let ActionValue::Vec2(current_state) = state.value else {
            return Err(XrError::RuntimeFailure("cache holds wrong value type"));
        };
        Ok(ActionStateVector2 {
            current_state,
            changed_since_last_sync: state.changed,
            last_change_time: state.timestamp,
            is_active: state.active,
        })
    }

    pub fn action_state_pose(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<ActionStatePose> {
        let state = self.sampled_state(action, subaction, ActionType::Pose)?;
        Ok(ActionStatePose {
            is_active: state.active,
        })
    }

    fn sampled_state(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
        expected: ActionType,
    ) -> XrResult<SampledState> {
        let instance = self.instance()?;
        let action = instance.registry.get(action)?;
        if action.ty != expected {
            return Err(XrError::ActionTypeMismatch);
        }
        let cache = self.cache_for(&action.key, subaction)?;
        Ok(cache.state.load())
    }

    fn cache_for(&self, key: &ActionKey, subaction: SubactionPath) -> XrResult<&SourceCache> {
        let attached = self
            .input
            .attached
            .get()
            .ok_or(XrError::ActionsetNotAttached)?;
        let attachment = attached
            .actions
            .get(key)
            .ok_or(XrError::ActionsetNotAttached)?;
        attachment
            .caches
            .get(&subaction)
            .ok_or(XrError::PathUnsupported)
    }

    pub fn apply_haptic_feedback(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
        event: &HapticEvent,
    ) -> XrResult<()> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        let action = instance.registry.get(action)?;
        if action.ty != ActionType::Haptic {
            return Err(XrError::ActionTypeMismatch);
        }
        let cache = self.cache_for(&action.key, subaction)?;

        let duration = event.duration.max(MIN_HAPTIC_DURATION_NS);
        for (device, output) in cache.haptics.read().unwrap().iter() {
            device.apply_haptic(output, *event);
        }

        // The stop deadline only ever moves out.
        let deadline = instance.now() + duration;
        cache
            .haptic_stop_deadline
            .fetch_max(deadline, Ordering::AcqRel);
        Ok(())
    }

    pub fn stop_haptic_feedback(
        &self,
        action: Handle<Action>,
        subaction: SubactionPath,
    ) -> XrResult<()> {
        let instance = self.instance()?;
        if !self.is_running() {
            return Err(XrError::SessionNotRunning);
        }
        let action = instance.registry.get(action)?;
        if action.ty != ActionType::Haptic {
            return Err(XrError::ActionTypeMismatch);
        }
        let cache = self.cache_for(&action.key, subaction)?;
        for (device, output) in cache.haptics.read().unwrap().iter() {
            device.stop_haptic(output);
        }
        cache.haptic_stop_deadline.store(0, Ordering::Release);
        Ok(())
    }

    fn expire_haptic_deadlines(&self, attached: &Attached, now: XrTime) {
        for attachment in attached.actions.values() {
            if attachment.action.ty != ActionType::Haptic {
                continue;
            }
            for cache in attachment.caches.values() {
                let deadline = cache.haptic_stop_deadline.load(Ordering::Acquire);
                if deadline != 0 && now >= deadline {
                    for (device, output) in cache.haptics.read().unwrap().iter() {
                        device.stop_haptic(output);
                    }
                    cache.haptic_stop_deadline.store(0, Ordering::Release);
                }
            }
        }
    }

    /// The profile currently bound to one of the four device user paths.
    /// Null when nothing is bound.
    pub fn current_interaction_profile(&self, top_level: PathId) -> XrResult<PathId> {
        let instance = self.instance()?;
        if self.input.attached.get().is_none() {
            return Err(XrError::ActionsetNotAttached);
        }
        let subaction = instance
            .well_known
            .subaction_from_path(top_level)
            .filter(|s| *s != SubactionPath::User)
            .ok_or(XrError::PathUnsupported)?;
        Ok(self
            .input
            .bound_profiles
            .lock()
            .unwrap()
            .get(&subaction)
            .copied()
            .unwrap_or_default())
    }

    /// Evaluates a pose action's bound source at `time`, in the stage
    /// frame. First active source wins. `None` while the action is
    /// unattached or nothing is bound and active.
    pub(crate) fn action_pose_relation(
        &self,
        key: ActionKey,
        subaction: SubactionPath,
        _time: XrTime,
    ) -> Option<Relation> {
        let attached = self.input.attached.get()?;
        let attachment = attached.actions.get(&key)?;
        let cache = attachment.caches.get(&subaction)?;
        for (device, input) in cache.sources.read().unwrap().iter() {
            let Some(state) = device.input_state(input) else {
                continue;
            };
            if !state.active {
                continue;
            }
            let InputValue::Pose(relation) = state.value else {
                continue;
            };
            let mut chain = RelationChain::new();
            chain
                .push_relation(relation)
                .push_pose_if_not_identity(device.tracking_origin_offset());
            return Some(chain.resolve());
        }
        None
    }
}

fn push_source(
    sources: &mut Vec<(Arc<dyn Device>, &'static str)>,
    device: &Arc<dyn Device>,
    name: &'static str,
) {
    let duplicate = sources
        .iter()
        .any(|(d, n)| Arc::ptr_eq(d, device) && *n == name);
    if !duplicate {
        sources.push((device.clone(), name));
    }
}

/// Scores each candidate profile by how many of its rows reference an
/// attached action on `subaction`; the best strictly-positive score wins,
/// earlier candidates win ties.
fn select_profile(
    instance: &Arc<Instance>,
    attached: &Attached,
    subaction: SubactionPath,
    device_name: &str,
) -> Option<Arc<Profile>> {
    let mut best: Option<(usize, Arc<Profile>)> = None;
    for candidate in profiles::preferred_profiles(device_name) {
        let Some(path) = instance.paths.only_get(candidate) else {
            continue;
        };
        let Some(profile) = instance.profile_for_path(path) else {
            continue;
        };
        let score = attached
            .actions
            .keys()
            .filter(|key| profile.binding_references_action(subaction, **key))
            .count();
        if score > 0 && best.as_ref().is_none_or(|(s, _)| score > *s) {
            best = Some((score, profile));
        }
    }
    best.map(|(_, profile)| profile)
}

/// Folds every active source into one state per the aggregation rules:
/// bool OR, float by largest magnitude, vec2 by largest vector magnitude.
fn sample_cache(ty: ActionType, cache: &SourceCache) {
    if ty == ActionType::Haptic {
        return;
    }

    let previous = cache.state.load();
    let sources = cache.sources.read().unwrap();

    let mut active = false;
    let mut value = ActionValue::default_for(ty);
    let mut timestamp = 0;

    for (device, input) in sources.iter() {
        let Some(state) = device.input_state(input) else {
            continue;
        };
        if !state.active {
            continue;
        }
        if !active {
            timestamp = state.timestamp;
        }
        active = true;

        match (ty, state.value) {
            (ActionType::Boolean, InputValue::Bool(b)) => {
                let ActionValue::Bool(current) = value else {
                    unreachable!()
                };
                if b && !current {
                    value = ActionValue::Bool(true);
                    timestamp = state.timestamp;
                }
            }
            (ActionType::Float, InputValue::Float(f)) => {
                let ActionValue::Float(current) = value else {
                    unreachable!()
                };
                if f.abs() > current.abs() {
                    value = ActionValue::Float(f);
                    timestamp = state.timestamp;
                }
            }
            (ActionType::Vector2, InputValue::Vec2(v)) => {
                let ActionValue::Vec2(current) = value else {
                    unreachable!()
                };
                if v.length_squared() > current.length_squared() {
                    value = ActionValue::Vec2(v);
                    timestamp = state.timestamp;
                }
            }
            (ActionType::Pose, InputValue::Pose(_)) => {
                // First active source wins; the pose itself is read at
                // locate time.
                break;
            }
            _ => {
                warn!("Source {input:?} on {} has mismatched value type", device.name());
            }
        }
    }

    // The change flag is only meaningful while the action is actively
    // sampled; the reset to the type's default on deactivation is not a
    // sampled value and is never reported as a change.
    let changed = active && previous.value != value;
    let state = SampledState {
        active,
        changed,
        timestamp: if changed || !previous.active {
            timestamp
        } else {
            previous.timestamp
        },
        value,
    };
    cache.state.store(state);
}
