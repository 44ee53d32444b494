//! Hierarchical handle registry.
//!
//! Every API-visible object lives in one instance-wide arena. A handle is
//! the arena key's 64-bit FFI form wrapped with the object kind as a type
//! parameter; resolving it checks existence, kind, and liveness, so stale
//! or wrong-kind handles fail with [`XrError::HandleInvalid`] instead of
//! aliasing somebody else's object. Ownership is a tree: parents hold
//! non-owning child slots used only for recursive destruction ordering.

use crate::error::{XrError, XrResult};
use crate::input::{Action, ActionSet};
use crate::instance::{DebugMessenger, Instance};
use crate::session::Session;
use crate::spaces::Space;
use crate::swapchain::Swapchain;
use slotmap::{Key, KeyData, SlotMap};
use std::marker::PhantomData;
use std::sync::{Arc, RwLock, Weak};

slotmap::new_key_type! {
    pub(crate) struct HandleKey;
}

/// Upper bound on the child slots of a single handle.
pub const MAX_HANDLE_CHILDREN: usize = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandleKind {
    Instance,
    Session,
    ActionSet,
    Action,
    Space,
    Swapchain,
    DebugMessenger,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum HandleState {
    Live,
    Destroyed,
}

/// Type-specific teardown, invoked bottom-up during recursive destruction
/// after the handle has left the registry.
pub(crate) trait HandleObject: Send + Sync {
    fn on_destroy(&self) {}
}

#[derive(Clone)]
pub(crate) enum Object {
    // Weak: the instance owns the registry, so its own entry must not keep
    // it alive.
    Instance(Weak<Instance>),
    Session(Arc<Session>),
    ActionSet(Arc<ActionSet>),
    Action(Arc<Action>),
    Space(Arc<Space>),
    Swapchain(Arc<Swapchain>),
    DebugMessenger(Arc<DebugMessenger>),
}

impl Object {
    fn kind(&self) -> HandleKind {
        match self {
            Self::Instance(_) => HandleKind::Instance,
            Self::Session(_) => HandleKind::Session,
            Self::ActionSet(_) => HandleKind::ActionSet,
            Self::Action(_) => HandleKind::Action,
            Self::Space(_) => HandleKind::Space,
            Self::Swapchain(_) => HandleKind::Swapchain,
            Self::DebugMessenger(_) => HandleKind::DebugMessenger,
        }
    }

    fn as_destroyable(&self) -> Option<Arc<dyn HandleObject>> {
        match self {
            Self::Instance(weak) => {
                let instance = weak.upgrade()?;
                Some(instance)
            }
            Self::Session(o) => Some(o.clone()),
            Self::ActionSet(o) => Some(o.clone()),
            Self::Action(o) => Some(o.clone()),
            Self::Space(o) => Some(o.clone()),
            Self::Swapchain(o) => Some(o.clone()),
            Self::DebugMessenger(o) => Some(o.clone()),
        }
    }
}

/// Implemented by every object kind stored in the registry; ties the typed
/// handle to its `Object` variant.
pub(crate) trait Registered: HandleObject + Sized {
    fn into_object(this: Arc<Self>) -> Object;
    fn from_object(object: &Object) -> Option<Arc<Self>>;
}

macro_rules! impl_registered {
    ($ty:ty, $variant:ident) => {
        impl Registered for $ty {
            fn into_object(this: Arc<Self>) -> Object {
                Object::$variant(this)
            }
            fn from_object(object: &Object) -> Option<Arc<Self>> {
                match object {
                    Object::$variant(o) => Some(o.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_registered!(Session, Session);
impl_registered!(ActionSet, ActionSet);
impl_registered!(Action, Action);
impl_registered!(Space, Space);
impl_registered!(Swapchain, Swapchain);
impl_registered!(DebugMessenger, DebugMessenger);

/// Opaque 64-bit handle, typed by the object kind it names.
pub struct Handle<T> {
    raw: u64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const NULL: Self = Self {
        raw: 0,
        _kind: PhantomData,
    };

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn as_raw(&self) -> u64 {
        self.raw
    }

    pub(crate) fn key(&self) -> HandleKey {
        HandleKey::from(KeyData::from_ffi(self.raw))
    }

    pub(crate) fn from_key(key: HandleKey) -> Self {
        Self::from_raw(key.data().as_ffi())
    }
}

impl<T> Copy for Handle<T> {}
impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Handle<T> {}
impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}
impl<T> std::fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handle({:#x})", self.raw)
    }
}

struct Entry {
    object: Object,
    state: HandleState,
    parent: Option<HandleKey>,
    children: Vec<HandleKey>,
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: RwLock<SlotMap<HandleKey, Entry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the root object. There is exactly one per registry.
    pub fn register_root(&self, instance: &Arc<Instance>) -> HandleKey {
        self.entries.write().unwrap().insert(Entry {
            object: Object::Instance(Arc::downgrade(instance)),
            state: HandleState::Live,
            parent: None,
            children: Vec::new(),
        })
    }

    /// Registers `object` under `parent` and returns its handle.
    pub fn register<T: Registered>(
        &self,
        parent: HandleKey,
        object: Arc<T>,
    ) -> XrResult<Handle<T>> {
        let mut entries = self.entries.write().unwrap();

        let parent_entry = entries
            .get(parent)
            .ok_or(XrError::RuntimeFailure("parent handle not registered"))?;
        if parent_entry.state != HandleState::Live {
            return Err(XrError::RuntimeFailure("parent handle not live"));
        }
        if parent_entry.children.len() >= MAX_HANDLE_CHILDREN {
            return Err(XrError::LimitReached);
        }

        let key = entries.insert(Entry {
            object: T::into_object(object),
            state: HandleState::Live,
            parent: Some(parent),
            children: Vec::new(),
        });
        entries[parent].children.push(key);
        Ok(Handle::from_key(key))
    }

    /// Resolves a typed handle to its live object.
    pub fn get<T: Registered>(&self, handle: Handle<T>) -> XrResult<Arc<T>> {
        let entries = self.entries.read().unwrap();
        let entry = entries.get(handle.key()).ok_or(XrError::HandleInvalid)?;
        if entry.state != HandleState::Live {
            return Err(XrError::HandleInvalid);
        }
        T::from_object(&entry.object).ok_or(XrError::HandleInvalid)
    }

    pub fn is_live(&self, key: HandleKey) -> bool {
        self.entries
            .read()
            .unwrap()
            .get(key)
            .is_some_and(|e| e.state == HandleState::Live)
    }

    /// Live children of `key`, in registration order.
    pub fn children_of(&self, key: HandleKey) -> Vec<(HandleKey, HandleKind)> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .map(|entry| {
                entry
                    .children
                    .iter()
                    .filter_map(|&child| entries.get(child).map(|e| (child, e.object.kind())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Recursively destroys `key` and everything below it, bottom-up.
    /// Destroyer callbacks run after the subtree has left the registry.
    pub fn destroy(&self, key: HandleKey) -> XrResult<()> {
        let mut destroyed = Vec::new();
        {
            let mut entries = self.entries.write().unwrap();
            let entry = entries.get(key).ok_or(XrError::HandleInvalid)?;
            if entry.state != HandleState::Live {
                return Err(XrError::HandleInvalid);
            }

            // Detach from the parent's child slots first; a live handle
            // that its parent doesn't know about is an internal bug.
            if let Some(parent) = entry.parent {
                let slots = &mut entries[parent].children;
                let slot = slots
                    .iter()
                    .position(|&c| c == key)
                    .ok_or(XrError::RuntimeFailure("handle missing from parent slots"))?;
                slots.remove(slot);
            }

            destroy_recursive(&mut entries, key, &mut destroyed);
        }

        for object in destroyed {
            if let Some(object) = object.as_destroyable() {
                object.on_destroy();
            }
        }
        Ok(())
    }
}

fn destroy_recursive(
    entries: &mut SlotMap<HandleKey, Entry>,
    key: HandleKey,
    destroyed: &mut Vec<Object>,
) {
    let children = match entries.get(key) {
        Some(entry) => entry.children.clone(),
        None => return,
    };
    for child in children {
        destroy_recursive(entries, child, destroyed);
    }
    entries[key].state = HandleState::Destroyed;
    if let Some(entry) = entries.remove(key) {
        destroyed.push(entry.object);
    }
}
