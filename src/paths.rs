//! Interned hierarchical path strings.
//!
//! Two structurally equal strings always map to the same [`PathId`], and an
//! id stays valid for the owning instance's whole lifetime. Strings are
//! stored NUL-terminated so zero-terminated consumers can borrow them
//! directly.

use crate::error::{XrError, XrResult};
use slotmap::SlotMap;
use std::any::Any;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::sync::{Arc, OnceLock, RwLock};

slotmap::new_key_type! {
    /// Opaque path id. `PathId::null()` is the null path, distinct from
    /// every interned id.
    pub struct PathId;
}

pub const MAX_PATH_LENGTH: usize = 256;

struct PathEntry {
    string: Arc<CStr>,
    /// At most one opaque attachment per id; interaction profiles hang
    /// their per-instance state off their canonical path this way.
    attachment: OnceLock<Arc<dyn Any + Send + Sync>>,
}

#[derive(Default)]
pub struct PathStore {
    by_id: RwLock<SlotMap<PathId, PathEntry>>,
    by_string: RwLock<HashMap<Box<str>, PathId>>,
}

impl PathStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `string`, returning the existing id when it was seen before.
    pub fn get_or_create(&self, string: &str) -> XrResult<PathId> {
        validate_path_string(string)?;

        if let Some(id) = self.by_string.read().unwrap().get(string) {
            return Ok(*id);
        }

        let mut by_string = self.by_string.write().unwrap();
        // Lost the race to another interner?
        if let Some(id) = by_string.get(string) {
            return Ok(*id);
        }

        let c_string =
            CString::new(string).map_err(|_| XrError::PathFormatInvalid)?;
        let id = self.by_id.write().unwrap().insert(PathEntry {
            string: c_string.into(),
            attachment: OnceLock::new(),
        });
        by_string.insert(string.into(), id);
        Ok(id)
    }

    /// Lookup without interning.
    pub fn only_get(&self, string: &str) -> Option<PathId> {
        self.by_string.read().unwrap().get(string).copied()
    }

    /// The interned string, NUL terminator included. The returned storage
    /// stays alive as long as the instance.
    pub fn string(&self, id: PathId) -> XrResult<Arc<CStr>> {
        self.by_id
            .read()
            .unwrap()
            .get(id)
            .map(|entry| entry.string.clone())
            .ok_or(XrError::PathInvalid)
    }

    pub fn attach(&self, id: PathId, data: Arc<dyn Any + Send + Sync>) -> XrResult<()> {
        let by_id = self.by_id.read().unwrap();
        let entry = by_id.get(id).ok_or(XrError::PathInvalid)?;
        entry
            .attachment
            .set(data)
            .map_err(|_| XrError::RuntimeFailure("path already has an attachment"))
    }

    pub fn attached(&self, id: PathId) -> Option<Arc<dyn Any + Send + Sync>> {
        self.by_id
            .read()
            .unwrap()
            .get(id)?
            .attachment
            .get()
            .cloned()
    }

    /// Frees every interned path and its backing storage.
    pub fn destroy_all(&self) {
        self.by_string.write().unwrap().clear();
        self.by_id.write().unwrap().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_id.read().unwrap().len()
    }
}

/// Well-formedness rules for path strings: absolute, lowercase components
/// of `[a-z0-9\-_.]`, no empty components, bounded length.
fn validate_path_string(string: &str) -> XrResult<()> {
    let Some(rest) = string.strip_prefix('/') else {
        return Err(XrError::PathFormatInvalid);
    };
    if rest.is_empty() || string.len() >= MAX_PATH_LENGTH {
        return Err(XrError::PathFormatInvalid);
    }
    for component in rest.split('/') {
        if component.is_empty() {
            return Err(XrError::PathFormatInvalid);
        }
        if !component
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_' | b'.'))
        {
            return Err(XrError::PathFormatInvalid);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::Key;

    #[test]
    fn equal_strings_share_an_id() {
        let store = PathStore::new();
        let a = store.get_or_create("/user/hand/left").unwrap();
        let b = store.get_or_create("/user/hand/left").unwrap();
        let c = store.get_or_create("/user/hand/right").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn null_is_distinct_from_interned_ids() {
        let store = PathStore::new();
        let id = store.get_or_create("/user/head").unwrap();
        assert_ne!(id, PathId::null());
        assert!(store.string(PathId::null()).is_err());
    }

    #[test]
    fn string_round_trips_with_nul() {
        let store = PathStore::new();
        let id = store
            .get_or_create("/user/hand/left/input/select/click")
            .unwrap();
        let s = store.string(id).unwrap();
        assert_eq!(s.to_str().unwrap(), "/user/hand/left/input/select/click");
        assert_eq!(s.to_bytes_with_nul().last(), Some(&0u8));
    }

    #[test]
    fn only_get_does_not_intern() {
        let store = PathStore::new();
        assert_eq!(store.only_get("/user/gamepad"), None);
        let id = store.get_or_create("/user/gamepad").unwrap();
        assert_eq!(store.only_get("/user/gamepad"), Some(id));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let store = PathStore::new();
        for bad in [
            "no_leading_slash",
            "/",
            "/double//component",
            "/trailing/",
            "/UpperCase",
            "/spa ce",
        ] {
            assert_eq!(
                store.get_or_create(bad),
                Err(XrError::PathFormatInvalid),
                "{bad:?} should be rejected"
            );
        }
        let long = format!("/{}", "a".repeat(MAX_PATH_LENGTH));
        assert_eq!(store.get_or_create(&long), Err(XrError::PathFormatInvalid));
    }

    #[test]
    fn one_attachment_per_id() {
        let store = PathStore::new();
        let id = store.get_or_create("/interaction_profiles/x/y").unwrap();
        assert!(store.attached(id).is_none());
        store.attach(id, Arc::new(7u32)).unwrap();
        let got = store.attached(id).unwrap().downcast::<u32>().unwrap();
        assert_eq!(*got, 7);
        assert!(store.attach(id, Arc::new(8u32)).is_err());
    }
}
