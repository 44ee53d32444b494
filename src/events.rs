//! Outbound event buffer: the runtime produces, the client polls one event
//! per call. Events that refer to handles the client already destroyed are
//! silently dropped on the way out.

use crate::handles::{Handle, Registry};
use crate::math::{Pose, XrTime};
use crate::session::{Session, SessionState};
use crate::spaces::ReferenceSpaceType;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Event {
    SessionStateChanged {
        session: Handle<Session>,
        state: SessionState,
        time: XrTime,
    },
    InteractionProfileChanged {
        session: Handle<Session>,
    },
    ReferenceSpaceChangePending {
        session: Handle<Session>,
        reference: ReferenceSpaceType,
        pose_valid: bool,
        pose_in_previous_space: Pose,
    },
    MainSessionVisibilityChanged {
        visible: bool,
    },
}

impl Event {
    fn session(&self) -> Option<Handle<Session>> {
        match self {
            Self::SessionStateChanged { session, .. }
            | Self::InteractionProfileChanged { session }
            | Self::ReferenceSpaceChangePending { session, .. } => Some(*session),
            Self::MainSessionVisibilityChanged { .. } => None,
        }
    }
}

#[derive(Default)]
pub(crate) struct EventQueue {
    queue: Mutex<VecDeque<Event>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.queue.lock().unwrap().push_back(event);
    }

    /// Pops the oldest non-stale event, if any.
    pub fn poll(&self, registry: &Registry) -> Option<Event> {
        let mut queue = self.queue.lock().unwrap();
        while let Some(event) = queue.pop_front() {
            let stale = event
                .session()
                .is_some_and(|session| !registry.is_live(session.key()));
            if !stale {
                return Some(event);
            }
        }
        None
    }
}
