//! Reference and action spaces, and the relation math behind `locate`.
//!
//! Every locate goes through a pure space-to-space relation (computed in
//! the stage frame) with the two per-space pose offsets composed on top by
//! the relation chain.

use crate::error::{XrError, XrResult};
use crate::handles::{Handle, HandleObject};
use crate::input::{ActionKey, SubactionPath};
use crate::math::{
    self, Pose, Relation, RelationFlags, XrTime,
};
use crate::relation_chain::RelationChain;
use crate::session::Session;
use bitflags::bitflags;
use glam::Vec3;
use std::sync::{Arc, Weak};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ReferenceSpaceType {
    View,
    Local,
    LocalFloor,
    Stage,
    Unbounded,
    CombinedEye,
}

/// The reference space kinds every session supports.
pub(crate) const SUPPORTED_REFERENCE_SPACES: [ReferenceSpaceType; 4] = [
    ReferenceSpaceType::View,
    ReferenceSpaceType::Local,
    ReferenceSpaceType::LocalFloor,
    ReferenceSpaceType::Stage,
];

#[derive(Copy, Clone, Debug)]
pub(crate) enum SpaceKind {
    Reference(ReferenceSpaceType),
    Action {
        action: ActionKey,
        subaction: SubactionPath,
    },
}

pub struct Space {
    pub(crate) session: Weak<Session>,
    pub(crate) kind: SpaceKind,
    /// Constant offset of this space within what it is anchored to.
    pub(crate) pose: Pose,
}

impl HandleObject for Space {}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SpaceLocationFlags: u32 {
        const ORIENTATION_VALID = 1 << 0;
        const POSITION_VALID = 1 << 1;
        const ORIENTATION_TRACKED = 1 << 2;
        const POSITION_TRACKED = 1 << 3;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct SpaceVelocityFlags: u32 {
        const LINEAR_VALID = 1 << 0;
        const ANGULAR_VALID = 1 << 1;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SpaceVelocity {
    pub flags: SpaceVelocityFlags,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SpaceLocation {
    pub flags: SpaceLocationFlags,
    pub pose: Pose,
    pub velocity: SpaceVelocity,
}

/// Maps internal relation flags onto the public location/velocity sets.
fn public_location(relation: &Relation) -> SpaceLocation {
    let mut flags = SpaceLocationFlags::empty();
    let mut velocity = SpaceVelocity::default();

    if relation.flags.contains(RelationFlags::ORIENTATION_VALID) {
        flags |= SpaceLocationFlags::ORIENTATION_VALID;
    }
    if relation.flags.contains(RelationFlags::POSITION_VALID) {
        flags |= SpaceLocationFlags::POSITION_VALID;
    }
    if relation.flags.contains(RelationFlags::ORIENTATION_TRACKED) {
        flags |= SpaceLocationFlags::ORIENTATION_TRACKED;
    }
    if relation.flags.contains(RelationFlags::POSITION_TRACKED) {
        flags |= SpaceLocationFlags::POSITION_TRACKED;
    }
    if relation.flags.contains(RelationFlags::LINEAR_VELOCITY_VALID) {
        velocity.flags |= SpaceVelocityFlags::LINEAR_VALID;
        velocity.linear_velocity = relation.linear_velocity;
    }
    if relation
        .flags
        .contains(RelationFlags::ANGULAR_VELOCITY_VALID)
    {
        velocity.flags |= SpaceVelocityFlags::ANGULAR_VALID;
        velocity.angular_velocity = relation.angular_velocity;
    }

    SpaceLocation {
        flags,
        pose: relation.pose,
        velocity,
    }
}

impl Session {
    pub fn create_reference_space(
        self: &Arc<Self>,
        reference: ReferenceSpaceType,
        pose: Pose,
    ) -> XrResult<Handle<Space>> {
        let instance = self.instance()?;
        if !SUPPORTED_REFERENCE_SPACES.contains(&reference) {
            return Err(XrError::ReferenceSpaceUnsupported);
        }
        math::validate_pose(&pose)?;

        let space = Arc::new(Space {
            session: Arc::downgrade(self),
            kind: SpaceKind::Reference(reference),
            pose,
        });
        let handle = instance.registry.register(self.key()?, space.clone())?;
        Ok(handle)
    }

    pub fn create_action_space(
        self: &Arc<Self>,
        action: Handle<crate::input::Action>,
        subaction: SubactionPath,
        pose: Pose,
    ) -> XrResult<Handle<Space>> {
        let instance = self.instance()?;
        let action = instance.registry.get(action)?;
        if action.ty != crate::input::ActionType::Pose {
            return Err(XrError::ActionTypeMismatch);
        }
        if subaction != SubactionPath::User && !action.subactions.contains(&subaction) {
            return Err(XrError::PathUnsupported);
        }
        math::validate_pose(&pose)?;

        let space = Arc::new(Space {
            session: Arc::downgrade(self),
            kind: SpaceKind::Action {
                action: action.key,
                subaction,
            },
            pose,
        });
        let handle = instance.registry.register(self.key()?, space.clone())?;
        Ok(handle)
    }

    pub fn enumerate_reference_spaces(
        &self,
        out: Option<&mut [ReferenceSpaceType]>,
    ) -> XrResult<usize> {
        crate::util::fill_buffer(&SUPPORTED_REFERENCE_SPACES, out)
    }

    /// Locates `space` relative to `base` at `time`.
    pub fn locate_space(
        self: &Arc<Self>,
        space: Handle<Space>,
        base: Handle<Space>,
        time: XrTime,
    ) -> XrResult<SpaceLocation> {
        let instance = self.instance()?;
        if time <= 0 {
            return Err(XrError::TimeInvalid);
        }
        let space = instance.registry.get(space)?;
        let base = instance.registry.get(base)?;
        for s in [&space, &base] {
            let owner = s.session.upgrade().ok_or(XrError::HandleInvalid)?;
            if !Arc::ptr_eq(&owner, self) {
                return Err(XrError::ValidationFailure("space belongs to another session"));
            }
        }

        let pure = self.pure_relation(&space.kind, &base.kind, time)?;

        let mut chain = RelationChain::new();
        chain.push_pose_if_not_identity(space.pose);
        chain.push_relation(pure);
        if !base.pose.is_identity() {
            chain.push_inverted_pose(base.pose);
        }
        Ok(public_location(&chain.resolve()))
    }

    /// The space-to-space relation before either space's pose offset is
    /// applied.
    fn pure_relation(
        self: &Arc<Self>,
        space: &SpaceKind,
        base: &SpaceKind,
        time: XrTime,
    ) -> XrResult<Relation> {
        match (space, base) {
            (SpaceKind::Reference(space), SpaceKind::Reference(base)) => {
                if space == base {
                    return Ok(Relation::IDENTITY);
                }
                let mut chain = RelationChain::new();
                chain.push_relation(self.reference_in_stage(*space, time)?);
                push_inverted_stage_relation(&mut chain, self.reference_in_stage(*base, time)?);
                Ok(chain.resolve())
            }
            (SpaceKind::Action { action, subaction }, SpaceKind::Reference(base)) => {
                let Some(relation) = self.action_pose_relation(*action, *subaction, time) else {
                    return Ok(Relation::EMPTY);
                };
                let mut chain = RelationChain::new();
                chain.push_relation(relation);
                push_inverted_stage_relation(&mut chain, self.reference_in_stage(*base, time)?);
                Ok(chain.resolve())
            }
            (SpaceKind::Reference(space), SpaceKind::Action { action, subaction }) => {
                let Some(relation) = self.action_pose_relation(*action, *subaction, time) else {
                    return Ok(Relation::EMPTY);
                };
                let mut chain = RelationChain::new();
                chain.push_relation(self.reference_in_stage(*space, time)?);
                chain.push_inverted_relation(relation);
                Ok(chain.resolve())
            }
            // Locating one action space against another needs a pivot
            // through a true space, which no caller has wanted yet.
            (SpaceKind::Action { .. }, SpaceKind::Action { .. }) => Ok(Relation::EMPTY),
        }
    }

    /// Relation of a reference space's anchor in the stage frame.
    pub(crate) fn reference_in_stage(
        self: &Arc<Self>,
        reference: ReferenceSpaceType,
        time: XrTime,
    ) -> XrResult<Relation> {
        match reference {
            ReferenceSpaceType::Stage => Ok(Relation::IDENTITY),
            ReferenceSpaceType::View => {
                let head = self.head_in_stage(time)?;
                self.maybe_adopt_initial_head(&head);
                Ok(head)
            }
            ReferenceSpaceType::Local => {
                // Local anchors where the user first looked, yaw only.
                let anchor = self.local_anchor(time)?;
                Ok(Relation::from_pose(anchor))
            }
            ReferenceSpaceType::LocalFloor => {
                // Local dropped onto the stage floor plane.
                let mut anchor = self.local_anchor(time)?;
                anchor.position.y = 0.0;
                Ok(Relation::from_pose(anchor))
            }
            ReferenceSpaceType::Unbounded | ReferenceSpaceType::CombinedEye => {
                Err(XrError::ReferenceSpaceUnsupported)
            }
        }
    }

    /// Head device relation in the stage frame at `time`.
    pub(crate) fn head_in_stage(self: &Arc<Self>, time: XrTime) -> XrResult<Relation> {
        let instance = self.instance()?;
        let head = &instance.system.head;
        let mut chain = RelationChain::new();
        chain
            .push_relation(head.relation_at(time))
            .push_pose_if_not_identity(head.tracking_origin_offset());
        Ok(chain.resolve())
    }

    fn local_anchor(self: &Arc<Self>, time: XrTime) -> XrResult<Pose> {
        if let Some(anchor) = self.initial_head_relation() {
            return Ok(anchor);
        }
        let head = self.head_in_stage(time)?;
        self.maybe_adopt_initial_head(&head);
        Ok(self.initial_head_relation().unwrap_or(Pose::IDENTITY))
    }
}

/// The inverse of a stage relation, preserving velocity validity when the
/// relation is a static pose (zero velocities can be inverted exactly).
pub(crate) fn push_inverted_stage_relation(chain: &mut RelationChain, relation: Relation) {
    let is_static = relation.linear_velocity == Vec3::ZERO
        && relation.angular_velocity == Vec3::ZERO
        && relation.flags == RelationFlags::TRACKED_POSE;
    if is_static {
        if !relation.pose.is_identity() {
            chain.push_inverted_pose(relation.pose);
        }
    } else {
        chain.push_inverted_relation(relation);
    }
}
