//! Chains of pose and relation steps, resolved into a single relation.
//!
//! Steps apply in push order: the first push is the innermost transform.
//! Pose steps are static offsets (exact, zero velocity); relation steps
//! carry tracked data and its validity flags.

use crate::math::{Pose, Relation};

#[derive(Clone, Debug, Default)]
pub struct RelationChain {
    steps: Vec<Relation>,
}

impl RelationChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_pose(&mut self, pose: Pose) -> &mut Self {
        self.steps.push(Relation::from_pose(pose));
        self
    }

    pub fn push_pose_if_not_identity(&mut self, pose: Pose) -> &mut Self {
        if !pose.is_identity() {
            self.push_pose(pose);
        }
        self
    }

    pub fn push_relation(&mut self, relation: Relation) -> &mut Self {
        self.steps.push(relation);
        self
    }

    pub fn push_inverted_pose(&mut self, pose: Pose) -> &mut Self {
        self.push_pose(pose.invert())
    }

    /// Pushes the inverse of `relation`. Derivative validity does not
    /// survive inversion; the pose flags do.
    pub fn push_inverted_relation(&mut self, relation: Relation) -> &mut Self {
        self.steps.push(relation.invert());
        self
    }

    /// Composes all steps into one relation. A validity flag survives only
    /// if every step carries it.
    pub fn resolve(&self) -> Relation {
        let mut steps = self.steps.iter();
        let Some(first) = steps.next() else {
            return Relation::IDENTITY;
        };
        steps.fold(*first, |acc, step| accumulate(step, &acc))
    }
}

/// `outer ∘ inner`: `inner` maps into the frame `outer` maps out of.
fn accumulate(outer: &Relation, inner: &Relation) -> Relation {
    let rotated_position = outer.pose.orientation * inner.pose.position;
    let pose = Pose {
        orientation: outer.pose.orientation * inner.pose.orientation,
        position: outer.pose.position + rotated_position,
    };

    // Rigid-body derivative composition: the inner frame's motion is seen
    // through the outer frame's rotation, plus the lever-arm term from the
    // outer frame's own angular velocity.
    let linear_velocity = outer.linear_velocity
        + outer.pose.orientation * inner.linear_velocity
        + outer.angular_velocity.cross(rotated_position);
    let angular_velocity = outer.angular_velocity + outer.pose.orientation * inner.angular_velocity;

    Relation {
        pose,
        linear_velocity,
        angular_velocity,
        flags: outer.flags & inner.flags,
    }
}
