//! Error types.
//!
//! Each surface of the crate has its own error enum:
//!
//! - [`SceneError`]: structural mutations on targets and behaviors
//! - [`LayoutError`]: a behavior update that failed during a tick
//! - [`ManagerError`]: structural calls on the [`Manager`](crate::Manager)
//! - [`InvariantViolation`]: a broken scheduling invariant

use thiserror::Error;

use crate::scene::{BehaviorId, TargetId};
use crate::schedule::GroupId;

/// Errors raised by the scene model when a mutation is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SceneError {
    #[error("setting {parent:?} as parent of {target:?} would create a cycle")]
    Cycle { target: TargetId, parent: TargetId },

    #[error("target {0:?} has been disposed")]
    Disposed(TargetId),

    #[error("behavior {0:?} has been disposed")]
    BehaviorDisposed(BehaviorId),

    #[error("behavior {0:?} is already attached to a target")]
    AlreadyAttached(BehaviorId),

    #[error("target {target:?} already carries a behavior of the same layout as {behavior:?}")]
    DuplicateBehavior {
        target: TargetId,
        behavior: BehaviorId,
    },
}

/// A failed behavior update.
///
/// These never leave a tick: they are logged and counted in the
/// [`TickReport`](crate::TickReport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("behavior {0:?} is not attached to a live target")]
    Detached(BehaviorId),

    #[error("behavior {0:?} is already updating")]
    Reentrant(BehaviorId),

    #[error("behavior {behavior:?} panicked: {message}")]
    Panicked {
        behavior: BehaviorId,
        message: String,
    },

    #[error("{0}")]
    Failed(String),
}

impl LayoutError {
    /// Convenience constructor for layout implementations.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors returned by structural manager calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
    #[error("manager is busy applying another update")]
    Busy,

    #[error("target {0:?} has been disposed")]
    TargetDisposed(TargetId),

    #[error("group {0:?} has been destroyed")]
    GroupDestroyed(GroupId),

    #[error("group {0:?} belongs to a different manager")]
    ForeignGroup(GroupId),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// A scheduling invariant that no longer holds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("group {0:?} has no targets but is still registered")]
    EmptyGroup(GroupId),

    #[error("target {target:?} is listed by both {first:?} and {second:?}")]
    TargetInTwoGroups {
        target: TargetId,
        first: GroupId,
        second: GroupId,
    },

    #[error("target {target:?} is owned by {owner:?} but listed by {listed:?}")]
    StaleOwner {
        target: TargetId,
        owner: Option<GroupId>,
        listed: Option<GroupId>,
    },

    #[error("group {before:?} is ordered ahead of {after:?} against their priorities")]
    UnsortedGroups { before: GroupId, after: GroupId },

    #[error("registered target {0:?} has no follow-parent behavior")]
    MissingFollowParent(TargetId),

    #[error("group link between {parent:?} and {child:?} is one-sided")]
    BrokenGroupLink { parent: GroupId, child: GroupId },

    #[error("group {0:?} lists targets that differ from its live subtree")]
    StaleMembership(GroupId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_error_messages() {
        let err = LayoutError::failed("no room");
        assert_eq!(err.to_string(), "no room");

        let id = BehaviorId::new();
        let err = LayoutError::Panicked {
            behavior: id,
            message: "boom".into(),
        };
        assert!(err.to_string().ends_with("panicked: boom"));
    }

    #[test]
    fn violations_surface_as_manager_errors() {
        let group = GroupId::new();
        let err: ManagerError = InvariantViolation::StaleMembership(group).into();
        assert_eq!(
            err,
            ManagerError::Invariant(InvariantViolation::StaleMembership(group))
        );
        assert!(err.to_string().contains("live subtree"));
    }

    #[test]
    fn manager_error_is_comparable() {
        assert_eq!(ManagerError::Busy, ManagerError::Busy);
        assert_ne!(
            ManagerError::Busy,
            ManagerError::TargetDisposed(TargetId::new())
        );
    }
}
