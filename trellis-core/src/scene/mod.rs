//! Scene Model
//!
//! This module holds the collaborators the scheduler works against: layout
//! targets arranged in a parent/child hierarchy, and the behaviors attached
//! to them.
//!
//! # Ownership
//!
//! A parent owns its children and a target owns its behaviors. Everything
//! pointing back up the tree (child to parent, behavior to owner) is weak.
//! The scheduler never owns targets; it only tracks them.
//!
//! # Notifications
//!
//! Targets and behaviors each carry their own [`Notifier`] lists:
//!
//! - targets: disposed, parent changed, behaviors changed
//! - behaviors: disposed, changed, operation priority changed
//!
//! Notifications fire synchronously at the point of mutation, once the
//! mutation is complete.

mod behavior;
mod follow;
mod notify;
mod target;

pub use behavior::{layout_fn, Behavior, BehaviorId, FnLayout, Layout, LayoutKind, WeakBehavior};
pub use follow::FollowParent;
pub use notify::{Notifier, SubscriptionId};
pub use target::{
    Ancestors, BehaviorChange, BehaviorsChanged, ParentChanged, Target, TargetId, Vec2,
    WeakTarget,
};

pub(crate) use notify::panic_message;
