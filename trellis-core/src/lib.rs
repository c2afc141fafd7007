//! Trellis Core
//!
//! This crate schedules layout computation over a scene hierarchy. It
//! implements:
//!
//! - A scene model of layout targets and the behaviors attached to them
//! - Grouping of targets into independently computable subtrees
//! - Deterministic ordering of groups (by priority) and of the behaviors
//!   inside each group (by traversal, normal before delay)
//! - Incremental regrouping as targets are reparented, disposed, or gain and
//!   lose behaviors
//!
//! Everything runs synchronously on the caller's thread. There is no
//! background scheduler: ticks happen when [`Manager::calculate_layouts`] is
//! called.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `scene`: targets, behaviors, the [`Layout`] trait and notifications
//! - `schedule`: groups, the manager and tick evaluation
//! - `config`: manager tunables
//! - `snapshot`: serializable views of the scheduler state
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::{layout_fn, Behavior, LayoutKind, Manager, Target, Vec2};
//!
//! let manager = Manager::new();
//!
//! // Build a small tree
//! let window = Target::new("window");
//! let button = Target::new("button");
//! window.add_child(&button)?;
//! button.set_local_origin(Vec2::new(8.0, 8.0));
//!
//! // Attach a post-processing layout
//! button.add_behavior(Behavior::with_kind(
//!     LayoutKind::Delay,
//!     layout_fn(|target| {
//!         println!("{} placed at {:?}", target.name(), target.world_origin());
//!         Ok(())
//!     }),
//! ))?;
//!
//! // One group, follow-parent behaviors first, the delay layout last
//! let group = manager.entry(&window)?;
//! assert_eq!(group.calculation_order().len(), 3);
//!
//! manager.calculate_layouts();
//! // Prints: "button placed at Vec2 { x: 8.0, y: 8.0 }"
//! ```

pub mod config;
pub mod error;
pub mod scene;
pub mod schedule;
pub mod snapshot;

pub use config::ManagerConfig;
pub use error::{InvariantViolation, LayoutError, ManagerError, SceneError};
pub use scene::{
    layout_fn, Behavior, BehaviorId, FollowParent, Layout, LayoutKind, Notifier, Target,
    TargetId, Vec2,
};
pub use schedule::{GroupHandle, GroupId, Manager, TickReport};
pub use snapshot::{GroupSnapshot, ManagerSnapshot};
