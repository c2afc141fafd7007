//! Layout Scheduling
//!
//! This module turns a forest of targets into an ordered list of groups and
//! keeps that list correct while the forest changes.
//!
//! # Overview
//!
//! A group is one root target plus every registered target below it, up to
//! (not including) targets that root groups of their own. The manager keeps
//! its groups sorted by priority, highest first, and each group keeps a
//! calculation order:
//!
//! - the normal behaviors of its targets, target by target in pre-order,
//!   each target's follow-parent behavior first
//! - then the delay behaviors, in the same order
//!
//! A tick walks the groups in order and, within each group, updates every
//! behavior whose changed flag is set.
//!
//! # Design Decisions
//!
//! 1. Ownership lives in one side table (target to group) rather than in the
//!    targets themselves. Member lists are recomputed from that table and the
//!    live tree, so the two can never disagree for long.
//!
//! 2. Scene notifications are turned into [`SceneEvent`](event::SceneEvent)s
//!    and applied by a single reaction function per event kind. The reactions
//!    know nothing about how the events were delivered.
//!
//! 3. Groups are indexed by ID in an insertion-ordered map, so both lookup and
//!    in-order iteration are cheap, and re-sorting after a priority change is
//!    a stable sort of that map.

mod event;
mod group;
mod handle;
mod manager;
mod order;
mod registry;
mod tick;

pub(crate) use group::Group;
pub use group::GroupId;
pub use handle::GroupHandle;
pub use manager::Manager;
pub use tick::TickReport;
