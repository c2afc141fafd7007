//! Groups
//!
//! A group is the unit the manager schedules: one root target, every
//! registered target in the root's territory (in pre-order), and the
//! calculation order derived from those targets' behaviors.
//!
//! The group itself knows nothing about the manager's side tables. The
//! registry computes membership and hands it over through
//! [`Group::set_members`]; the group keeps the derived state in sync.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::scene::{Behavior, LayoutKind, Target, TargetId, WeakTarget};

/// Unique identifier for a group.
///
/// IDs grow monotonically, so comparing two IDs compares creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u64);

impl GroupId {
    /// Generate a new unique group ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry of a group's pre-order membership list.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    pub(crate) id: TargetId,
    pub(crate) target: WeakTarget,
    /// Number of this group's members above it in the live tree. Unregistered
    /// targets in between do not count.
    pub(crate) depth: usize,
}

#[derive(Debug)]
pub(crate) struct Group {
    id: GroupId,
    root: TargetId,
    root_target: WeakTarget,
    priority: i32,
    parent: Option<GroupId>,
    children: IndexSet<GroupId>,
    members: Vec<Member>,
    calculation_order: Vec<Behavior>,
    dirty: bool,
}

impl Group {
    /// Create an empty group rooted at `root`.
    pub(crate) fn new(root: &Target, priority: i32) -> Self {
        Self {
            id: GroupId::new(),
            root: root.id(),
            root_target: root.downgrade(),
            priority,
            parent: None,
            children: IndexSet::new(),
            members: Vec::new(),
            calculation_order: Vec::new(),
            dirty: true,
        }
    }

    pub(crate) fn id(&self) -> GroupId {
        self.id
    }

    pub(crate) fn root(&self) -> TargetId {
        self.root
    }

    pub(crate) fn root_target(&self) -> Option<Target> {
        self.root_target.upgrade()
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    /// Only the value changes; the caller re-sorts the group list.
    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    // -- Group links --

    pub(crate) fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<GroupId>) {
        self.parent = parent;
    }

    pub(crate) fn children(&self) -> &IndexSet<GroupId> {
        &self.children
    }

    pub(crate) fn add_child(&mut self, child: GroupId) {
        self.children.insert(child);
    }

    pub(crate) fn remove_child(&mut self, child: GroupId) -> bool {
        self.children.shift_remove(&child)
    }

    // -- Membership --

    pub(crate) fn members(&self) -> &[Member] {
        &self.members
    }

    pub(crate) fn member_ids(&self) -> Vec<TargetId> {
        self.members.iter().map(|m| m.id).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.members.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Live member targets in pre-order.
    pub(crate) fn targets(&self) -> Vec<Target> {
        self.members
            .iter()
            .filter_map(|m| m.target.upgrade())
            .collect()
    }

    /// `id` and every member listed below it.
    ///
    /// Works from the recorded depths alone, so it still answers for a
    /// target that has already been dropped. Depths only count members, so a
    /// sibling's descendant reached through an unregistered target is never
    /// mistaken for part of this subtree.
    pub(crate) fn subtree_of(&self, id: TargetId) -> Vec<TargetId> {
        let Some(start) = self.members.iter().position(|m| m.id == id) else {
            return vec![id];
        };
        let depth = self.members[start].depth;
        std::iter::once(id)
            .chain(
                self.members[start + 1..]
                    .iter()
                    .take_while(|m| m.depth > depth)
                    .map(|m| m.id),
            )
            .collect()
    }

    /// Replace the membership list and rebuild the calculation order.
    ///
    /// Returns the previous members that are missing from the new list.
    pub(crate) fn set_members(&mut self, members: Vec<Member>) -> Vec<TargetId> {
        let reached: HashSet<TargetId> = members.iter().map(|m| m.id).collect();
        let departed = self
            .members
            .iter()
            .filter(|m| !reached.contains(&m.id))
            .map(|m| m.id)
            .collect();

        self.members = members;
        self.rebuild_calculation_order();
        departed
    }

    // -- Calculation order --

    pub(crate) fn calculation_order(&self) -> &[Behavior] {
        &self.calculation_order
    }

    pub(crate) fn rebuild_calculation_order(&mut self) {
        self.calculation_order = calculation_order(&self.targets());
        self.dirty = true;
        tracing::trace!(
            group = ?self.id,
            targets = self.members.len(),
            behaviors = self.calculation_order.len(),
            "calculation order rebuilt"
        );
    }

    // -- Dirty tracking --

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear the dirty flag, returning its previous value.
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

/// Two-pass calculation order for `targets` (given in traversal order).
///
/// The first pass walks the targets and emits, per target, one follow-parent
/// behavior followed by its other normal behaviors in attachment order. The
/// second pass emits every delay behavior the same way.
///
/// The follow-parent behavior that runs is the auto-attached one if the
/// target has it, otherwise the first one attached. The rest never run.
pub(crate) fn calculation_order(targets: &[Target]) -> Vec<Behavior> {
    let attached: Vec<Vec<Behavior>> = targets.iter().map(Target::behaviors).collect();
    let mut order = Vec::new();

    for behaviors in &attached {
        order.extend(active_follow_parent(behaviors).cloned());
        order.extend(
            behaviors
                .iter()
                .filter(|b| !b.follows_parent() && b.kind() == LayoutKind::Normal)
                .cloned(),
        );
    }

    for behaviors in &attached {
        order.extend(
            behaviors
                .iter()
                .filter(|b| !b.follows_parent() && b.kind() == LayoutKind::Delay)
                .cloned(),
        );
    }

    order
}

fn active_follow_parent(behaviors: &[Behavior]) -> Option<&Behavior> {
    behaviors
        .iter()
        .find(|b| b.is_auto_attached())
        .or_else(|| behaviors.iter().find(|b| b.follows_parent()))
}
