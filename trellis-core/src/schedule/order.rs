//! Ordering Utilities
//!
//! Two kinds of order matter to the scheduler:
//!
//! 1. **Group order.** The manager's group list is sorted by priority,
//!    highest first. Ties keep creation order, which is also the order of
//!    [`GroupId`]s, so the comparison is total and re-sorting is idempotent
//!    no matter how often priorities change.
//!
//! 2. **Traversal order.** A group's members are listed in pre-order over the
//!    live target tree. The walk starts at the group root, passes through
//!    unregistered targets, and does not descend into targets owned by other
//!    groups: those subtrees are the other groups' territory. The unregistered
//!    targets it passes through are reported too, since moving one of them
//!    moves members.

use std::cmp::Ordering;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::group::{Group, GroupId, Member};
use crate::scene::{Target, TargetId};

/// Ordering of two groups in the manager's list.
pub(crate) fn priority_order(a: (i32, GroupId), b: (i32, GroupId)) -> Ordering {
    b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1))
}

fn key(group: &Group) -> (i32, GroupId) {
    (group.priority(), group.id())
}

/// Insert `group` at its sorted position.
pub(crate) fn insert_sorted(groups: &mut IndexMap<GroupId, Group>, group: Group) {
    let new_key = key(&group);
    let index = groups
        .values()
        .position(|existing| priority_order(new_key, key(existing)) == Ordering::Less)
        .unwrap_or(groups.len());
    groups.shift_insert(index, group.id(), group);
}

/// Restore the sort after a priority change.
pub(crate) fn sort_groups(groups: &mut IndexMap<GroupId, Group>) {
    groups.sort_by(|_, a, _, b| priority_order(key(a), key(b)));
}

/// First adjacent pair that is out of order, if any.
pub(crate) fn first_unsorted(groups: &IndexMap<GroupId, Group>) -> Option<(GroupId, GroupId)> {
    groups
        .values()
        .zip(groups.values().skip(1))
        .find(|(a, b)| priority_order(key(a), key(b)) == Ordering::Greater)
        .map(|(a, b)| (a.id(), b.id()))
}

/// Priority for a group nested under a group with `parent` priority, so that
/// it ticks right after its parent.
pub(crate) fn child_priority(parent: i32) -> i32 {
    parent.saturating_sub(1)
}

/// Result of a territory walk.
#[derive(Debug, Default)]
pub(crate) struct Territory {
    /// Targets owned by the group, in pre-order.
    pub(crate) members: Vec<Member>,
    /// Unregistered targets the walk passed through, in pre-order.
    pub(crate) passages: Vec<Target>,
}

impl Territory {
    pub(crate) fn member_ids(&self) -> Vec<TargetId> {
        self.members.iter().map(|m| m.id).collect()
    }
}

/// Pre-order walk of `root`'s subtree collecting the targets owned by `group`.
///
/// `root` itself is always walked into; any other target owned by a
/// different group stops the walk along that branch. A member's depth is the
/// number of members above it.
pub(crate) fn territory<F>(root: &Target, group: GroupId, owner_of: F) -> Territory
where
    F: Fn(TargetId) -> Option<GroupId>,
{
    let mut found = Territory::default();
    let mut stack: SmallVec<[(Target, usize, bool); 16]> = SmallVec::new();
    stack.push((root.clone(), 0, true));

    while let Some((target, depth, is_root)) = stack.pop() {
        let below = match owner_of(target.id()) {
            Some(owner) if owner == group => {
                found.members.push(Member {
                    id: target.id(),
                    target: target.downgrade(),
                    depth,
                });
                depth + 1
            }
            Some(_) if !is_root => continue,
            Some(_) => depth,
            None => {
                if !is_root {
                    found.passages.push(target.clone());
                }
                depth
            }
        };
        stack.extend(
            target
                .children()
                .into_iter()
                .rev()
                .map(|child| (child, below, false)),
        );
    }

    found
}

/// Group of the nearest registered ancestor of `target`.
pub(crate) fn nearest_registered_ancestor<F>(target: &Target, owner_of: F) -> Option<GroupId>
where
    F: Fn(TargetId) -> Option<GroupId>,
{
    target
        .ancestors()
        .find_map(|ancestor| owner_of(ancestor.id()))
}
