//! Group Registry
//!
//! The registry is the manager's state: every live group, sorted for ticking,
//! and a side table mapping each tracked target to the group that owns it.
//! The side table is the single source of truth for ownership; group member
//! lists are derived from it together with the live target tree.
//!
//! # Reactions
//!
//! Each [`SceneEvent`] kind has one reaction. Reactions run with the
//! registry exclusively borrowed and may mutate targets (attaching a
//! follow-parent behavior, for instance). Notifications caused by those
//! mutations queue up and are applied afterwards, one at a time.
//!
//! # Reconciling
//!
//! Most structural reactions end in a reconcile: recompute the
//! group's territory from the live tree, then re-home every member that fell
//! out of it. A re-homed target joins the group of its nearest registered
//! ancestor, or becomes the root of a fresh group that inherits the old
//! group's priority.
//!
//! A territory can pass through unregistered targets. The registry listens
//! for those being reparented too (see [`PassageSubscription`]), so moving
//! one reconciles the group it belongs to right away.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use super::event::{
    BehaviorSubscriptions, EventSink, PassageSubscription, SceneEvent, TargetSubscriptions,
};
use super::group::{Group, GroupId};
use super::order;
use crate::config::ManagerConfig;
use crate::error::{InvariantViolation, ManagerError};
use crate::scene::{
    Behavior, BehaviorChange, BehaviorId, BehaviorsChanged, ParentChanged, Target, TargetId,
    WeakBehavior, WeakTarget,
};
use crate::snapshot::{GroupSnapshot, ManagerSnapshot};

/// Where a newly entered target should be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// Join the nearest registered ancestor's group, or start a group with
    /// this priority.
    Priority(i32),
    /// Start a group nested under the given group.
    Under(GroupId),
}

struct Membership {
    target: WeakTarget,
    group: GroupId,
    subscriptions: TargetSubscriptions,
    /// Watched behaviors attached to this target.
    behaviors: HashSet<BehaviorId>,
}

/// An unregistered target inside a group's territory.
struct Passage {
    target: WeakTarget,
    group: GroupId,
    subscription: PassageSubscription,
}

struct Watch {
    behavior: WeakBehavior,
    target: TargetId,
    subscriptions: BehaviorSubscriptions,
}

pub(crate) struct Registry {
    config: ManagerConfig,
    groups: IndexMap<GroupId, Group>,
    owners: HashMap<TargetId, Membership>,
    watched: HashMap<BehaviorId, Watch>,
    passages: HashMap<TargetId, Passage>,
    sink: EventSink,
}

impl Registry {
    pub(crate) fn new(config: ManagerConfig, sink: EventSink) -> Self {
        Self {
            config,
            groups: IndexMap::new(),
            owners: HashMap::new(),
            watched: HashMap::new(),
            passages: HashMap::new(),
            sink,
        }
    }

    // -- Queries --

    pub(crate) fn owner_of(&self, id: TargetId) -> Option<GroupId> {
        self.owners.get(&id).map(|m| m.group)
    }

    fn tracked(&self, id: TargetId) -> Option<Target> {
        self.owners.get(&id).and_then(|m| m.target.upgrade())
    }

    pub(crate) fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.get(&id)
    }

    /// Group IDs in tick order.
    pub(crate) fn group_ids(&self) -> Vec<GroupId> {
        self.groups.keys().copied().collect()
    }

    pub(crate) fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub(crate) fn target_count(&self) -> usize {
        self.owners.len()
    }

    // -- Structural API --

    /// Bring `target` (and its unregistered subtree) under scheduling.
    pub(crate) fn entry(
        &mut self,
        target: &Target,
        placement: Placement,
    ) -> Result<GroupId, ManagerError> {
        if let Some(group) = self.owner_of(target.id()) {
            return Ok(group);
        }
        if target.is_disposed() {
            return Err(ManagerError::TargetDisposed(target.id()));
        }

        let group = match placement {
            Placement::Priority(priority) => {
                match order::nearest_registered_ancestor(target, |id| self.owner_of(id)) {
                    Some(group) => group,
                    None => self.create_group(target, priority, None),
                }
            }
            Placement::Under(parent) => {
                let parent_priority = self
                    .groups
                    .get(&parent)
                    .map(Group::priority)
                    .ok_or(ManagerError::GroupDestroyed(parent))?;
                self.create_group(target, order::child_priority(parent_priority), Some(parent))
            }
        };

        self.add_target(group, target);
        if let Placement::Under(_) = placement {
            // The new root may sit inside another group's territory.
            self.reconcile_host(target, group);
        }
        Ok(group)
    }

    /// Stop scheduling `id`.
    ///
    /// A group root takes its whole group with it; any other member takes its
    /// registered subtree.
    pub(crate) fn exit(&mut self, id: TargetId) {
        let Some(group) = self.owner_of(id) else {
            return;
        };
        if self.is_root(group, id) {
            self.destroy_group(group);
            return;
        }

        // Catch up with any hierarchy change we were not told about first.
        if self.tracked(id).is_some() {
            self.reconcile(group);
        }

        let Some(group) = self.owner_of(id) else {
            return;
        };
        if self.is_root(group, id) {
            self.destroy_group(group);
        } else {
            self.remove_target(group, id);
        }
    }

    pub(crate) fn set_priority(&mut self, id: GroupId, priority: i32) -> Result<(), ManagerError> {
        let group = self
            .groups
            .get_mut(&id)
            .ok_or(ManagerError::GroupDestroyed(id))?;
        if group.priority() != priority {
            group.set_priority(priority);
            order::sort_groups(&mut self.groups);
            tracing::debug!(group = ?id, priority, "group priority changed");
        }
        Ok(())
    }

    pub(crate) fn mark_dirty(&mut self, id: GroupId) {
        if let Some(group) = self.groups.get_mut(&id) {
            group.mark_dirty();
        }
    }

    /// Take the calculation order of `id` for a tick.
    ///
    /// Returns `None` if the group is gone, or if `skip_clean` is set and the
    /// group has no pending changes.
    pub(crate) fn begin_tick(&mut self, id: GroupId, skip_clean: bool) -> Option<Vec<Behavior>> {
        let group = self.groups.get_mut(&id)?;
        let dirty = group.take_dirty();
        if skip_clean && !dirty {
            return None;
        }
        Some(group.calculation_order().to_vec())
    }

    // -- Reactions --

    pub(crate) fn react(&mut self, event: SceneEvent) {
        match event {
            SceneEvent::TargetDisposed(id) => self.exit(id),
            SceneEvent::ParentChanged(event) => self.on_parent_changed(event),
            SceneEvent::PassageMoved(id) => self.on_passage_moved(id),
            SceneEvent::BehaviorsChanged(event) => self.on_behaviors_changed(event),
            SceneEvent::BehaviorChanged(id) | SceneEvent::OperationPriorityChanged(id) => {
                self.on_behavior_changed(id)
            }
            SceneEvent::BehaviorDisposed(id) => self.unwatch(id),
        }
    }

    fn on_parent_changed(&mut self, event: ParentChanged) {
        let Some(group) = self.owner_of(event.target) else {
            return;
        };
        let Some(target) = self.tracked(event.target) else {
            return;
        };

        if self.is_root(group, event.target) {
            // Groups nested explicitly under another group keep their identity;
            // any other root that lands in a foreign territory is absorbed.
            let nested = self.groups.get(&group).is_some_and(|g| g.parent().is_some());
            match order::nearest_registered_ancestor(&target, |id| self.owner_of(id)) {
                Some(into) if into != group && !nested => self.merge(group, into),
                _ => self.reconcile(group),
            }
        } else {
            self.reconcile(group);
        }
    }

    fn on_passage_moved(&mut self, id: TargetId) {
        if let Some(group) = self.passages.get(&id).map(|p| p.group) {
            tracing::trace!(target = ?id, group = ?group, "unregistered target moved");
            self.reconcile(group);
        }
    }

    fn on_behaviors_changed(&mut self, event: BehaviorsChanged) {
        let Some(group) = self.owner_of(event.target) else {
            return;
        };

        match event.change {
            BehaviorChange::Added => {
                let added = self.tracked(event.target).and_then(|target| {
                    target
                        .behaviors()
                        .into_iter()
                        .find(|b| b.id() == event.behavior)
                });
                if let Some(behavior) = added {
                    self.watch(event.target, &behavior);
                }
            }
            BehaviorChange::Removed => {
                self.unwatch(event.behavior);
                if let Some(target) = self.tracked(event.target) {
                    self.ensure_follow_parent(&target);
                }
            }
        }

        if let Some(group) = self.groups.get_mut(&group) {
            group.rebuild_calculation_order();
        }
    }

    fn on_behavior_changed(&mut self, id: BehaviorId) {
        let Some(target) = self.watched.get(&id).map(|w| w.target) else {
            return;
        };
        if let Some(group) = self.owner_of(target) {
            tracing::trace!(behavior = ?id, group = ?group, "behavior changed");
            self.mark_dirty(group);
        }
    }

    // -- Group lifecycle --

    fn create_group(&mut self, root: &Target, priority: i32, parent: Option<GroupId>) -> GroupId {
        let mut group = Group::new(root, priority);
        let id = group.id();
        if let Some(parent) = parent {
            group.set_parent(Some(parent));
            if let Some(parent) = self.groups.get_mut(&parent) {
                parent.add_child(id);
            }
        }
        order::insert_sorted(&mut self.groups, group);
        tracing::debug!(
            group = ?id,
            root = ?root.id(),
            priority,
            parent = ?parent,
            "group created"
        );
        id
    }

    /// Deregister every member of `id`, then drop the group.
    fn destroy_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.get(&id) else {
            return;
        };
        let root = group.root_target();
        let mut members = group.member_ids();
        let listed: HashSet<TargetId> = members.iter().copied().collect();
        members.extend(
            self.owners
                .iter()
                .filter(|(target, m)| m.group == id && !listed.contains(*target))
                .map(|(target, _)| *target),
        );
        for target in members {
            self.deregister(target);
        }
        self.remove_group(id);

        // The group's targets are now unregistered ground of whatever
        // territory surrounds them.
        if let Some(root) = root {
            self.reconcile_host(&root, id);
        }
    }

    /// Drop the group record and unlink it. Linked child groups become
    /// independent and keep their priorities.
    fn remove_group(&mut self, id: GroupId) {
        let Some(group) = self.groups.shift_remove(&id) else {
            return;
        };
        if let Some(parent) = group.parent() {
            if let Some(parent) = self.groups.get_mut(&parent) {
                parent.remove_child(id);
            }
        }
        for child in group.children() {
            if let Some(child) = self.groups.get_mut(child) {
                child.set_parent(None);
            }
        }
        let passages: Vec<TargetId> = self
            .passages
            .iter()
            .filter(|(_, p)| p.group == id)
            .map(|(target, _)| *target)
            .collect();
        for target in passages {
            self.drop_passage(target);
        }
        tracing::debug!(group = ?id, "group destroyed");
    }

    /// Move every member of `from` into `into` and drop `from`.
    fn merge(&mut self, from: GroupId, into: GroupId) {
        let Some(group) = self.groups.get(&from) else {
            return;
        };
        let members = group.member_ids();
        tracing::debug!(from = ?from, into = ?into, targets = members.len(), "group merged");
        self.reassign(&members, into);
        self.remove_group(from);
        self.reconcile(into);
    }

    // -- Membership --

    /// Register `target`'s unregistered subtree into `group` and refresh it.
    pub(crate) fn add_target(&mut self, group: GroupId, target: &Target) {
        let mut stack = vec![target.clone()];
        while let Some(node) = stack.pop() {
            if node.is_disposed() {
                continue;
            }
            match self.owner_of(node.id()) {
                None => self.register(&node, group),
                Some(owner) if owner != group => continue,
                Some(_) => {}
            }
            stack.extend(node.children().into_iter().rev());
        }
        self.reconcile(group);
    }

    /// Deregister `id` and its registered subtree from `group`.
    pub(crate) fn remove_target(&mut self, group: GroupId, id: TargetId) {
        let Some(members) = self.groups.get(&group).map(|g| g.subtree_of(id)) else {
            return;
        };
        for target in members {
            self.deregister(target);
        }
        self.reconcile(group);
    }

    fn register(&mut self, target: &Target, group: GroupId) {
        self.drop_passage(target.id());
        let subscriptions = TargetSubscriptions::subscribe(target, &self.sink);
        self.owners.insert(
            target.id(),
            Membership {
                target: target.downgrade(),
                group,
                subscriptions,
                behaviors: HashSet::new(),
            },
        );
        self.ensure_follow_parent(target);
        for behavior in target.behaviors() {
            self.watch(target.id(), &behavior);
        }
        tracing::trace!(target = ?target.id(), group = ?group, "target registered");
    }

    fn deregister(&mut self, id: TargetId) {
        let Some(membership) = self.owners.remove(&id) else {
            return;
        };
        if let Some(target) = membership.target.upgrade() {
            membership.subscriptions.cancel(&target);
        }
        for behavior in membership.behaviors {
            self.unwatch(behavior);
        }
        tracing::trace!(target = ?id, group = ?membership.group, "target deregistered");
    }

    fn reassign(&mut self, targets: &[TargetId], group: GroupId) {
        for target in targets {
            if let Some(membership) = self.owners.get_mut(target) {
                membership.group = group;
            }
        }
    }

    fn ensure_follow_parent(&mut self, target: &Target) {
        if target.is_disposed() || target.behaviors().iter().any(Behavior::follows_parent) {
            return;
        }
        let follow = Behavior::auto_follow_parent();
        match target.insert_behavior(0, follow.clone()) {
            Ok(()) => self.watch(target.id(), &follow),
            Err(err) => tracing::warn!(
                target = ?target.id(),
                error = %err,
                "could not attach follow-parent behavior"
            ),
        }
    }

    fn watch(&mut self, target: TargetId, behavior: &Behavior) {
        if self.watched.contains_key(&behavior.id()) {
            return;
        }
        if let Some(membership) = self.owners.get_mut(&target) {
            membership.behaviors.insert(behavior.id());
        }
        let subscriptions = BehaviorSubscriptions::subscribe(behavior, &self.sink);
        self.watched.insert(
            behavior.id(),
            Watch {
                behavior: behavior.downgrade(),
                target,
                subscriptions,
            },
        );
    }

    fn unwatch(&mut self, id: BehaviorId) {
        let Some(watch) = self.watched.remove(&id) else {
            return;
        };
        if let Some(membership) = self.owners.get_mut(&watch.target) {
            membership.behaviors.remove(&id);
        }
        if let Some(behavior) = watch.behavior.upgrade() {
            watch.subscriptions.cancel(&behavior);
        }
    }

    /// Listen on exactly `through` as `group`'s passages.
    fn sync_passages(&mut self, group: GroupId, through: Vec<Target>) {
        let keep: HashSet<TargetId> = through.iter().map(Target::id).collect();
        let stale: Vec<TargetId> = self
            .passages
            .iter()
            .filter(|(target, p)| p.group == group && !keep.contains(*target))
            .map(|(target, _)| *target)
            .collect();
        for target in stale {
            self.drop_passage(target);
        }

        for target in through {
            if let Some(passage) = self.passages.get_mut(&target.id()) {
                passage.group = group;
                continue;
            }
            let subscription = PassageSubscription::subscribe(&target, &self.sink);
            self.passages.insert(
                target.id(),
                Passage {
                    target: target.downgrade(),
                    group,
                    subscription,
                },
            );
        }
    }

    fn drop_passage(&mut self, id: TargetId) {
        if let Some(passage) = self.passages.remove(&id) {
            if let Some(target) = passage.target.upgrade() {
                passage.subscription.cancel(&target);
            }
        }
    }

    // -- Reconciling --

    fn is_root(&self, group: GroupId, target: TargetId) -> bool {
        self.groups.get(&group).is_some_and(|g| g.root() == target)
    }

    /// Reconcile the group whose territory surrounds `root`, unless that is
    /// `own`.
    fn reconcile_host(&mut self, root: &Target, own: GroupId) {
        match order::nearest_registered_ancestor(root, |t| self.owner_of(t)) {
            Some(host) if host != own => self.reconcile(host),
            _ => {}
        }
    }

    /// Recompute `id`'s members from the live tree and re-home the strays.
    fn reconcile(&mut self, id: GroupId) {
        let Some(group) = self.groups.get(&id) else {
            return;
        };
        let walk = match group.root_target() {
            Some(root) => order::territory(&root, id, |target| self.owner_of(target)),
            None => order::Territory::default(),
        };
        self.sync_passages(id, walk.passages);
        let Some(group) = self.groups.get_mut(&id) else {
            return;
        };
        let mut strays = group.set_members(walk.members);

        // Owned targets the walk never reached, e.g. below an unregistered
        // node that moved without telling anyone.
        let Some(group) = self.groups.get(&id) else {
            return;
        };
        let listed: HashSet<TargetId> = group
            .member_ids()
            .into_iter()
            .chain(strays.iter().copied())
            .collect();
        let mut unlisted: Vec<TargetId> = self
            .owners
            .iter()
            .filter(|(target, m)| m.group == id && !listed.contains(*target))
            .map(|(target, _)| *target)
            .collect();
        unlisted.sort();
        strays.extend(unlisted);

        for target in strays {
            if self.owner_of(target) == Some(id) {
                self.rehome(target, id);
            }
        }

        if self.groups.get(&id).is_some_and(Group::is_empty) {
            self.destroy_group(id);
        }
    }

    /// Move `id` and its registered subtree out of `from`.
    fn rehome(&mut self, id: TargetId, from: GroupId) {
        let Some(target) = self.tracked(id) else {
            self.deregister(id);
            return;
        };

        let moving = order::territory(&target, from, |t| self.owner_of(t)).member_ids();
        let into = match order::nearest_registered_ancestor(&target, |t| self.owner_of(t)) {
            Some(into) if into != from => into,
            _ => {
                let priority = self
                    .groups
                    .get(&from)
                    .map_or(self.config.default_priority, Group::priority);
                self.create_group(&target, priority, None)
            }
        };

        tracing::debug!(
            target = ?id,
            from = ?from,
            into = ?into,
            moved = moving.len(),
            "targets changed group"
        );
        self.reassign(&moving, into);
        self.reconcile(into);
    }

    // -- Diagnostics --

    pub(crate) fn verify(&self) -> Result<(), InvariantViolation> {
        let mut listed: HashMap<TargetId, GroupId> = HashMap::new();

        for (id, group) in &self.groups {
            if group.is_empty() {
                return Err(InvariantViolation::EmptyGroup(*id));
            }
            for member in group.members() {
                if let Some(first) = listed.insert(member.id, *id) {
                    return Err(InvariantViolation::TargetInTwoGroups {
                        target: member.id,
                        first,
                        second: *id,
                    });
                }
                let owner = self.owner_of(member.id);
                if owner != Some(*id) {
                    return Err(InvariantViolation::StaleOwner {
                        target: member.id,
                        owner,
                        listed: Some(*id),
                    });
                }
            }

            if let Some(root) = group.root_target() {
                let live = order::territory(&root, *id, |t| self.owner_of(t));
                if live.member_ids() != group.member_ids() {
                    return Err(InvariantViolation::StaleMembership(*id));
                }
            }

            if let Some(parent) = group.parent() {
                let linked = self
                    .groups
                    .get(&parent)
                    .is_some_and(|p| p.children().contains(id));
                if !linked {
                    return Err(InvariantViolation::BrokenGroupLink { parent, child: *id });
                }
            }
            for child in group.children() {
                let linked = self
                    .groups
                    .get(child)
                    .is_some_and(|c| c.parent() == Some(*id));
                if !linked {
                    return Err(InvariantViolation::BrokenGroupLink {
                        parent: *id,
                        child: *child,
                    });
                }
            }
        }

        for (id, membership) in &self.owners {
            if !listed.contains_key(id) {
                return Err(InvariantViolation::StaleOwner {
                    target: *id,
                    owner: Some(membership.group),
                    listed: None,
                });
            }
            let Some(target) = membership.target.upgrade() else {
                continue;
            };
            let has_follow = target.behaviors().iter().any(Behavior::follows_parent);
            if !target.is_disposed() && !has_follow {
                return Err(InvariantViolation::MissingFollowParent(*id));
            }
        }

        if let Some((before, after)) = order::first_unsorted(&self.groups) {
            return Err(InvariantViolation::UnsortedGroups { before, after });
        }
        Ok(())
    }

    /// Run [`verify`](Self::verify) if configured to.
    pub(crate) fn check_invariants(&self) {
        if !self.config.check_invariants {
            return;
        }
        if let Err(violation) = self.verify() {
            tracing::error!(%violation, "scheduling invariant violated");
            debug_assert!(false, "scheduling invariant violated: {violation}");
        }
    }

    /// Forget every group and cancel every subscription.
    pub(crate) fn clear(&mut self) {
        let targets: Vec<TargetId> = self.owners.keys().copied().collect();
        for target in targets {
            self.deregister(target);
        }
        let behaviors: Vec<BehaviorId> = self.watched.keys().copied().collect();
        for behavior in behaviors {
            self.unwatch(behavior);
        }
        let passages: Vec<TargetId> = self.passages.keys().copied().collect();
        for target in passages {
            self.drop_passage(target);
        }
        self.groups.clear();
    }

    pub(crate) fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            groups: self.groups.values().map(GroupSnapshot::capture).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{layout_fn, LayoutKind};

    // These drive the registry directly. Its sink is detached, so scene
    // notifications go nowhere and each reaction is invoked by hand.

    fn registry() -> Registry {
        let config = ManagerConfig {
            check_invariants: false,
            ..ManagerConfig::default()
        };
        Registry::new(config, EventSink::detached())
    }

    fn tree(names: &[&str]) -> Vec<Target> {
        let targets: Vec<Target> = names.iter().map(|n| Target::new(*n)).collect();
        for pair in targets.windows(2) {
            pair[0].add_child(&pair[1]).unwrap();
        }
        targets
    }

    fn member_names(registry: &Registry, group: GroupId) -> Vec<String> {
        registry
            .group(group)
            .unwrap()
            .targets()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    fn parent_changed(target: &Target) -> SceneEvent {
        SceneEvent::ParentChanged(ParentChanged {
            target: target.id(),
            previous: None,
            current: target.parent().map(|p| p.id()),
        })
    }

    #[test]
    fn entry_registers_subtree_in_pre_order() {
        let mut registry = registry();
        let chain = tree(&["root", "mid", "leaf"]);
        let extra = Target::new("extra");
        chain[0].add_child(&extra).unwrap();

        let group = registry.entry(&chain[0], Placement::Priority(0)).unwrap();
        assert_eq!(member_names(&registry, group), ["root", "mid", "leaf", "extra"]);
        assert_eq!(registry.target_count(), 4);
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn entry_is_idempotent() {
        let mut registry = registry();
        let target = Target::new("t");

        let first = registry.entry(&target, Placement::Priority(0)).unwrap();
        let second = registry.entry(&target, Placement::Priority(7)).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.group_count(), 1);
        assert_eq!(
            target.behaviors().iter().filter(|b| b.follows_parent()).count(),
            1
        );
    }

    #[test]
    fn entry_under_registered_ancestor_joins_its_group() {
        let mut registry = registry();
        let root = Target::new("root");
        let group = registry.entry(&root, Placement::Priority(0)).unwrap();

        let late = Target::new("late");
        root.add_child(&late).unwrap();
        let joined = registry.entry(&late, Placement::Priority(9)).unwrap();

        assert_eq!(joined, group);
        assert_eq!(member_names(&registry, group), ["root", "late"]);
    }

    #[test]
    fn entry_rejects_disposed_targets() {
        let mut registry = registry();
        let target = Target::new("t");
        target.dispose();
        assert_eq!(
            registry.entry(&target, Placement::Priority(0)),
            Err(ManagerError::TargetDisposed(target.id()))
        );
    }

    #[test]
    fn nested_entry_links_groups() {
        let mut registry = registry();
        let parent = Target::new("parent");
        let child = Target::new("child");
        parent.add_child(&child).unwrap();

        let outer = registry.entry(&parent, Placement::Priority(4)).unwrap();
        // `child` is already in `outer`, so nest a fresh target instead.
        let inner_root = Target::new("inner");
        child.add_child(&inner_root).unwrap();
        let inner = registry.entry(&inner_root, Placement::Under(outer)).unwrap();

        assert_ne!(inner, outer);
        assert_eq!(registry.group(inner).unwrap().priority(), 3);
        assert_eq!(registry.group(inner).unwrap().parent(), Some(outer));
        assert!(registry.group(outer).unwrap().children().contains(&inner));
        assert_eq!(member_names(&registry, outer), ["parent", "child"]);
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn exit_member_removes_its_subtree_only() {
        let mut registry = registry();
        let chain = tree(&["root", "a", "a1"]);
        let b = Target::new("b");
        chain[0].add_child(&b).unwrap();
        let group = registry.entry(&chain[0], Placement::Priority(0)).unwrap();

        registry.exit(chain[1].id());
        assert_eq!(member_names(&registry, group), ["root", "b"]);
        assert!(registry.owner_of(chain[2].id()).is_none());

        // Second exit is a no-op.
        registry.exit(chain[1].id());
        assert_eq!(registry.target_count(), 2);
    }

    /// root -> [a, gap -> deep], where `gap` is attached after entry and so
    /// stays unregistered while `deep` joins root's group.
    fn tree_with_gap(registry: &mut Registry) -> (GroupId, Target, Target, Target, Target) {
        let root = Target::new("root");
        let a = Target::new("a");
        root.add_child(&a).unwrap();
        let group = registry.entry(&root, Placement::Priority(2)).unwrap();

        let gap = Target::new("gap");
        let deep = Target::new("deep");
        root.add_child(&gap).unwrap();
        gap.add_child(&deep).unwrap();
        assert_eq!(registry.entry(&deep, Placement::Priority(0)).unwrap(), group);
        (group, root, a, gap, deep)
    }

    #[test]
    fn exit_member_spares_sibling_behind_unregistered_target() {
        let mut registry = registry();
        let (group, _root, a, _gap, deep) = tree_with_gap(&mut registry);
        assert_eq!(member_names(&registry, group), ["root", "a", "deep"]);

        registry.exit(a.id());
        assert_eq!(member_names(&registry, group), ["root", "deep"]);
        assert_eq!(registry.owner_of(deep.id()), Some(group));
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn moving_unregistered_target_reconciles_group() {
        let mut registry = registry();
        let (group, _root, _a, gap, deep) = tree_with_gap(&mut registry);
        assert_eq!(gap.on_parent_changed().len(), 1);
        assert!(registry.owner_of(gap.id()).is_none());

        // The sink is detached: the registry has not heard of the move yet.
        gap.set_parent(None).unwrap();
        assert_eq!(
            registry.verify(),
            Err(InvariantViolation::StaleMembership(group))
        );

        registry.react(SceneEvent::PassageMoved(gap.id()));
        assert_eq!(member_names(&registry, group), ["root", "a"]);
        let split = registry.owner_of(deep.id()).unwrap();
        assert_ne!(split, group);
        assert_eq!(registry.group(split).unwrap().priority(), 2);
        assert_eq!(member_names(&registry, split), ["deep"]);
        // `gap` is outside every territory now.
        assert!(gap.on_parent_changed().is_empty());
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn entering_an_unregistered_target_stops_listening_to_it() {
        let mut registry = registry();
        let (group, _root, _a, gap, _deep) = tree_with_gap(&mut registry);

        registry.entry(&gap, Placement::Priority(0)).unwrap();
        assert_eq!(registry.owner_of(gap.id()), Some(group));
        // Only the member subscription is left.
        assert_eq!(gap.on_parent_changed().len(), 1);
        assert_eq!(member_names(&registry, group), ["root", "a", "gap", "deep"]);
    }

    #[test]
    fn nested_group_inside_territory_refreshes_host() {
        let mut registry = registry();
        let (host, _root, _a, gap, deep) = tree_with_gap(&mut registry);

        let nested = registry.entry(&gap, Placement::Under(host)).unwrap();
        assert_eq!(member_names(&registry, host), ["root", "a"]);
        // `deep` followed its nearest registered ancestor.
        assert_eq!(member_names(&registry, nested), ["gap", "deep"]);
        assert_eq!(registry.owner_of(deep.id()), Some(nested));
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn deregister_releases_every_watched_behavior() {
        let mut registry = registry();
        let target = Target::new("t");
        let user = Behavior::new(layout_fn(|_| Ok(())));
        target.add_behavior(user.clone()).unwrap();
        registry.entry(&target, Placement::Priority(0)).unwrap();
        assert_eq!(registry.watched.len(), 2);
        assert_eq!(registry.owners[&target.id()].behaviors.len(), 2);

        registry.exit(target.id());
        assert!(registry.watched.is_empty());
        assert!(user.on_changed().is_empty());
    }

    #[test]
    fn exit_root_destroys_group_and_unlinks() {
        let mut registry = registry();
        let outer_root = Target::new("outer");
        let inner_root = Target::new("inner");
        let outer = registry.entry(&outer_root, Placement::Priority(0)).unwrap();
        let inner = registry.entry(&inner_root, Placement::Under(outer)).unwrap();

        registry.exit(outer_root.id());
        assert!(registry.group(outer).is_none());
        let inner_group = registry.group(inner).unwrap();
        assert_eq!(inner_group.parent(), None);
        assert_eq!(inner_group.priority(), -1);
        assert!(outer_root.on_parent_changed().is_empty());
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn reparent_out_of_group_keeps_priority() {
        let mut registry = registry();
        let chain = tree(&["root", "branch", "leaf"]);
        let group = registry.entry(&chain[0], Placement::Priority(6)).unwrap();

        chain[1].set_parent(None).unwrap();
        registry.react(parent_changed(&chain[1]));

        let moved = registry.owner_of(chain[1].id()).unwrap();
        assert_ne!(moved, group);
        assert_eq!(registry.group(moved).unwrap().priority(), 6);
        assert_eq!(member_names(&registry, moved), ["branch", "leaf"]);
        assert_eq!(member_names(&registry, group), ["root"]);
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn reparent_within_group_reorders() {
        let mut registry = registry();
        let root = Target::new("root");
        let a = Target::new("a");
        let b = Target::new("b");
        root.add_child(&a).unwrap();
        root.add_child(&b).unwrap();
        let group = registry.entry(&root, Placement::Priority(0)).unwrap();

        a.set_parent(Some(&b)).unwrap();
        registry.react(parent_changed(&a));

        assert_eq!(registry.group_count(), 1);
        assert_eq!(member_names(&registry, group), ["root", "b", "a"]);
    }

    #[test]
    fn reparent_into_other_group_migrates() {
        let mut registry = registry();
        let left = tree(&["left", "l1", "l2"]);
        let right = Target::new("right");
        let left_group = registry.entry(&left[0], Placement::Priority(0)).unwrap();
        let right_group = registry.entry(&right, Placement::Priority(0)).unwrap();

        left[1].set_parent(Some(&right)).unwrap();
        registry.react(parent_changed(&left[1]));

        assert_eq!(member_names(&registry, left_group), ["left"]);
        assert_eq!(member_names(&registry, right_group), ["right", "l1", "l2"]);
    }

    #[test]
    fn reparented_root_merges_into_destination() {
        let mut registry = registry();
        let host = Target::new("host");
        let guest = tree(&["guest", "g1"]);
        let host_group = registry.entry(&host, Placement::Priority(0)).unwrap();
        let guest_group = registry.entry(&guest[0], Placement::Priority(3)).unwrap();

        guest[0].set_parent(Some(&host)).unwrap();
        registry.react(parent_changed(&guest[0]));

        assert!(registry.group(guest_group).is_none());
        assert_eq!(member_names(&registry, host_group), ["host", "guest", "g1"]);
        assert!(registry.verify().is_ok());
    }

    #[test]
    fn behavior_changes_rebuild_order() {
        let mut registry = registry();
        let target = Target::new("t");
        let group = registry.entry(&target, Placement::Priority(0)).unwrap();

        let delay = Behavior::with_kind(LayoutKind::Delay, layout_fn(|_| Ok(())));
        target.add_behavior(delay.clone()).unwrap();
        registry.react(SceneEvent::BehaviorsChanged(BehaviorsChanged {
            target: target.id(),
            behavior: delay.id(),
            change: BehaviorChange::Added,
        }));

        let order = registry.group(group).unwrap().calculation_order().to_vec();
        assert_eq!(order.len(), 2);
        assert!(order[0].follows_parent());
        assert_eq!(order[1], delay);
        assert_eq!(delay.on_changed().len(), 1);
    }

    #[test]
    fn manual_follow_parent_does_not_displace_auto_one() {
        let mut registry = registry();
        let target = Target::new("t");
        let group = registry.entry(&target, Placement::Priority(0)).unwrap();
        let auto = target.behaviors()[0].clone();
        assert!(auto.is_auto_attached());

        let manual = Behavior::follow_parent();
        target.insert_behavior(0, manual.clone()).unwrap();
        registry.react(SceneEvent::BehaviorsChanged(BehaviorsChanged {
            target: target.id(),
            behavior: manual.id(),
            change: BehaviorChange::Added,
        }));

        assert_eq!(target.behaviors()[0], manual);
        assert_eq!(registry.group(group).unwrap().calculation_order(), [auto]);
    }

    #[test]
    fn removing_follow_parent_reattaches_one() {
        let mut registry = registry();
        let target = Target::new("t");
        registry.entry(&target, Placement::Priority(0)).unwrap();

        let follow = target.behaviors()[0].clone();
        assert!(follow.follows_parent());
        target.remove_behavior(&follow);
        registry.react(SceneEvent::BehaviorsChanged(BehaviorsChanged {
            target: target.id(),
            behavior: follow.id(),
            change: BehaviorChange::Removed,
        }));

        let behaviors = target.behaviors();
        assert_eq!(behaviors.len(), 1);
        assert!(behaviors[0].follows_parent());
        assert_ne!(behaviors[0], follow);
        assert!(follow.on_changed().is_empty());
    }

    #[test]
    fn behavior_change_marks_group_dirty() {
        let mut registry = registry();
        let target = Target::new("t");
        let group = registry.entry(&target, Placement::Priority(0)).unwrap();
        assert!(registry.begin_tick(group, true).is_some());
        assert!(registry.begin_tick(group, true).is_none());

        let follow = target.behaviors()[0].id();
        registry.react(SceneEvent::BehaviorChanged(follow));
        assert!(registry.group(group).unwrap().is_dirty());
    }

    #[test]
    fn set_priority_resorts() {
        let mut registry = registry();
        let (a_root, b_root) = (Target::new("a"), Target::new("b"));
        let a = registry.entry(&a_root, Placement::Priority(0)).unwrap();
        let b = registry.entry(&b_root, Placement::Priority(0)).unwrap();
        assert_eq!(registry.group_ids(), vec![a, b]);

        registry.set_priority(b, 2).unwrap();
        assert_eq!(registry.group_ids(), vec![b, a]);

        registry.set_priority(b, 0).unwrap();
        assert_eq!(registry.group_ids(), vec![a, b]);

        let gone = GroupId::new();
        assert_eq!(
            registry.set_priority(gone, 1),
            Err(ManagerError::GroupDestroyed(gone))
        );
    }

    #[test]
    fn dead_root_empties_group_on_reconcile() {
        let mut registry = registry();
        let root = Target::new("root");
        let group = registry.entry(&root, Placement::Priority(0)).unwrap();
        drop(root);

        registry.reconcile(group);
        assert!(registry.group(group).is_none());
        assert_eq!(registry.target_count(), 0);
    }
}
