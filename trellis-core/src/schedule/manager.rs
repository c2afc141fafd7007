//! Layout Manager
//!
//! The manager is the public face of the scheduler. It owns the registry
//! behind a lock together with a queue of pending scene events.
//!
//! # Re-entrancy
//!
//! Scene notifications fire synchronously, in the middle of whatever call
//! changed the scene. That call may be the manager's own (attaching a
//! follow-parent behavior during entry) or a layout running inside a tick.
//! Every notification therefore goes through the queue:
//!
//! 1. The subscription callback pushes the event.
//! 2. It then tries to take the registry lock. If the manager is idle the
//!    lock is free and the queue is drained on the spot.
//! 3. If the manager is busy, whoever holds the lock drains the queue before
//!    releasing it.
//!
//! Structural calls made while the manager is busy (from a notification
//! subscriber, say) fail with [`ManagerError::Busy`] instead of deadlocking.
//!
//! # Ticks
//!
//! A tick copies a group's calculation order under the lock and evaluates the
//! copy without it. Layouts are free to reparent targets, attach behaviors or
//! call back into the manager while the tick runs; the walk in progress is
//! unaffected.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{EventSink, SceneEvent};
use super::group::GroupId;
use super::handle::GroupHandle;
use super::registry::{Placement, Registry};
use super::tick::{self, TickReport};
use crate::config::ManagerConfig;
use crate::error::ManagerError;
use crate::scene::Target;
use crate::snapshot::ManagerSnapshot;

pub(crate) struct Shared {
    config: ManagerConfig,
    registry: Mutex<Registry>,
    pending: Mutex<VecDeque<SceneEvent>>,
}

impl Shared {
    pub(crate) fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub(crate) fn enqueue(&self, event: SceneEvent) {
        self.pending.lock().push_back(event);
    }

    /// Apply queued events if nobody else is about to.
    pub(crate) fn flush(&self) {
        loop {
            let Some(mut registry) = self.registry.try_lock() else {
                return;
            };
            self.drain(&mut registry);
            drop(registry);

            // An event may have arrived between the drain and the unlock.
            if self.pending.lock().is_empty() {
                return;
            }
        }
    }

    fn drain(&self, registry: &mut Registry) {
        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(event) => registry.react(event),
                None => break,
            }
        }
    }

    /// Run a structural change with the registry locked.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> Result<R, ManagerError> {
        let mut registry = self.registry.try_lock().ok_or(ManagerError::Busy)?;
        self.drain(&mut registry);
        let result = f(&mut registry);
        self.drain(&mut registry);
        registry.check_invariants();
        drop(registry);
        self.flush();
        Ok(result)
    }

    /// Read the registry. `None` while the manager is busy.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Registry) -> R) -> Option<R> {
        let mut registry = self.registry.try_lock()?;
        self.drain(&mut registry);
        Some(f(&registry))
    }

    /// Tick one group.
    pub(crate) fn calculate_group(&self, id: GroupId, skip_clean: bool) -> TickReport {
        let Some(mut registry) = self.registry.try_lock() else {
            tracing::warn!(group = ?id, "tick requested while the manager is busy");
            return TickReport::default();
        };
        self.drain(&mut registry);
        if registry.group(id).is_none() {
            return TickReport::default();
        }
        let Some(order) = registry.begin_tick(id, skip_clean) else {
            return TickReport::skipped_group();
        };
        drop(registry);

        let report = tick::evaluate(id, &order, self.config.catch_panics);

        if report.failed > 0 {
            // Failed behaviors kept their changed flag; keep the group in line
            // for the next tick.
            if let Some(mut registry) = self.registry.try_lock() {
                registry.mark_dirty(id);
            }
        }
        self.flush();
        report
    }

    /// Tick every group in priority order.
    pub(crate) fn calculate_all(&self) -> TickReport {
        let Some(ids) = self.read(Registry::group_ids) else {
            tracing::warn!("tick requested while the manager is busy");
            return TickReport::default();
        };

        let mut report = TickReport::default();
        for id in ids {
            report += self.calculate_group(id, self.config.skip_clean_groups);
        }
        tracing::trace!(
            groups = report.groups_evaluated,
            skipped = report.groups_skipped,
            updated = report.updated,
            failed = report.failed,
            "layouts calculated"
        );
        report
    }
}

/// Schedules layout behaviors over a forest of targets.
///
/// Targets are brought under scheduling with [`entry`](Self::entry) and
/// grouped by subtree. [`calculate_layouts`](Self::calculate_layouts)
/// evaluates every group, highest priority first. The manager follows the
/// scene on its own: reparenting, disposal and behavior changes regroup and
/// reorder without further calls.
///
/// The manager only tracks targets; it never keeps one alive.
///
/// # Example
///
/// ```rust,ignore
/// let manager = Manager::new();
/// let root = Target::new("panel");
/// root.add_behavior(Behavior::new(layout_fn(|t| {
///     t.set_local_origin(Vec2::new(4.0, 4.0));
///     Ok(())
/// })))?;
///
/// let group = manager.entry(&root)?;
/// assert_eq!(group.calculation_order().len(), 2);
/// manager.calculate_layouts();
/// ```
pub struct Manager {
    shared: Arc<Shared>,
}

impl Manager {
    /// Create a manager with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig) -> Self {
        let shared = Arc::new_cyclic(|weak| Shared {
            registry: Mutex::new(Registry::new(config.clone(), EventSink::new(weak.clone()))),
            pending: Mutex::new(VecDeque::new()),
            config,
        });
        Self { shared }
    }

    pub fn config(&self) -> &ManagerConfig {
        self.shared.config()
    }

    fn handle(&self, id: GroupId) -> GroupHandle {
        GroupHandle::new(id, Arc::downgrade(&self.shared))
    }

    // -- Structural API --

    /// Bring `target` and its subtree under scheduling.
    ///
    /// The target joins the group of its nearest registered ancestor, or
    /// roots a new group with the configured default priority. Entering a
    /// registered target returns its current group.
    pub fn entry(&self, target: &Target) -> Result<GroupHandle, ManagerError> {
        self.entry_with_priority(target, self.shared.config.default_priority)
    }

    /// Like [`entry`](Self::entry), but a new group gets `priority`.
    pub fn entry_with_priority(
        &self,
        target: &Target,
        priority: i32,
    ) -> Result<GroupHandle, ManagerError> {
        let id = self
            .shared
            .update(|registry| registry.entry(target, Placement::Priority(priority)))??;
        Ok(self.handle(id))
    }

    /// Root a new group at `target`, nested under `parent`.
    ///
    /// The new group ticks right after `parent` (its priority is one lower)
    /// and is listed among `parent`'s child groups.
    pub fn entry_with_parent(
        &self,
        target: &Target,
        parent: &GroupHandle,
    ) -> Result<GroupHandle, ManagerError> {
        if !parent.belongs_to(&self.shared) {
            return Err(ManagerError::ForeignGroup(parent.id()));
        }
        let id = self
            .shared
            .update(|registry| registry.entry(target, Placement::Under(parent.id())))??;
        Ok(self.handle(id))
    }

    /// Stop scheduling `target`.
    ///
    /// Exiting a group root destroys the group; exiting any other member
    /// removes it and the members below it. Exiting an unregistered target
    /// does nothing.
    pub fn exit(&self, target: &Target) -> Result<(), ManagerError> {
        self.shared.update(|registry| registry.exit(target.id()))
    }

    // -- Queries --

    /// Groups in tick order.
    ///
    /// Empty while the manager is busy applying an update; use
    /// [`try_groups`](Self::try_groups) to tell the two apart.
    pub fn groups(&self) -> Vec<GroupHandle> {
        self.try_groups().unwrap_or_default()
    }

    /// Groups in tick order, or [`ManagerError::Busy`] if the manager is in
    /// the middle of an update.
    pub fn try_groups(&self) -> Result<Vec<GroupHandle>, ManagerError> {
        let ids = self
            .shared
            .read(Registry::group_ids)
            .ok_or(ManagerError::Busy)?;
        Ok(ids.into_iter().map(|id| self.handle(id)).collect())
    }

    pub fn group_of(&self, target: &Target) -> Option<GroupHandle> {
        self.shared
            .read(|registry| registry.owner_of(target.id()))
            .flatten()
            .map(|id| self.handle(id))
    }

    pub fn is_registered(&self, target: &Target) -> bool {
        self.group_of(target).is_some()
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.shared.read(Registry::group_count).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked targets across all groups.
    pub fn target_count(&self) -> usize {
        self.shared.read(Registry::target_count).unwrap_or(0)
    }

    // -- Ticking --

    /// Evaluate every group in priority order.
    ///
    /// Behavior failures are logged and counted in the report; they never
    /// stop the tick.
    pub fn calculate_layouts(&self) -> TickReport {
        self.shared.calculate_all()
    }

    // -- Diagnostics --

    pub fn snapshot(&self) -> ManagerSnapshot {
        self.shared.read(Registry::snapshot).unwrap_or_default()
    }

    /// Check every scheduling invariant.
    ///
    /// Fails with [`ManagerError::Busy`] while the manager is in the middle
    /// of an update, and with [`ManagerError::Invariant`] if one is broken.
    pub fn verify(&self) -> Result<(), ManagerError> {
        self.shared
            .read(Registry::verify)
            .ok_or(ManagerError::Busy)??;
        Ok(())
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(mut registry) = self.shared.registry.try_lock() {
            registry.clear();
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("groups", &self.len())
            .field("targets", &self.target_count())
            .field("config", self.config())
            .finish()
    }
}
