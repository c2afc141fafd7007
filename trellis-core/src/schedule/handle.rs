//! Group Handles
//!
//! A [`GroupHandle`] names one group of a manager. It reads and mutates that
//! group through the manager's lock, the same way the manager's own calls
//! do, and ticks it on its own without dirty gating.

use std::fmt;
use std::sync::{Arc, Weak};

use super::group::{Group, GroupId};
use super::manager::Shared;
use super::tick::TickReport;
use crate::error::ManagerError;
use crate::scene::{Behavior, Target};
use crate::snapshot::GroupSnapshot;

/// A handle to a group owned by a [`Manager`](crate::Manager).
///
/// Handles are cheap to clone and do not keep the group (or the manager)
/// alive. Once the group is destroyed, queries return empty values and
/// mutations fail with [`ManagerError::GroupDestroyed`].
#[derive(Clone)]
pub struct GroupHandle {
    id: GroupId,
    shared: Weak<Shared>,
}

impl GroupHandle {
    pub(crate) fn new(id: GroupId, shared: Weak<Shared>) -> Self {
        Self { id, shared }
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Weak::ptr_eq(&self.shared, &Arc::downgrade(shared))
    }

    fn sibling(&self, id: GroupId) -> Self {
        Self::new(id, self.shared.clone())
    }

    /// Query the group; `None` if it (or its manager) is gone or busy.
    fn query<R>(&self, f: impl FnOnce(&Group) -> R) -> Option<R> {
        let shared = self.shared.upgrade()?;
        shared
            .read(|registry| registry.group(self.id).map(f))
            .flatten()
    }

    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Whether the group still exists.
    pub fn is_alive(&self) -> bool {
        self.query(|_| ()).is_some()
    }

    pub fn root(&self) -> Option<Target> {
        self.query(|group| group.root_target()).flatten()
    }

    pub fn priority(&self) -> Option<i32> {
        self.query(|group| group.priority())
    }

    /// Change the priority. The manager re-sorts its group list; the group's
    /// contents are untouched.
    pub fn set_priority(&self, priority: i32) -> Result<(), ManagerError> {
        let shared = self
            .shared
            .upgrade()
            .ok_or(ManagerError::GroupDestroyed(self.id))?;
        shared.update(|registry| registry.set_priority(self.id, priority))?
    }

    pub fn parent_group(&self) -> Option<GroupHandle> {
        self.query(|group| group.parent())
            .flatten()
            .map(|id| self.sibling(id))
    }

    pub fn child_groups(&self) -> Vec<GroupHandle> {
        self.query(|group| group.children().iter().copied().collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
            .map(|id| self.sibling(id))
            .collect()
    }

    /// Member targets in pre-order.
    pub fn targets(&self) -> Vec<Target> {
        self.query(|group| group.targets()).unwrap_or_default()
    }

    /// Number of member targets.
    pub fn len(&self) -> usize {
        self.query(|group| group.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calculation_order(&self) -> Vec<Behavior> {
        self.query(|group| group.calculation_order().to_vec())
            .unwrap_or_default()
    }

    /// Whether a change is pending since the group was last evaluated.
    pub fn is_dirty(&self) -> bool {
        self.query(|group| group.is_dirty()).unwrap_or(false)
    }

    /// Evaluate this group alone, whether or not it has pending changes.
    pub fn calculate_layouts(&self) -> TickReport {
        match self.shared.upgrade() {
            Some(shared) => shared.calculate_group(self.id, false),
            None => TickReport::default(),
        }
    }

    pub fn snapshot(&self) -> Option<GroupSnapshot> {
        self.query(GroupSnapshot::capture)
    }
}

impl PartialEq for GroupHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for GroupHandle {}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
