//! Layout Targets
//!
//! A [`Target`] is a node in the scene hierarchy. It owns its children and
//! its behaviors, and holds a weak reference to its parent. Structural
//! mutations fire notifications synchronously, after the mutation has been
//! applied and every internal lock released, so observers may freely read
//! the target (or mutate it again) from inside a callback.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Add;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::behavior::{Behavior, BehaviorId};
use super::notify::Notifier;
use crate::error::SceneError;

/// Unique identifier for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(u64);

impl TargetId {
    /// Generate a new unique target ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

/// A 2D offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self::new(0.0, 0.0);

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Payload of [`Target::on_parent_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentChanged {
    pub target: TargetId,
    pub previous: Option<TargetId>,
    pub current: Option<TargetId>,
}

/// Whether a behavior was attached or detached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorChange {
    Added,
    Removed,
}

/// Payload of [`Target::on_behaviors_changed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorsChanged {
    pub target: TargetId,
    pub behavior: BehaviorId,
    pub change: BehaviorChange,
}

struct TargetInner {
    id: TargetId,
    name: String,
    parent: RwLock<Option<Weak<TargetInner>>>,
    children: RwLock<Vec<Target>>,
    behaviors: RwLock<Vec<Behavior>>,
    local_origin: RwLock<Vec2>,
    world_origin: RwLock<Vec2>,
    disposed: AtomicBool,
    on_disposed: Notifier<TargetId>,
    on_parent_changed: Notifier<ParentChanged>,
    on_behaviors_changed: Notifier<BehaviorsChanged>,
}

// A target that goes away without an explicit dispose still tells its
// observers, so nobody keeps tracking a dead node.
impl Drop for TargetInner {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            self.on_disposed.notify(&self.id);
        }
    }
}

/// Shared handle to a node in the scene hierarchy.
///
/// Cloning the handle is cheap and yields the same node.
#[derive(Clone)]
pub struct Target {
    inner: Arc<TargetInner>,
}

/// Non-owning handle to a [`Target`].
#[derive(Clone)]
pub struct WeakTarget {
    inner: Weak<TargetInner>,
}

impl WeakTarget {
    /// Get the target back if it is still alive.
    pub fn upgrade(&self) -> Option<Target> {
        self.inner.upgrade().map(|inner| Target { inner })
    }
}

impl fmt::Debug for WeakTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(target) => write!(f, "WeakTarget({:?})", target.id()),
            None => f.write_str("WeakTarget(dead)"),
        }
    }
}

impl Target {
    /// Create a detached target with no behaviors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TargetInner {
                id: TargetId::new(),
                name: name.into(),
                parent: RwLock::new(None),
                children: RwLock::new(Vec::new()),
                behaviors: RwLock::new(Vec::new()),
                local_origin: RwLock::new(Vec2::ZERO),
                world_origin: RwLock::new(Vec2::ZERO),
                disposed: AtomicBool::new(false),
                on_disposed: Notifier::new(),
                on_parent_changed: Notifier::new(),
                on_behaviors_changed: Notifier::new(),
            }),
        }
    }

    pub fn id(&self) -> TargetId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn downgrade(&self) -> WeakTarget {
        WeakTarget {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // -- Hierarchy --

    pub fn parent(&self) -> Option<Target> {
        self.inner
            .parent
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Target { inner })
    }

    /// Children in sibling order.
    pub fn children(&self) -> Vec<Target> {
        self.inner.children.read().clone()
    }

    /// Walk up the parent chain starting at the parent.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Whether `ancestor` appears in this target's parent chain.
    pub fn is_descendant_of(&self, ancestor: &Target) -> bool {
        self.ancestors().any(|a| a.id() == ancestor.id())
    }

    /// Pre-order traversal of this target and everything below it.
    pub fn descendants(&self) -> Vec<Target> {
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(target) = stack.pop() {
            stack.extend(target.children().into_iter().rev());
            out.push(target);
        }
        out
    }

    /// Move this target under `parent` (appended as the last child), or
    /// detach it with `None`.
    ///
    /// Fires [`on_parent_changed`](Self::on_parent_changed) unless the parent
    /// is unchanged.
    pub fn set_parent(&self, parent: Option<&Target>) -> Result<(), SceneError> {
        if self.is_disposed() {
            return Err(SceneError::Disposed(self.id()));
        }
        if let Some(parent) = parent {
            if parent.is_disposed() {
                return Err(SceneError::Disposed(parent.id()));
            }
            if parent.id() == self.id() || parent.is_descendant_of(self) {
                return Err(SceneError::Cycle {
                    target: self.id(),
                    parent: parent.id(),
                });
            }
        }

        let previous = self.parent();
        if previous.as_ref().map(Target::id) == parent.map(Target::id) {
            return Ok(());
        }

        if let Some(old) = &previous {
            old.inner.children.write().retain(|c| c.id() != self.id());
        }
        if let Some(new) = parent {
            new.inner.children.write().push(self.clone());
        }
        *self.inner.parent.write() = parent.map(|p| Arc::downgrade(&p.inner));

        self.mark_follow_parent_changed();
        self.inner.on_parent_changed.notify(&ParentChanged {
            target: self.id(),
            previous: previous.as_ref().map(Target::id),
            current: parent.map(Target::id),
        });
        Ok(())
    }

    /// Shorthand for `child.set_parent(Some(self))`.
    pub fn add_child(&self, child: &Target) -> Result<(), SceneError> {
        child.set_parent(Some(self))
    }

    // -- Behaviors --

    /// Behaviors in attachment order.
    pub fn behaviors(&self) -> Vec<Behavior> {
        self.inner.behaviors.read().clone()
    }

    /// Attach `behavior` after every existing behavior.
    pub fn add_behavior(&self, behavior: Behavior) -> Result<(), SceneError> {
        self.attach(None, behavior)
    }

    /// Attach `behavior` at `index` (clamped to the current length).
    pub fn insert_behavior(&self, index: usize, behavior: Behavior) -> Result<(), SceneError> {
        self.attach(Some(index), behavior)
    }

    fn attach(&self, index: Option<usize>, behavior: Behavior) -> Result<(), SceneError> {
        if self.is_disposed() {
            return Err(SceneError::Disposed(self.id()));
        }
        if behavior.is_disposed() {
            return Err(SceneError::BehaviorDisposed(behavior.id()));
        }
        if behavior.owner().is_some() {
            return Err(SceneError::AlreadyAttached(behavior.id()));
        }

        {
            let mut behaviors = self.inner.behaviors.write();
            if !behavior.allow_duplicate()
                && behaviors
                    .iter()
                    .any(|b| b.layout_type() == behavior.layout_type())
            {
                return Err(SceneError::DuplicateBehavior {
                    target: self.id(),
                    behavior: behavior.id(),
                });
            }
            let len = behaviors.len();
            behaviors.insert(index.unwrap_or(len).min(len), behavior.clone());
        }
        behavior.set_owner(Some(self.downgrade()));

        self.inner.on_behaviors_changed.notify(&BehaviorsChanged {
            target: self.id(),
            behavior: behavior.id(),
            change: BehaviorChange::Added,
        });
        Ok(())
    }

    /// Detach `behavior`. Returns `false` if it was not attached here.
    pub fn remove_behavior(&self, behavior: &Behavior) -> bool {
        let removed = {
            let mut behaviors = self.inner.behaviors.write();
            match behaviors.iter().position(|b| b.id() == behavior.id()) {
                Some(pos) => {
                    behaviors.remove(pos);
                    true
                }
                None => false,
            }
        };

        if removed {
            behavior.set_owner(None);
            self.inner.on_behaviors_changed.notify(&BehaviorsChanged {
                target: self.id(),
                behavior: behavior.id(),
                change: BehaviorChange::Removed,
            });
        }
        removed
    }

    /// Mark every follow-parent behavior on this target as changed.
    pub fn mark_follow_parent_changed(&self) {
        for behavior in self.behaviors() {
            if behavior.follows_parent() {
                behavior.mark_changed();
            }
        }
    }

    // -- Placement --

    pub fn local_origin(&self) -> Vec2 {
        *self.inner.local_origin.read()
    }

    /// Set the offset from the parent. Marks the follow-parent behavior changed.
    pub fn set_local_origin(&self, origin: Vec2) {
        *self.inner.local_origin.write() = origin;
        self.mark_follow_parent_changed();
    }

    pub fn world_origin(&self) -> Vec2 {
        *self.inner.world_origin.read()
    }

    pub fn set_world_origin(&self, origin: Vec2) {
        *self.inner.world_origin.write() = origin;
    }

    // -- Lifecycle --

    /// Dispose this target and its whole subtree.
    ///
    /// Observers of [`on_disposed`](Self::on_disposed) run first, while the
    /// target is still attached. Children are disposed next, then the
    /// target's behaviors, and finally the target is detached from its
    /// parent without a parent-changed notification. Disposing twice is a
    /// no-op.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.on_disposed.notify(&self.id());

        for child in self.children() {
            child.dispose();
        }
        for behavior in self.behaviors() {
            behavior.dispose();
        }

        if let Some(parent) = self.parent() {
            parent.inner.children.write().retain(|c| c.id() != self.id());
        }
        *self.inner.parent.write() = None;

        self.inner.on_disposed.clear();
        self.inner.on_parent_changed.clear();
        self.inner.on_behaviors_changed.clear();
    }

    // -- Notifications --

    pub fn on_disposed(&self) -> &Notifier<TargetId> {
        &self.inner.on_disposed
    }

    pub fn on_parent_changed(&self) -> &Notifier<ParentChanged> {
        &self.inner.on_parent_changed
    }

    pub fn on_behaviors_changed(&self) -> &Notifier<BehaviorsChanged> {
        &self.inner.on_behaviors_changed
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("children", &self.inner.children.read().len())
            .field("behaviors", &self.inner.behaviors.read().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Iterator over a target's ancestors, nearest first.
pub struct Ancestors {
    next: Option<Target>,
}

impl Iterator for Ancestors {
    type Item = Target;

    fn next(&mut self) -> Option<Target> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::LayoutKind;
    use parking_lot::Mutex;

    fn noop() -> Behavior {
        Behavior::new(crate::scene::layout_fn(|_| Ok(())))
    }

    #[test]
    fn target_ids_are_unique() {
        assert_ne!(TargetId::new(), TargetId::new());
        assert_ne!(Target::new("a").id(), Target::new("a").id());
    }

    #[test]
    fn set_parent_links_both_sides() {
        let parent = Target::new("parent");
        let child = Target::new("child");

        child.set_parent(Some(&parent)).unwrap();
        assert_eq!(child.parent(), Some(parent.clone()));
        assert_eq!(parent.children(), vec![child.clone()]);

        child.set_parent(None).unwrap();
        assert!(child.parent().is_none());
        assert!(parent.children().is_empty());
    }

    #[test]
    fn set_parent_rejects_cycles() {
        let a = Target::new("a");
        let b = Target::new("b");
        a.add_child(&b).unwrap();

        assert!(matches!(
            a.set_parent(Some(&b)),
            Err(SceneError::Cycle { .. })
        ));
        assert!(matches!(
            a.set_parent(Some(&a)),
            Err(SceneError::Cycle { .. })
        ));
    }

    #[test]
    fn set_parent_fires_notification_once() {
        let parent = Target::new("parent");
        let child = Target::new("child");
        let events = Arc::new(Mutex::new(Vec::new()));

        let e = events.clone();
        child
            .on_parent_changed()
            .subscribe(move |event: &ParentChanged| e.lock().push(*event));

        child.set_parent(Some(&parent)).unwrap();
        child.set_parent(Some(&parent)).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous, None);
        assert_eq!(events[0].current, Some(parent.id()));
    }

    #[test]
    fn descendants_are_pre_order() {
        let root = Target::new("root");
        let a = Target::new("a");
        let a1 = Target::new("a1");
        let b = Target::new("b");
        root.add_child(&a).unwrap();
        a.add_child(&a1).unwrap();
        root.add_child(&b).unwrap();

        let names: Vec<_> = root
            .descendants()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, ["root", "a", "a1", "b"]);
    }

    #[test]
    fn behaviors_keep_attachment_order() {
        let target = Target::new("t");
        let first = noop();
        let second = noop();
        let front = noop();

        target.add_behavior(first.clone()).unwrap();
        target.add_behavior(second.clone()).unwrap();
        target.insert_behavior(0, front.clone()).unwrap();

        assert_eq!(target.behaviors(), vec![front, first.clone(), second]);
        assert_eq!(first.owner(), Some(target.clone()));

        assert!(target.remove_behavior(&first));
        assert!(!target.remove_behavior(&first));
        assert!(first.owner().is_none());
    }

    #[test]
    fn behavior_cannot_attach_twice() {
        let a = Target::new("a");
        let b = Target::new("b");
        let behavior = noop();

        a.add_behavior(behavior.clone()).unwrap();
        assert_eq!(
            b.add_behavior(behavior.clone()),
            Err(SceneError::AlreadyAttached(behavior.id()))
        );
    }

    #[test]
    fn duplicate_rejected_when_layout_forbids_it() {
        struct Unique;
        impl crate::scene::Layout for Unique {
            fn update(&mut self, _: &Target) -> Result<(), crate::LayoutError> {
                Ok(())
            }
            fn allow_duplicate(&self) -> bool {
                false
            }
        }

        let target = Target::new("t");
        target.add_behavior(Behavior::new(Unique)).unwrap();
        assert!(matches!(
            target.add_behavior(Behavior::new(Unique)),
            Err(SceneError::DuplicateBehavior { .. })
        ));
        // Other layouts are unaffected.
        target.add_behavior(noop()).unwrap();
        assert_eq!(target.behaviors().len(), 2);
    }

    #[test]
    fn dispose_cascades_and_detaches() {
        let root = Target::new("root");
        let child = Target::new("child");
        root.add_child(&child).unwrap();
        let behavior = Behavior::with_kind(LayoutKind::Delay, crate::scene::layout_fn(|_| Ok(())));
        child.add_behavior(behavior.clone()).unwrap();

        let disposed = Arc::new(Mutex::new(Vec::new()));
        for target in [&root, &child] {
            let d = disposed.clone();
            target
                .on_disposed()
                .subscribe(move |id: &TargetId| d.lock().push(*id));
        }

        root.dispose();
        root.dispose();

        assert!(root.is_disposed());
        assert!(child.is_disposed());
        assert!(behavior.is_disposed());
        assert!(child.parent().is_none());
        assert!(root.children().is_empty());
        assert_eq!(*disposed.lock(), vec![root.id(), child.id()]);
        assert!(child.set_parent(Some(&root)).is_err());
    }

    #[test]
    fn drop_without_dispose_notifies() {
        let fired = Arc::new(Mutex::new(None));
        {
            let target = Target::new("temp");
            let f = fired.clone();
            target
                .on_disposed()
                .subscribe(move |id: &TargetId| *f.lock() = Some(*id));
        }
        assert!(fired.lock().is_some());
    }
}
