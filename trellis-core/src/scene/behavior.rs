//! Behavior Implementation
//!
//! A Behavior is a unit of layout computation attached to a target. The
//! computation itself is supplied through the [`Layout`] trait; the behavior
//! wraps it with the bookkeeping the scheduler relies on.
//!
//! # How Behaviors Work
//!
//! 1. A new behavior starts out *changed*, so it runs on the first tick after
//!    it is scheduled.
//!
//! 2. [`Behavior::update`] clears the changed flag and runs the layout
//!    against the owning target. If the layout fails, the flag is restored
//!    and the behavior runs again on the next tick.
//!
//! 3. Anything that invalidates the layout calls [`Behavior::mark_changed`],
//!    which also fires [`Behavior::on_changed`].
//!
//! # Kinds
//!
//! [`LayoutKind::Normal`] behaviors run in the first pass of a group tick,
//! [`LayoutKind::Delay`] behaviors in the second, after every normal behavior
//! of the group has run.
//!
//! # Follow-parent
//!
//! The scheduler keeps one synthetic follow-parent behavior on every target
//! it tracks. Such behaviors are created with [`Behavior::follow_parent`] and
//! carry an explicit tag ([`Behavior::follows_parent`]) instead of being
//! recognized by type. The one the scheduler attaches itself is also tagged
//! [`Behavior::is_auto_attached`]; while it exists, it is the only
//! follow-parent behavior of its target that runs.

use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::follow::FollowParent;
use super::notify::Notifier;
use super::target::{Target, WeakTarget};
use crate::error::LayoutError;

/// Unique identifier for a behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorId(u64);

impl BehaviorId {
    /// Generate a new unique behavior ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for BehaviorId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which evaluation pass a behavior belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Runs in the first pass.
    #[default]
    Normal,

    /// Post-processing; runs after every normal behavior of the group.
    Delay,
}

/// The computation behind a behavior.
pub trait Layout: Send + 'static {
    /// Recompute placement for `target`.
    fn update(&mut self, target: &Target) -> Result<(), LayoutError>;

    /// Pass this layout runs in.
    fn kind(&self) -> LayoutKind {
        LayoutKind::Normal
    }

    /// Whether a target may carry more than one behavior with this layout type.
    fn allow_duplicate(&self) -> bool {
        true
    }
}

/// A [`Layout`] backed by a closure. Build one with [`layout_fn`].
pub struct FnLayout<F> {
    run: F,
}

/// Wrap a closure as a normal-pass [`Layout`].
pub fn layout_fn<F>(run: F) -> FnLayout<F>
where
    F: FnMut(&Target) -> Result<(), LayoutError> + Send + 'static,
{
    FnLayout { run }
}

impl<F> Layout for FnLayout<F>
where
    F: FnMut(&Target) -> Result<(), LayoutError> + Send + 'static,
{
    fn update(&mut self, target: &Target) -> Result<(), LayoutError> {
        (self.run)(target)
    }
}

struct BehaviorInner {
    id: BehaviorId,
    kind: LayoutKind,
    allow_duplicate: bool,
    follows_parent: bool,
    auto_attached: bool,
    layout_type: TypeId,
    layout_name: &'static str,
    changed: AtomicBool,
    operation_priority: AtomicI32,
    disposed: AtomicBool,
    owner: RwLock<Option<WeakTarget>>,
    layout: Mutex<Box<dyn Layout>>,
    on_disposed: Notifier<BehaviorId>,
    on_changed: Notifier<BehaviorId>,
    on_changed_operation_priority: Notifier<BehaviorId>,
}

/// Shared handle to a behavior.
///
/// Clones share all state, like clones of an effect.
#[derive(Clone)]
pub struct Behavior {
    inner: Arc<BehaviorInner>,
}

/// Non-owning handle to a [`Behavior`].
#[derive(Clone)]
pub struct WeakBehavior {
    inner: Weak<BehaviorInner>,
}

impl WeakBehavior {
    pub fn upgrade(&self) -> Option<Behavior> {
        self.inner.upgrade().map(|inner| Behavior { inner })
    }
}

impl Behavior {
    /// Create a behavior from a layout, taking kind and duplicate policy from it.
    pub fn new<L: Layout>(layout: L) -> Self {
        let kind = layout.kind();
        Self::build(kind, layout, false, false)
    }

    /// Create a behavior from a layout, overriding its kind.
    pub fn with_kind<L: Layout>(kind: LayoutKind, layout: L) -> Self {
        Self::build(kind, layout, false, false)
    }

    /// Create a synthetic follow-parent behavior.
    pub fn follow_parent() -> Self {
        Self::build(LayoutKind::Normal, FollowParent, true, false)
    }

    /// The follow-parent behavior the scheduler attaches on entry.
    pub(crate) fn auto_follow_parent() -> Self {
        Self::build(LayoutKind::Normal, FollowParent, true, true)
    }

    fn build<L: Layout>(
        kind: LayoutKind,
        layout: L,
        follows_parent: bool,
        auto_attached: bool,
    ) -> Self {
        Self {
            inner: Arc::new(BehaviorInner {
                id: BehaviorId::new(),
                kind,
                allow_duplicate: layout.allow_duplicate(),
                follows_parent,
                auto_attached,
                layout_type: TypeId::of::<L>(),
                layout_name: type_name::<L>(),
                changed: AtomicBool::new(true),
                operation_priority: AtomicI32::new(0),
                disposed: AtomicBool::new(false),
                owner: RwLock::new(None),
                layout: Mutex::new(Box::new(layout)),
                on_disposed: Notifier::new(),
                on_changed: Notifier::new(),
                on_changed_operation_priority: Notifier::new(),
            }),
        }
    }

    pub fn id(&self) -> BehaviorId {
        self.inner.id
    }

    pub fn kind(&self) -> LayoutKind {
        self.inner.kind
    }

    pub fn allow_duplicate(&self) -> bool {
        self.inner.allow_duplicate
    }

    /// Whether this is a synthetic follow-parent behavior.
    pub fn follows_parent(&self) -> bool {
        self.inner.follows_parent
    }

    /// Whether the scheduler attached this follow-parent behavior itself.
    pub fn is_auto_attached(&self) -> bool {
        self.inner.auto_attached
    }

    /// Type name of the wrapped layout, for diagnostics.
    pub fn layout_name(&self) -> &'static str {
        self.inner.layout_name
    }

    pub(crate) fn layout_type(&self) -> TypeId {
        self.inner.layout_type
    }

    pub fn downgrade(&self) -> WeakBehavior {
        WeakBehavior {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The target this behavior is attached to, if any.
    pub fn owner(&self) -> Option<Target> {
        self.inner
            .owner
            .read()
            .as_ref()
            .and_then(WeakTarget::upgrade)
    }

    pub(crate) fn set_owner(&self, owner: Option<WeakTarget>) {
        *self.inner.owner.write() = owner;
    }

    // -- Change tracking --

    pub fn is_changed(&self) -> bool {
        self.inner.changed.load(Ordering::SeqCst)
    }

    /// Flag the behavior for the next tick and fire [`on_changed`](Self::on_changed).
    pub fn mark_changed(&self) {
        if self.is_disposed() {
            return;
        }
        self.inner.changed.store(true, Ordering::SeqCst);
        self.inner.on_changed.notify(&self.id());
    }

    /// Put the changed flag back after an update that did not complete.
    pub(crate) fn restore_changed(&self) {
        self.inner.changed.store(true, Ordering::SeqCst);
    }

    pub fn operation_priority(&self) -> i32 {
        self.inner.operation_priority.load(Ordering::SeqCst)
    }

    /// Change the operation priority, firing
    /// [`on_changed_operation_priority`](Self::on_changed_operation_priority)
    /// if the value differs.
    pub fn set_operation_priority(&self, priority: i32) {
        let previous = self
            .inner
            .operation_priority
            .swap(priority, Ordering::SeqCst);
        if previous != priority {
            self.inner.on_changed_operation_priority.notify(&self.id());
        }
    }

    // -- Execution --

    /// Run the layout against the owning target.
    ///
    /// The changed flag is cleared before the layout runs, so the layout may
    /// flag itself again for the next tick. On error the flag is restored.
    pub fn update(&self) -> Result<(), LayoutError> {
        let owner = self.owner().ok_or(LayoutError::Detached(self.id()))?;
        let mut layout = self
            .inner
            .layout
            .try_lock()
            .ok_or(LayoutError::Reentrant(self.id()))?;

        self.inner.changed.store(false, Ordering::SeqCst);
        let result = layout.update(&owner);
        if result.is_err() {
            self.restore_changed();
        }
        result
    }

    // -- Lifecycle --

    /// Dispose of the behavior.
    ///
    /// Detaches it from its owner, then fires [`on_disposed`](Self::on_disposed).
    /// After disposal the behavior cannot be attached again.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(owner) = self.owner() {
            owner.remove_behavior(self);
        }
        self.inner.on_disposed.notify(&self.id());

        self.inner.on_disposed.clear();
        self.inner.on_changed.clear();
        self.inner.on_changed_operation_priority.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    // -- Notifications --

    pub fn on_disposed(&self) -> &Notifier<BehaviorId> {
        &self.inner.on_disposed
    }

    pub fn on_changed(&self) -> &Notifier<BehaviorId> {
        &self.inner.on_changed
    }

    pub fn on_changed_operation_priority(&self) -> &Notifier<BehaviorId> {
        &self.inner.on_changed_operation_priority
    }
}

impl PartialEq for Behavior {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Behavior {}

impl Hash for Behavior {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("layout", &self.layout_name())
            .field("follows_parent", &self.follows_parent())
            .field("auto_attached", &self.is_auto_attached())
            .field("changed", &self.is_changed())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
