//! Scene Events
//!
//! The registry subscribes to targets and behaviors with callbacks that do
//! nothing but forward an event to the manager. The manager applies the
//! event right away if it is idle; if it is in the middle of an update (the
//! event was fired by one of its own mutations) the event waits in the queue
//! and is applied before that update returns.

use std::sync::Weak;

use super::manager::Shared;
use crate::scene::{
    Behavior, BehaviorId, BehaviorsChanged, ParentChanged, SubscriptionId, Target, TargetId,
};

/// A notification the registry reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SceneEvent {
    TargetDisposed(TargetId),
    ParentChanged(ParentChanged),
    /// An unregistered target inside a group's territory was reparented.
    PassageMoved(TargetId),
    BehaviorsChanged(BehaviorsChanged),
    BehaviorChanged(BehaviorId),
    OperationPriorityChanged(BehaviorId),
    BehaviorDisposed(BehaviorId),
}

/// Where subscription callbacks send their events.
#[derive(Clone)]
pub(crate) struct EventSink {
    shared: Weak<Shared>,
}

impl EventSink {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// A sink that drops everything. Used when a registry is driven by hand.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { shared: Weak::new() }
    }

    pub(crate) fn emit(&self, event: SceneEvent) {
        if let Some(shared) = self.shared.upgrade() {
            shared.enqueue(event);
            shared.flush();
        }
    }
}

/// Subscriptions held on a tracked target.
#[derive(Debug)]
pub(crate) struct TargetSubscriptions {
    disposed: SubscriptionId,
    parent_changed: SubscriptionId,
    behaviors_changed: SubscriptionId,
}

impl TargetSubscriptions {
    pub(crate) fn subscribe(target: &Target, sink: &EventSink) -> Self {
        let s = sink.clone();
        let disposed = target
            .on_disposed()
            .subscribe(move |id: &TargetId| s.emit(SceneEvent::TargetDisposed(*id)));
        let s = sink.clone();
        let parent_changed = target
            .on_parent_changed()
            .subscribe(move |event: &ParentChanged| s.emit(SceneEvent::ParentChanged(*event)));
        let s = sink.clone();
        let behaviors_changed = target
            .on_behaviors_changed()
            .subscribe(move |event: &BehaviorsChanged| {
                s.emit(SceneEvent::BehaviorsChanged(*event))
            });

        Self {
            disposed,
            parent_changed,
            behaviors_changed,
        }
    }

    pub(crate) fn cancel(&self, target: &Target) {
        target.on_disposed().unsubscribe(self.disposed);
        target.on_parent_changed().unsubscribe(self.parent_changed);
        target.on_behaviors_changed().unsubscribe(self.behaviors_changed);
    }
}

/// Subscription held on an unregistered target that a group's territory
/// passes through.
#[derive(Debug)]
pub(crate) struct PassageSubscription {
    parent_changed: SubscriptionId,
}

impl PassageSubscription {
    pub(crate) fn subscribe(target: &Target, sink: &EventSink) -> Self {
        let s = sink.clone();
        let parent_changed = target
            .on_parent_changed()
            .subscribe(move |event: &ParentChanged| {
                s.emit(SceneEvent::PassageMoved(event.target))
            });
        Self { parent_changed }
    }

    pub(crate) fn cancel(&self, target: &Target) {
        target.on_parent_changed().unsubscribe(self.parent_changed);
    }
}

/// Subscriptions held on a watched behavior.
#[derive(Debug)]
pub(crate) struct BehaviorSubscriptions {
    disposed: SubscriptionId,
    changed: SubscriptionId,
    operation_priority: SubscriptionId,
}

impl BehaviorSubscriptions {
    pub(crate) fn subscribe(behavior: &Behavior, sink: &EventSink) -> Self {
        let s = sink.clone();
        let disposed = behavior
            .on_disposed()
            .subscribe(move |id: &BehaviorId| s.emit(SceneEvent::BehaviorDisposed(*id)));
        let s = sink.clone();
        let changed = behavior
            .on_changed()
            .subscribe(move |id: &BehaviorId| s.emit(SceneEvent::BehaviorChanged(*id)));
        let s = sink.clone();
        let operation_priority = behavior
            .on_changed_operation_priority()
            .subscribe(move |id: &BehaviorId| s.emit(SceneEvent::OperationPriorityChanged(*id)));

        Self {
            disposed,
            changed,
            operation_priority,
        }
    }

    pub(crate) fn cancel(&self, behavior: &Behavior) {
        behavior.on_disposed().unsubscribe(self.disposed);
        behavior.on_changed().unsubscribe(self.changed);
        behavior
            .on_changed_operation_priority()
            .unsubscribe(self.operation_priority);
    }
}
