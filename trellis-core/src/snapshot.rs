//! Serializable views of the scheduler state, for logging and debugging.

use serde::Serialize;

use crate::scene::{Behavior, BehaviorId, LayoutKind, Target, TargetId};
use crate::schedule::{Group, GroupId};

/// Every group, in tick order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ManagerSnapshot {
    pub groups: Vec<GroupSnapshot>,
}

impl ManagerSnapshot {
    pub fn group(&self, id: GroupId) -> Option<&GroupSnapshot> {
        self.groups.iter().find(|g| g.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub id: GroupId,
    pub root: TargetId,
    pub priority: i32,
    pub parent: Option<GroupId>,
    pub children: Vec<GroupId>,
    pub targets: Vec<TargetSnapshot>,
    pub calculation_order: Vec<BehaviorSnapshot>,
}

impl GroupSnapshot {
    pub(crate) fn capture(group: &Group) -> Self {
        Self {
            id: group.id(),
            root: group.root(),
            priority: group.priority(),
            parent: group.parent(),
            children: group.children().iter().copied().collect(),
            targets: group.targets().iter().map(TargetSnapshot::from).collect(),
            calculation_order: group
                .calculation_order()
                .iter()
                .map(BehaviorSnapshot::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSnapshot {
    pub id: TargetId,
    pub name: String,
}

impl From<&Target> for TargetSnapshot {
    fn from(target: &Target) -> Self {
        Self {
            id: target.id(),
            name: target.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BehaviorSnapshot {
    pub id: BehaviorId,
    pub kind: LayoutKind,
    pub follows_parent: bool,
    pub auto_attached: bool,
    pub changed: bool,
    /// Type name of the layout.
    pub layout: &'static str,
}

impl From<&Behavior> for BehaviorSnapshot {
    fn from(behavior: &Behavior) -> Self {
        Self {
            id: behavior.id(),
            kind: behavior.kind(),
            follows_parent: behavior.follows_parent(),
            auto_attached: behavior.is_auto_attached(),
            changed: behavior.is_changed(),
            layout: behavior.layout_name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::layout_fn;
    use crate::Manager;

    #[test]
    fn snapshot_serializes() {
        let manager = Manager::new();
        let root = Target::new("root");
        let child = Target::new("child");
        root.add_child(&child).unwrap();
        child
            .add_behavior(Behavior::with_kind(LayoutKind::Delay, layout_fn(|_| Ok(()))))
            .unwrap();
        let group = manager.entry_with_priority(&root, 2).unwrap();

        let snapshot = manager.snapshot();
        let only = snapshot.group(group.id()).unwrap();
        assert_eq!(only.priority, 2);
        let names: Vec<&str> = only.targets.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["root", "child"]);
        let kinds: Vec<LayoutKind> = only.calculation_order.iter().map(|b| b.kind).collect();
        assert_eq!(
            kinds,
            [LayoutKind::Normal, LayoutKind::Normal, LayoutKind::Delay]
        );

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["groups"][0]["priority"], 2);
        assert_eq!(json["groups"][0]["targets"][1]["name"], "child");
        assert_eq!(json["groups"][0]["calculation_order"][2]["kind"], "delay");
        assert_eq!(json["groups"][0]["root"], root.id().raw());
    }
}
