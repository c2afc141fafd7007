//! The synthetic follow-parent layout.

use super::behavior::Layout;
use super::target::{Target, Vec2};
use crate::error::LayoutError;

/// Keeps a target's world origin at its parent's world origin plus its own
/// local origin.
///
/// After moving the target it flags the follow-parent behaviors of the
/// target's children, so they catch up later in the same tick (children come
/// after their parent in traversal order).
#[derive(Debug, Default, Clone, Copy)]
pub struct FollowParent;

impl Layout for FollowParent {
    fn update(&mut self, target: &Target) -> Result<(), LayoutError> {
        let base = target
            .parent()
            .map(|parent| parent.world_origin())
            .unwrap_or(Vec2::ZERO);
        target.set_world_origin(base + target.local_origin());

        for child in target.children() {
            child.mark_follow_parent_changed();
        }
        Ok(())
    }
}
