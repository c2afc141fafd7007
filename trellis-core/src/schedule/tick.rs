//! Tick Evaluation
//!
//! A tick walks a snapshot of a group's calculation order and updates every
//! behavior whose changed flag is set. The snapshot is taken under the
//! manager lock and evaluated without it, so behaviors may restructure the
//! scene (and the manager may react) while the tick is running without
//! disturbing the walk.
//!
//! A behavior that fails, by error or by panic, is logged and counted; the
//! rest of the order still runs.

use std::ops::AddAssign;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;

use super::group::GroupId;
use crate::error::LayoutError;
use crate::scene::{panic_message, Behavior};

/// What a tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Groups whose calculation order was walked.
    pub groups_evaluated: usize,
    /// Groups passed over because nothing in them changed.
    pub groups_skipped: usize,
    /// Behaviors updated successfully.
    pub updated: usize,
    /// Behaviors passed over because their changed flag was clear.
    pub skipped: usize,
    /// Behaviors whose update failed.
    pub failed: usize,
}

impl TickReport {
    pub(crate) fn skipped_group() -> Self {
        Self {
            groups_skipped: 1,
            ..Self::default()
        }
    }
}

impl AddAssign for TickReport {
    fn add_assign(&mut self, rhs: Self) {
        self.groups_evaluated += rhs.groups_evaluated;
        self.groups_skipped += rhs.groups_skipped;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

/// Walk `order`, updating every changed behavior.
pub(crate) fn evaluate(group: GroupId, order: &[Behavior], catch_panics: bool) -> TickReport {
    let mut report = TickReport {
        groups_evaluated: 1,
        ..TickReport::default()
    };

    for behavior in order {
        if !behavior.is_changed() || behavior.is_disposed() {
            report.skipped += 1;
            continue;
        }

        match run(behavior, catch_panics) {
            Ok(()) => report.updated += 1,
            Err(err) => {
                report.failed += 1;
                tracing::warn!(
                    group = ?group,
                    behavior = ?behavior.id(),
                    layout = behavior.layout_name(),
                    error = %err,
                    "layout update failed"
                );
            }
        }
    }

    report
}

fn run(behavior: &Behavior, catch_panics: bool) -> Result<(), LayoutError> {
    if !catch_panics {
        return behavior.update();
    }

    match panic::catch_unwind(AssertUnwindSafe(|| behavior.update())) {
        Ok(result) => result,
        Err(payload) => {
            behavior.restore_changed();
            Err(LayoutError::Panicked {
                behavior: behavior.id(),
                message: panic_message(payload.as_ref()),
            })
        }
    }
}
