//! Manager configuration.

use serde::{Deserialize, Serialize};

/// Tunables for a [`Manager`](crate::Manager).
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```rust,ignore
/// let config: ManagerConfig = serde_json::from_str(r#"{ "default_priority": 10 }"#)?;
/// let manager = Manager::with_config(config);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Priority given to groups created by [`Manager::entry`](crate::Manager::entry).
    pub default_priority: i32,

    /// Catch panics raised by layout updates at the tick call site and report
    /// them as [`LayoutError::Panicked`](crate::LayoutError::Panicked).
    pub catch_panics: bool,

    /// Run the invariant checker after every structural call.
    /// Violations are logged, and abort in debug builds.
    pub check_invariants: bool,

    /// Let the global tick skip groups with no pending changes.
    pub skip_clean_groups: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            default_priority: 0,
            catch_panics: true,
            check_invariants: cfg!(debug_assertions),
            skip_clean_groups: true,
        }
    }
}
