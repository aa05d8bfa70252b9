//! Remote pool state, as observed through the Batch service

use serde::{Deserialize, Serialize};
use std::fmt;

/// Readiness of a pool as last observed. The service owns this state; the
/// controller only polls it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// No such pool (never created, or deleted)
    Absent,
    /// Accepted by the service, no nodes allocated yet
    Creating,
    /// Nodes being added or removed
    Resizing,
    /// Allocation settled but no node can take work yet
    ActivePending,
    /// At least one node can take scheduled tasks
    ActiveReady,
}

impl PoolState {
    pub fn is_ready(&self) -> bool {
        matches!(self, PoolState::ActiveReady)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolState::Absent => "absent",
            PoolState::Creating => "creating",
            PoolState::Resizing => "resizing",
            PoolState::ActivePending => "active-pending",
            PoolState::ActiveReady => "active-ready",
        }
    }
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_ready_is_ready() {
        assert!(PoolState::ActiveReady.is_ready());
        for state in [PoolState::Absent, PoolState::Creating, PoolState::Resizing, PoolState::ActivePending] {
            assert!(!state.is_ready(), "{} should not be ready", state);
        }
    }
}
