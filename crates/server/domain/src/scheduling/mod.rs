//! Placement failures reported by the scheduling service.

use crate::shared_kernel::{Result, TaskId, Tier};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Why the scheduler failed to place a task in its last iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Every agent in the tier was full.
    AllAgentsFull,
    /// The task was queued behind a launch guard; transient, resolves on
    /// its own once the agent finishes launching containers.
    LaunchGuard,
    /// A placement constraint could not be satisfied.
    Constraint,
    /// The task can never fit on any configured machine.
    TooLargeToFit,
    /// The job hit its own capacity-group limit.
    AboveCapacityLimit,
    /// Placement is waiting for an IP allocation already in use.
    WaitingForInUseIpAllocation,
}

impl FailureKind {
    /// Failure kinds that must never drive a scale-up: adding agents
    /// cannot resolve them.
    pub const NEVER_TRIGGER_AUTOSCALING: [FailureKind; 3] = [
        FailureKind::TooLargeToFit,
        FailureKind::AboveCapacityLimit,
        FailureKind::WaitingForInUseIpAllocation,
    ];

    pub fn never_triggers_autoscaling(&self) -> bool {
        Self::NEVER_TRIGGER_AUTOSCALING.contains(self)
    }
}

/// One task the scheduler could not place, with the tier it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlacementFailure {
    pub task_id: TaskId,
    pub tier: Tier,
    pub failure_kind: FailureKind,
}

/// Last-iteration placement failures, keyed by failure kind and then by an
/// opaque grouping key (in practice the task id).
pub type PlacementFailures = HashMap<FailureKind, HashMap<String, Vec<TaskPlacementFailure>>>;

/// Port to the scheduling service's placement-failure feed. The feed
/// reflects the most recent placement attempt only.
#[async_trait]
pub trait SchedulingFeed: Send + Sync {
    async fn last_task_placement_failures(&self) -> Result<PlacementFailures>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_failures_can_trigger_autoscaling() {
        assert!(!FailureKind::AllAgentsFull.never_triggers_autoscaling());
        assert!(!FailureKind::LaunchGuard.never_triggers_autoscaling());
        assert!(!FailureKind::Constraint.never_triggers_autoscaling());
    }

    #[test]
    fn structural_failures_never_trigger_autoscaling() {
        assert!(FailureKind::TooLargeToFit.never_triggers_autoscaling());
        assert!(FailureKind::AboveCapacityLimit.never_triggers_autoscaling());
        assert!(FailureKind::WaitingForInUseIpAllocation.never_triggers_autoscaling());
    }
}
