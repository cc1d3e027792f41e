//! Job and task catalog types, and the port to the job operations service.

use crate::agents::ResourceDimension;
use crate::shared_kernel::{InstanceId, JobId, Result, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Hard-constraint keys that pin a task to a specific host or machine type.
/// Scaling cannot help such tasks, so they are excluded from scale-up math.
pub const IGNORED_HARD_CONSTRAINT_NAMES: [&str; 2] = ["machineid", "machinetype"];

/// Resources requested by a job's container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContainerResources {
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_mbps: u64,
}

impl ContainerResources {
    pub fn as_dimension(&self) -> ResourceDimension {
        ResourceDimension {
            cpu: self.cpu,
            memory_mb: self.memory_mb,
            disk_mb: self.disk_mb,
            network_mbps: self.network_mbps,
        }
    }
}

/// A job as seen by the autoscaler: its container size and hard constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub container_resources: ContainerResources,
    #[serde(default)]
    pub hard_constraints: HashMap<String, String>,
}

impl Job {
    /// Whether the job carries a constraint that pins it to a host, making
    /// it unscalable.
    pub fn has_ignored_hard_constraint(&self) -> bool {
        self.hard_constraints
            .keys()
            .any(|name| IGNORED_HARD_CONSTRAINT_NAMES.contains(&name.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    Accepted,
    Launched,
    Running,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// Wall-clock millis at which the task entered this state.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub status: TaskStatus,
    /// Agent the task is (or was last) placed on, from assignment metadata.
    pub agent_instance_id: Option<InstanceId>,
}

/// Port to the job operations service. Both listings return the full
/// current sets; the autoscaler snapshots them once per iteration.
#[async_trait]
pub trait JobOperations: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<Job>>;
    async fn list_tasks(&self) -> Result<Vec<Task>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_constraints(constraints: &[(&str, &str)]) -> Job {
        Job {
            id: JobId::new("job-1"),
            container_resources: ContainerResources {
                cpu: 1.0,
                memory_mb: 512,
                disk_mb: 1_000,
                network_mbps: 100,
            },
            hard_constraints: constraints
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn machine_pinning_constraints_match_exact_key_names_only() {
        assert!(job_with_constraints(&[("machineid", "host-1")]).has_ignored_hard_constraint());
        assert!(job_with_constraints(&[("machinetype", "m5.large")]).has_ignored_hard_constraint());
        // Only the literal key names pin a task; other casings do not.
        assert!(!job_with_constraints(&[("machineId", "host-1")]).has_ignored_hard_constraint());
        assert!(!job_with_constraints(&[("zonebalance", "true")]).has_ignored_hard_constraint());
        assert!(!job_with_constraints(&[]).has_ignored_hard_constraint());
    }
}
