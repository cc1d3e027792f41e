//! Immutable per-iteration view of the cluster.
//!
//! Captured once at the start of every evaluation so that the state driving
//! the decisions is exactly the state reported by metrics and logs for that
//! iteration.

use hodei_fleet_domain::agents::{AgentInstance, AgentInstanceGroup, AgentManagement};
use hodei_fleet_domain::jobs::{Job, JobOperations, Task, TaskState};
use hodei_fleet_domain::scheduling::{FailureKind, PlacementFailures, SchedulingFeed};
use hodei_fleet_domain::shared_kernel::{InstanceGroupId, InstanceId, JobId, Result, TaskId};
use hodei_fleet_domain::time::{Clock, has_elapsed};
use hodei_fleet_domain::Tier;
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct ClusterSnapshot {
    /// Wall-clock millis at capture time.
    pub now: i64,
    pub jobs: HashMap<JobId, Job>,
    pub tasks: HashMap<TaskId, Task>,
    /// Considered instance groups, Active first, then PhasedOut.
    pub active_groups: Vec<AgentInstanceGroup>,
    pub instances_by_group: HashMap<InstanceGroupId, Vec<AgentInstance>>,
    /// Number of non-finished tasks placed on each agent.
    pub tasks_on_agent: HashMap<InstanceId, u64>,
    pub(crate) placement_failures: PlacementFailures,
}

impl ClusterSnapshot {
    pub async fn capture(
        agent_management: &dyn AgentManagement,
        job_operations: &dyn JobOperations,
        scheduling_feed: &dyn SchedulingFeed,
        clock: &dyn Clock,
    ) -> Result<Self> {
        let jobs = job_operations
            .list_jobs()
            .await?
            .into_iter()
            .map(|job| (job.id.clone(), job))
            .collect();
        let tasks: HashMap<TaskId, Task> = job_operations
            .list_tasks()
            .await?
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();

        let mut active_groups: Vec<AgentInstanceGroup> = agent_management
            .instance_groups()
            .await
            .map_err(hodei_fleet_domain::DomainError::from)?
            .into_iter()
            .filter(AgentInstanceGroup::is_considered)
            .collect();
        // Active groups lead so that scale-up prefers them; the planner
        // reverses the order for scale-down so PhasedOut groups drain first.
        active_groups.sort_by_key(|g| g.lifecycle_state.scale_up_preference());

        let mut instances_by_group = HashMap::new();
        for group in &active_groups {
            let instances = agent_management
                .instances(&group.id)
                .await
                .map_err(hodei_fleet_domain::DomainError::from)?;
            instances_by_group.insert(group.id.clone(), instances);
        }

        let mut tasks_on_agent: HashMap<InstanceId, u64> = HashMap::new();
        for task in tasks.values() {
            if task.status.state == TaskState::Finished {
                continue;
            }
            if let Some(instance_id) = &task.agent_instance_id {
                *tasks_on_agent.entry(instance_id.clone()).or_insert(0) += 1;
            }
        }

        let placement_failures = scheduling_feed.last_task_placement_failures().await?;

        Ok(Self {
            now: clock.wall_time(),
            jobs,
            tasks,
            active_groups,
            instances_by_group,
            tasks_on_agent,
            placement_failures,
        })
    }

    /// Task IDs that failed placement last iteration, by tier, excluding the
    /// given failure kinds.
    pub fn failed_task_ids_by_tier(
        &self,
        ignoring: &[FailureKind],
    ) -> HashMap<Tier, HashSet<TaskId>> {
        let mut failed_by_tier: HashMap<Tier, HashSet<TaskId>> = HashMap::new();
        for (kind, failures_by_key) in &self.placement_failures {
            if ignoring.contains(kind) {
                continue;
            }
            for failures in failures_by_key.values() {
                for failure in failures {
                    failed_by_tier
                        .entry(failure.tier)
                        .or_default()
                        .insert(failure.task_id.clone());
                }
            }
        }
        failed_by_tier
    }

    /// The task and its job, when both are still present in the snapshot.
    pub fn job_task_pair(&self, task_id: &TaskId) -> Option<(&Job, &Task)> {
        let task = self.tasks.get(task_id)?;
        let job = self.jobs.get(&task.job_id)?;
        Some((job, task))
    }

    /// Instances whose `REMOVABLE` mark is older than `timeout_ms`: marked
    /// but never collected by the external reaper.
    pub fn removable_instances_past(&self, timeout_ms: u64) -> Vec<&AgentInstance> {
        self.instances_by_group
            .values()
            .flatten()
            .filter(|instance| {
                instance
                    .removable_marked_at()
                    .is_some_and(|marked_at| has_elapsed(marked_at, self.now, timeout_ms))
            })
            .collect()
    }
}
