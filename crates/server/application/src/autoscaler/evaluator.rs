//! Pure per-tier accounting: idle instances, SLO violators, scalability
//! filtering and the dominant-resource agent count.

use super::snapshot::ClusterSnapshot;
use hodei_fleet_domain::agents::{
    AgentInstance, AgentInstanceGroup, InstanceLifecycleState, ResourceDimension, attributes,
};
use hodei_fleet_domain::jobs::TaskState;
use hodei_fleet_domain::shared_kernel::TaskId;
use hodei_fleet_domain::time::has_elapsed;
use hodei_fleet_domain::Tier;
use std::collections::{HashMap, HashSet};

/// Considered groups matching the tier and its primary instance type, in
/// snapshot order (Active before PhasedOut).
pub fn scalable_groups_for_tier<'a>(
    groups: &'a [AgentInstanceGroup],
    tier: Tier,
    primary_instance_type: &str,
) -> Vec<&'a AgentInstanceGroup> {
    groups
        .iter()
        .filter(|group| group.tier == tier && group.instance_type == primary_instance_type)
        .collect()
}

/// Idle instances of the tier: started past the grace period, carrying no
/// tasks and no `REMOVABLE`/`NOT_REMOVABLE` marks, in a group that matches
/// the tier and is itself not flagged `NOT_REMOVABLE`.
pub fn idle_instances_for_tier<'a>(
    snapshot: &'a ClusterSnapshot,
    tier: Tier,
    primary_instance_type: &str,
    grace_period_ms: u64,
) -> Vec<&'a AgentInstance> {
    snapshot
        .active_groups
        .iter()
        .filter(|group| {
            group.tier == tier
                && group.instance_type == primary_instance_type
                && !group.has_attribute(attributes::NOT_REMOVABLE)
        })
        .flat_map(|group| {
            snapshot
                .instances_by_group
                .get(&group.id)
                .into_iter()
                .flatten()
        })
        .filter(|instance| {
            instance.lifecycle_state == InstanceLifecycleState::Started
                && has_elapsed(instance.launch_timestamp, snapshot.now, grace_period_ms)
                && !instance.has_attribute(attributes::NOT_REMOVABLE)
                && !instance.has_attribute(attributes::REMOVABLE)
                && snapshot
                    .tasks_on_agent
                    .get(&instance.id)
                    .copied()
                    .unwrap_or(0)
                    == 0
        })
        .collect()
}

/// Failed tasks still sitting in `Accepted` longer than the tier's SLO.
pub fn tasks_past_slo(
    failed_task_ids: &HashSet<TaskId>,
    snapshot: &ClusterSnapshot,
    slo_ms: u64,
) -> HashSet<TaskId> {
    failed_task_ids
        .iter()
        .filter(|&task_id| {
            snapshot.tasks.get(task_id).is_some_and(|task| {
                task.status.state == TaskState::Accepted
                    && has_elapsed(task.status.timestamp, snapshot.now, slo_ms)
            })
        })
        .cloned()
        .collect()
}

/// Keeps only tasks that adding agents of the tier's unit size could ever
/// place: the job must not be pinned to a host and its container must fit
/// within one tier unit. Tasks whose job or task record vanished from the
/// snapshot drop out silently.
pub fn filter_scalable_tasks(
    task_ids: &HashSet<TaskId>,
    snapshot: &ClusterSnapshot,
    tier_dimension: &ResourceDimension,
) -> HashSet<TaskId> {
    task_ids
        .iter()
        .filter(|&task_id| {
            snapshot.job_task_pair(task_id).is_some_and(|(job, _)| {
                !job.has_ignored_hard_constraint()
                    && job
                        .container_resources
                        .as_dimension()
                        .fits_within(tier_dimension)
            })
        })
        .cloned()
        .collect()
}

/// Number of tier-unit agents needed to hold the task set, packing by the
/// tightest resource dimension.
pub fn scale_up_count_by_dominant_resource(
    task_ids: &HashSet<TaskId>,
    snapshot: &ClusterSnapshot,
    tier_dimension: &ResourceDimension,
) -> u32 {
    let mut total_cpu = 0.0f64;
    let mut total_memory_mb = 0.0f64;
    let mut total_disk_mb = 0.0f64;
    let mut total_network_mbps = 0.0f64;
    for task_id in task_ids {
        if let Some((job, _)) = snapshot.job_task_pair(task_id) {
            let resources = &job.container_resources;
            total_cpu += resources.cpu;
            total_memory_mb += resources.memory_mb as f64;
            total_disk_mb += resources.disk_mb as f64;
            total_network_mbps += resources.network_mbps as f64;
        }
    }

    let by_cpu = instances_needed(total_cpu, tier_dimension.cpu);
    let by_memory = instances_needed(total_memory_mb, tier_dimension.memory_mb as f64);
    let by_disk = instances_needed(total_disk_mb, tier_dimension.disk_mb as f64);
    let by_network = instances_needed(total_network_mbps, tier_dimension.network_mbps as f64);

    by_cpu.max(by_memory).max(by_disk).max(by_network)
}

fn instances_needed(total: f64, unit: f64) -> u32 {
    if total <= 0.0 || unit <= 0.0 {
        return 0;
    }
    (total / unit).ceil() as u32
}

/// Idle instances grouped by their instance group.
pub fn idle_instances_by_group<'a>(
    idle_instances: &[&'a AgentInstance],
) -> HashMap<hodei_fleet_domain::shared_kernel::InstanceGroupId, Vec<&'a AgentInstance>> {
    let mut by_group: HashMap<_, Vec<&AgentInstance>> = HashMap::new();
    for &instance in idle_instances {
        by_group
            .entry(instance.instance_group_id.clone())
            .or_default()
            .push(instance);
    }
    by_group
}
