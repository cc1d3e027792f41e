//! Distributes approved scale counts across instance groups.

use super::evaluator::idle_instances_by_group;
use hodei_fleet_domain::agents::{AgentInstance, AgentInstanceGroup, attributes};
use hodei_fleet_domain::shared_kernel::{InstanceGroupId, InstanceId};

/// A scale-up slice assigned to one instance group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedScaleUp {
    pub group_id: InstanceGroupId,
    pub delta: u32,
}

/// Spreads `approved` new agents across the groups in preference order
/// (Active before PhasedOut), never exceeding a group's `max − desired`
/// headroom. The total planned may be lower than `approved` when the groups
/// run out of headroom.
pub fn plan_scale_up(
    scalable_groups: &[&AgentInstanceGroup],
    approved: u32,
) -> Vec<PlannedScaleUp> {
    let mut planned = Vec::new();
    let mut remaining = approved;
    for group in scalable_groups {
        if remaining == 0 {
            break;
        }
        let delta = remaining.min(group.scale_up_headroom());
        if delta == 0 {
            continue;
        }
        planned.push(PlannedScaleUp {
            group_id: group.id.clone(),
            delta,
        });
        remaining -= delta;
    }
    planned
}

/// Selects up to `approved` idle instances to mark removable, draining
/// PhasedOut groups before Active ones. Each group keeps at least `min`
/// agents: the per-group budget is `current − min` minus the instances
/// already carrying a `REMOVABLE` mark.
pub fn plan_scale_down(
    idle_instances: &[&AgentInstance],
    scalable_groups: &[&AgentInstanceGroup],
    instances_by_group: &std::collections::HashMap<InstanceGroupId, Vec<AgentInstance>>,
    approved: u32,
) -> Vec<InstanceId> {
    let idle_by_group = idle_instances_by_group(idle_instances);

    let mut drain_order: Vec<&AgentInstanceGroup> = scalable_groups.to_vec();
    drain_order.sort_by_key(|group| std::cmp::Reverse(group.lifecycle_state.scale_up_preference()));

    let mut selected = Vec::new();
    let mut remaining = approved as i64;
    for group in drain_order {
        if remaining <= 0 {
            break;
        }
        let already_removable = instances_by_group
            .get(&group.id)
            .map(|instances| {
                instances
                    .iter()
                    .filter(|i| i.has_attribute(attributes::REMOVABLE))
                    .count() as i64
            })
            .unwrap_or(0);
        let group_budget = group.current as i64 - group.min as i64 - already_removable;
        let idle_in_group = idle_by_group
            .get(&group.id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let take = remaining
            .min(group_budget)
            .min(idle_in_group.len() as i64)
            .max(0);
        for instance in idle_in_group.iter().take(take as usize) {
            selected.push(instance.id.clone());
        }
        remaining -= take;
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_fleet_domain::agents::{InstanceGroupLifecycleState, InstanceLifecycleState};
    use hodei_fleet_domain::Tier;
    use std::collections::HashMap;

    fn group(
        id: &str,
        state: InstanceGroupLifecycleState,
        min: u32,
        current: u32,
        desired: u32,
        max: u32,
    ) -> AgentInstanceGroup {
        AgentInstanceGroup {
            id: InstanceGroupId::new(id),
            tier: Tier::Flex,
            instance_type: "m5.large".to_string(),
            min,
            current,
            desired,
            max,
            lifecycle_state: state,
            attributes: HashMap::new(),
        }
    }

    fn instance(id: &str, group_id: &str) -> AgentInstance {
        AgentInstance {
            id: InstanceId::new(id),
            instance_group_id: InstanceGroupId::new(group_id),
            lifecycle_state: InstanceLifecycleState::Started,
            launch_timestamp: 0,
            attributes: HashMap::new(),
        }
    }

    fn removable_instance(id: &str, group_id: &str) -> AgentInstance {
        let mut i = instance(id, group_id);
        i.attributes
            .insert(attributes::REMOVABLE.to_string(), "1000".to_string());
        i
    }

    #[test]
    fn scale_up_fills_groups_in_order() {
        let active = group("ig-active", InstanceGroupLifecycleState::Active, 0, 5, 18, 20);
        let phased = group("ig-phased", InstanceGroupLifecycleState::PhasedOut, 0, 5, 5, 20);
        let planned = plan_scale_up(&[&active, &phased], 5);

        assert_eq!(
            planned,
            vec![
                PlannedScaleUp {
                    group_id: InstanceGroupId::new("ig-active"),
                    delta: 2,
                },
                PlannedScaleUp {
                    group_id: InstanceGroupId::new("ig-phased"),
                    delta: 3,
                },
            ]
        );
    }

    #[test]
    fn scale_up_never_exceeds_headroom() {
        let full = group("ig-full", InstanceGroupLifecycleState::Active, 0, 20, 20, 20);
        assert!(plan_scale_up(&[&full], 5).is_empty());
    }

    #[test]
    fn scale_up_stops_once_satisfied() {
        let a = group("ig-a", InstanceGroupLifecycleState::Active, 0, 0, 0, 50);
        let b = group("ig-b", InstanceGroupLifecycleState::Active, 0, 0, 0, 50);
        let planned = plan_scale_up(&[&a, &b], 4);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].delta, 4);
    }

    #[test]
    fn scale_down_drains_phased_out_groups_first() {
        let active = group("ig-active", InstanceGroupLifecycleState::Active, 0, 8, 8, 20);
        let phased = group("ig-phased", InstanceGroupLifecycleState::PhasedOut, 0, 8, 8, 20);
        let idle: Vec<AgentInstance> = (0..5)
            .map(|i| instance(&format!("i-active-{i}"), "ig-active"))
            .chain((0..5).map(|i| instance(&format!("i-phased-{i}"), "ig-phased")))
            .collect();
        let idle_refs: Vec<&AgentInstance> = idle.iter().collect();
        let instances_by_group = HashMap::from([
            (
                InstanceGroupId::new("ig-active"),
                idle[..5].to_vec(),
            ),
            (
                InstanceGroupId::new("ig-phased"),
                idle[5..].to_vec(),
            ),
        ]);

        let selected = plan_scale_down(&idle_refs, &[&active, &phased], &instances_by_group, 3);

        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|id| id.as_str().starts_with("i-phased")));
    }

    #[test]
    fn scale_down_respects_min_floor_and_prior_marks() {
        // current 5, min 2, one instance already marked: budget is 2.
        let g = group("ig-1", InstanceGroupLifecycleState::Active, 2, 5, 5, 20);
        let idle: Vec<AgentInstance> = (0..4).map(|i| instance(&format!("i-{i}"), "ig-1")).collect();
        let idle_refs: Vec<&AgentInstance> = idle.iter().collect();
        let mut all = idle.clone();
        all.push(removable_instance("i-marked", "ig-1"));
        let instances_by_group = HashMap::from([(InstanceGroupId::new("ig-1"), all)]);

        let selected = plan_scale_down(&idle_refs, &[&g], &instances_by_group, 10);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn scale_down_handles_group_below_min() {
        let g = group("ig-1", InstanceGroupLifecycleState::Active, 5, 3, 3, 20);
        let idle = [instance("i-0", "ig-1")];
        let idle_refs: Vec<&AgentInstance> = idle.iter().collect();
        let instances_by_group =
            HashMap::from([(InstanceGroupId::new("ig-1"), idle.to_vec())]);

        assert!(plan_scale_down(&idle_refs, &[&g], &instances_by_group, 10).is_empty());
    }
}
