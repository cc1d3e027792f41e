//! Test and development fixtures: a manual clock and in-memory
//! implementations of the collaborator ports.
//!
//! The in-memory collaborators back the dev mode of the server binary and
//! the integration tests of the application crate.

use crate::agents::{
    AgentInstance, AgentInstanceGroup, AgentManagement, AgentManagementError, ResourceDimension,
};
use crate::jobs::{Job, JobOperations, Task};
use crate::scheduling::{PlacementFailures, SchedulingFeed, TaskPlacementFailure};
use crate::shared_kernel::{InstanceGroupId, InstanceId, Result};
use crate::time::Clock;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;

/// A clock whose time only moves when the test says so.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_time(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A recorded `scale_up` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedScaleUp {
    pub group_id: InstanceGroupId,
    pub delta: u32,
}

/// A recorded `update_instance_attributes` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAttributeUpdate {
    pub instance_id: InstanceId,
    pub attributes: HashMap<String, String>,
}

/// A recorded `delete_instance_attributes` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAttributeDelete {
    pub instance_id: InstanceId,
    pub keys: Vec<String>,
}

#[derive(Debug, Default)]
struct FleetState {
    groups: Vec<AgentInstanceGroup>,
    instances: HashMap<InstanceGroupId, Vec<AgentInstance>>,
    resource_limits: HashMap<String, ResourceDimension>,
    scale_ups: Vec<RecordedScaleUp>,
    attribute_updates: Vec<RecordedAttributeUpdate>,
    attribute_deletes: Vec<RecordedAttributeDelete>,
}

/// In-memory agent management: seeded with groups and instances, records
/// every mutating call and applies attribute changes to the stored fleet.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAgentManagement {
    state: Arc<Mutex<FleetState>>,
}

impl InMemoryAgentManagement {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_group(&self, group: AgentInstanceGroup, instances: Vec<AgentInstance>) {
        let mut state = self.state.lock().await;
        state.instances.insert(group.id.clone(), instances);
        state.groups.push(group);
    }

    pub async fn set_resource_limits(&self, instance_type: &str, dimension: ResourceDimension) {
        let mut state = self.state.lock().await;
        state
            .resource_limits
            .insert(instance_type.to_string(), dimension);
    }

    pub async fn scale_ups(&self) -> Vec<RecordedScaleUp> {
        self.state.lock().await.scale_ups.clone()
    }

    pub async fn attribute_updates(&self) -> Vec<RecordedAttributeUpdate> {
        self.state.lock().await.attribute_updates.clone()
    }

    pub async fn attribute_deletes(&self) -> Vec<RecordedAttributeDelete> {
        self.state.lock().await.attribute_deletes.clone()
    }

    pub async fn clear_recordings(&self) {
        let mut state = self.state.lock().await;
        state.scale_ups.clear();
        state.attribute_updates.clear();
        state.attribute_deletes.clear();
    }

    pub async fn instance(&self, instance_id: &InstanceId) -> Option<AgentInstance> {
        let state = self.state.lock().await;
        state
            .instances
            .values()
            .flatten()
            .find(|i| &i.id == instance_id)
            .cloned()
    }
}

#[async_trait]
impl AgentManagement for InMemoryAgentManagement {
    async fn instance_groups(&self) -> std::result::Result<Vec<AgentInstanceGroup>, AgentManagementError> {
        Ok(self.state.lock().await.groups.clone())
    }

    async fn instances(
        &self,
        group_id: &InstanceGroupId,
    ) -> std::result::Result<Vec<AgentInstance>, AgentManagementError> {
        let state = self.state.lock().await;
        state
            .instances
            .get(group_id)
            .cloned()
            .ok_or_else(|| AgentManagementError::InstanceGroupNotFound(group_id.clone()))
    }

    async fn resource_limits(
        &self,
        instance_type: &str,
    ) -> std::result::Result<ResourceDimension, AgentManagementError> {
        let state = self.state.lock().await;
        state
            .resource_limits
            .get(instance_type)
            .copied()
            .ok_or_else(|| AgentManagementError::UnknownInstanceType(instance_type.to_string()))
    }

    async fn scale_up(
        &self,
        group_id: &InstanceGroupId,
        delta: u32,
    ) -> std::result::Result<(), AgentManagementError> {
        let mut state = self.state.lock().await;
        let group = state
            .groups
            .iter_mut()
            .find(|g| &g.id == group_id)
            .ok_or_else(|| AgentManagementError::InstanceGroupNotFound(group_id.clone()))?;
        group.desired = (group.desired + delta).min(group.max);
        state.scale_ups.push(RecordedScaleUp {
            group_id: group_id.clone(),
            delta,
        });
        Ok(())
    }

    async fn update_instance_attributes(
        &self,
        instance_id: &InstanceId,
        attributes: HashMap<String, String>,
    ) -> std::result::Result<(), AgentManagementError> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .values_mut()
            .flatten()
            .find(|i| &i.id == instance_id)
            .ok_or_else(|| AgentManagementError::InstanceNotFound(instance_id.clone()))?;
        instance.attributes.extend(attributes.clone());
        state.attribute_updates.push(RecordedAttributeUpdate {
            instance_id: instance_id.clone(),
            attributes,
        });
        Ok(())
    }

    async fn delete_instance_attributes(
        &self,
        instance_id: &InstanceId,
        keys: Vec<String>,
    ) -> std::result::Result<(), AgentManagementError> {
        let mut state = self.state.lock().await;
        let instance = state
            .instances
            .values_mut()
            .flatten()
            .find(|i| &i.id == instance_id)
            .ok_or_else(|| AgentManagementError::InstanceNotFound(instance_id.clone()))?;
        for key in &keys {
            instance.attributes.remove(key);
        }
        state.attribute_deletes.push(RecordedAttributeDelete {
            instance_id: instance_id.clone(),
            keys,
        });
        Ok(())
    }
}

/// In-memory job catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJobOperations {
    jobs: Arc<Mutex<Vec<Job>>>,
    tasks: Arc<Mutex<Vec<Task>>>,
}

impl InMemoryJobOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_job(&self, job: Job) {
        self.jobs.lock().await.push(job);
    }

    pub async fn add_task(&self, task: Task) {
        self.tasks.lock().await.push(task);
    }

    pub async fn clear(&self) {
        self.jobs.lock().await.clear();
        self.tasks.lock().await.clear();
    }
}

#[async_trait]
impl JobOperations for InMemoryJobOperations {
    async fn list_jobs(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.lock().await.clone())
    }

    async fn list_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().await.clone())
    }
}

/// In-memory placement-failure feed.
#[derive(Debug, Clone, Default)]
pub struct InMemorySchedulingFeed {
    failures: Arc<Mutex<PlacementFailures>>,
}

impl InMemorySchedulingFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the feed with the given failures, grouped the way the
    /// scheduling service reports them.
    pub async fn set_failures(&self, failures: Vec<TaskPlacementFailure>) {
        let mut grouped: PlacementFailures = HashMap::new();
        for failure in failures {
            grouped
                .entry(failure.failure_kind)
                .or_default()
                .entry(failure.task_id.to_string())
                .or_default()
                .push(failure);
        }
        *self.failures.lock().await = grouped;
    }

    pub async fn clear(&self) {
        self.failures.lock().await.clear();
    }
}

#[async_trait]
impl SchedulingFeed for InMemorySchedulingFeed {
    async fn last_task_placement_failures(&self) -> Result<PlacementFailures> {
        Ok(self.failures.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{InstanceGroupLifecycleState, InstanceLifecycleState, attributes};
    use crate::shared_kernel::Tier;

    fn group(id: &str) -> AgentInstanceGroup {
        AgentInstanceGroup {
            id: InstanceGroupId::new(id),
            tier: Tier::Flex,
            instance_type: "m5.large".to_string(),
            min: 0,
            current: 1,
            desired: 1,
            max: 10,
            lifecycle_state: InstanceGroupLifecycleState::Active,
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

    #[tokio::test]
    async fn scale_up_raises_desired_and_records_the_call() {
        let fleet = InMemoryAgentManagement::new();
        fleet.add_group(group("ig-1"), vec![]).await;

        fleet.scale_up(&InstanceGroupId::new("ig-1"), 3).await.unwrap();

        let groups = fleet.instance_groups().await.unwrap();
        assert_eq!(groups[0].desired, 4);
        assert_eq!(fleet.scale_ups().await.len(), 1);
    }

    #[tokio::test]
    async fn attribute_updates_are_applied_and_deletable() {
        let fleet = InMemoryAgentManagement::new();
        fleet
            .add_group(group("ig-1"), vec![instance("i-1", "ig-1")])
            .await;

        let id = InstanceId::new("i-1");
        fleet
            .update_instance_attributes(
                &id,
                HashMap::from([(attributes::REMOVABLE.to_string(), "1000".to_string())]),
            )
            .await
            .unwrap();
        assert_eq!(
            fleet.instance(&id).await.unwrap().removable_marked_at(),
            Some(1_000)
        );

        fleet
            .delete_instance_attributes(&id, vec![attributes::REMOVABLE.to_string()])
            .await
            .unwrap();
        assert_eq!(fleet.instance(&id).await.unwrap().removable_marked_at(), None);
    }

    #[tokio::test]
    async fn unknown_instance_type_is_an_error() {
        let fleet = InMemoryAgentManagement::new();
        let err = fleet.resource_limits("x1.unknown").await.unwrap_err();
        assert!(matches!(err, AgentManagementError::UnknownInstanceType(_)));
    }
}
