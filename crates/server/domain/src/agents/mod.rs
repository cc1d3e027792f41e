//! Agent fleet model: instance groups, instances and the resource
//! dimensions they expose to the scheduler.

pub mod management;

pub use management::{AgentManagement, AgentManagementError};

use crate::shared_kernel::{InstanceGroupId, InstanceId, Tier};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Attribute keys persisted on agent instances and instance groups.
///
/// `REMOVABLE` carries the wall-clock millis at which the instance was
/// marked for draining; `SYSTEM_NO_PLACEMENT` tells the placement engine to
/// stop sending tasks to the host; `NOT_REMOVABLE` makes an instance (or a
/// whole group) invisible to scale-down.
pub mod attributes {
    pub const REMOVABLE: &str = "removable";
    pub const NOT_REMOVABLE: &str = "notRemovable";
    pub const SYSTEM_NO_PLACEMENT: &str = "systemNoPlacement";
}

/// Lifecycle state of an instance group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceGroupLifecycleState {
    Inactive,
    Active,
    PhasedOut,
    Removable,
}

impl InstanceGroupLifecycleState {
    /// Sort key for scale-up preference: Active groups first, PhasedOut last.
    pub fn scale_up_preference(&self) -> u8 {
        match self {
            InstanceGroupLifecycleState::Active => 0,
            InstanceGroupLifecycleState::PhasedOut => 1,
            InstanceGroupLifecycleState::Inactive | InstanceGroupLifecycleState::Removable => 2,
        }
    }
}

/// Lifecycle state of a single agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceLifecycleState {
    Launching,
    Started,
    Stopping,
    Stopped,
}

/// A fleet of interchangeable agent machines sharing tier and instance type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstanceGroup {
    pub id: InstanceGroupId,
    pub tier: Tier,
    pub instance_type: String,
    pub min: u32,
    pub current: u32,
    pub desired: u32,
    pub max: u32,
    pub lifecycle_state: InstanceGroupLifecycleState,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl AgentInstanceGroup {
    /// How many more agents this group can accept before hitting `max`.
    pub fn scale_up_headroom(&self) -> u32 {
        self.max.saturating_sub(self.desired)
    }

    /// Groups in `Active` or `PhasedOut` state participate in autoscaling.
    pub fn is_considered(&self) -> bool {
        matches!(
            self.lifecycle_state,
            InstanceGroupLifecycleState::Active | InstanceGroupLifecycleState::PhasedOut
        )
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}

/// A single agent machine belonging to exactly one instance group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInstance {
    pub id: InstanceId,
    pub instance_group_id: InstanceGroupId,
    pub lifecycle_state: InstanceLifecycleState,
    /// Wall-clock millis at which the machine was launched.
    pub launch_timestamp: i64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl AgentInstance {
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Wall-clock millis at which the `REMOVABLE` mark was applied, if any.
    ///
    /// An unparseable value maps to zero so a corrupted mark ages out
    /// immediately instead of pinning the host in the draining state.
    pub fn removable_marked_at(&self) -> Option<i64> {
        let value = self.attributes.get(attributes::REMOVABLE)?;
        if value.is_empty() {
            return None;
        }
        Some(value.parse::<i64>().unwrap_or(0))
    }
}

/// Multi-dimensional resource size of a machine or a container request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceDimension {
    pub cpu: f64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub network_mbps: u64,
}

impl ResourceDimension {
    /// Whether a container request of this size fits on a machine of
    /// `capacity` size along every dimension.
    pub fn fits_within(&self, capacity: &ResourceDimension) -> bool {
        self.cpu <= capacity.cpu
            && self.memory_mb <= capacity.memory_mb
            && self.disk_mb <= capacity.disk_mb
            && self.network_mbps <= capacity.network_mbps
    }
}
