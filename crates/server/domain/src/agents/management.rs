//! Port to the fleet management service that owns instance groups.

use super::{AgentInstance, AgentInstanceGroup, ResourceDimension};
use crate::shared_kernel::{DomainError, InstanceGroupId, InstanceId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Errors surfaced by the agent management collaborator.
#[derive(Debug, thiserror::Error)]
pub enum AgentManagementError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Unknown instance type: {0}")]
    UnknownInstanceType(String),

    #[error("Instance group not found: {0}")]
    InstanceGroupNotFound(InstanceGroupId),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<AgentManagementError> for DomainError {
    fn from(err: AgentManagementError) -> Self {
        match err {
            AgentManagementError::UnknownInstanceType(instance_type) => {
                DomainError::UnknownInstanceType { instance_type }
            }
            AgentManagementError::InstanceGroupNotFound(group_id) => {
                DomainError::InstanceGroupNotFound { group_id }
            }
            AgentManagementError::InstanceNotFound(instance_id) => {
                DomainError::InstanceNotFound { instance_id }
            }
            other => DomainError::ExternalServiceError {
                service: "agent-management".to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Operations the autoscaler needs from the fleet management service.
///
/// `scale_up` is target-relative: it raises the group's desired count and is
/// idempotent with respect to the resulting target, so a repeated delta
/// against a refreshed snapshot converges instead of compounding.
#[async_trait]
pub trait AgentManagement: Send + Sync {
    async fn instance_groups(&self) -> Result<Vec<AgentInstanceGroup>, AgentManagementError>;

    async fn instances(
        &self,
        group_id: &InstanceGroupId,
    ) -> Result<Vec<AgentInstance>, AgentManagementError>;

    /// Resource size of one machine of the given instance type.
    async fn resource_limits(
        &self,
        instance_type: &str,
    ) -> Result<ResourceDimension, AgentManagementError>;

    async fn scale_up(
        &self,
        group_id: &InstanceGroupId,
        delta: u32,
    ) -> Result<(), AgentManagementError>;

    async fn update_instance_attributes(
        &self,
        instance_id: &InstanceId,
        attributes: HashMap<String, String>,
    ) -> Result<(), AgentManagementError>;

    async fn delete_instance_attributes(
        &self,
        instance_id: &InstanceId,
        keys: Vec<String>,
    ) -> Result<(), AgentManagementError>;
}
