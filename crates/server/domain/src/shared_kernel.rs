//! Shared kernel: identifiers, tiers and domain errors.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

opaque_id!(
    /// Identificador único para jobs
    JobId
);
opaque_id!(
    /// Identificador único para tasks
    TaskId
);
opaque_id!(
    /// Identifier of an agent instance, as reported by the cloud provider.
    InstanceId
);
opaque_id!(
    /// Identifier of an agent instance group.
    InstanceGroupId
);

/// Service tier an instance group (and the workloads placed on it) belongs to.
///
/// Tiers are evaluated independently by the autoscaler, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Critical,
    Flex,
}

impl Tier {
    /// All tiers, in evaluation order.
    pub const ALL: [Tier; 2] = [Tier::Critical, Tier::Flex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "critical",
            Tier::Flex => "flex",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errores del dominio
#[derive(thiserror::Error, Debug)]
pub enum DomainError {
    #[error("Unknown instance type: {instance_type}")]
    UnknownInstanceType { instance_type: String },

    #[error("Instance group not found: {group_id}")]
    InstanceGroupNotFound { group_id: InstanceGroupId },

    #[error("Agent instance not found: {instance_id}")]
    InstanceNotFound { instance_id: InstanceId },

    #[error("External service error: {service}: {message}")]
    ExternalServiceError { service: String, message: String },

    #[error("Operation timeout: {message}")]
    Timeout { message: String },

    #[error("Infrastructure error: {message}")]
    InfrastructureError { message: String },
}

pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_evaluation_order_is_critical_first() {
        assert_eq!(Tier::ALL[0], Tier::Critical);
        assert_eq!(Tier::ALL[1], Tier::Flex);
    }

    #[test]
    fn ids_display_their_raw_value() {
        let id = InstanceId::new("i-0abc123");
        assert_eq!(id.to_string(), "i-0abc123");
        assert_eq!(id.as_str(), "i-0abc123");
    }
}
