//! Cluster agent autoscaler.
//!
//! A single periodic control loop that, per tier, turns unschedulable-task
//! demand and idle-agent supply into scale-up requests and removable marks
//! on agent instances. See [`service::ClusterAgentAutoScaler`].

pub mod evaluator;
pub mod execution;
pub mod planner;
pub mod recent;
pub mod service;
pub mod snapshot;

pub use execution::TierGauges;
pub use service::{AutoScalerConfig, ClusterAgentAutoScaler, IterationOutcome, TierScalingConfig};
pub use snapshot::ClusterSnapshot;

use hodei_fleet_domain::Tier;

/// Sink the autoscaler pushes its per-tier gauge values into after every
/// evaluation. Keeping this a push keeps the metrics backend free of any
/// reference back to the autoscaler.
pub trait MetricsSink: Send + Sync {
    fn record_tier(&self, tier: Tier, gauges: &TierGauges);
}

/// Sink that discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_tier(&self, _tier: Tier, _gauges: &TierGauges) {}
}
