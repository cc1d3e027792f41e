//! Prometheus metrics for the autoscaler.
//!
//! One `IntGaugeVec` per emitted metric, labeled by tier. The autoscaler
//! pushes its gauge values here after every evaluation; this module holds
//! no reference back to it.

use hodei_fleet_application::autoscaler::{MetricsSink, TierGauges};
use hodei_fleet_domain::Tier;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

const METRIC_ROOT: &str = "hodei_fleet_autoscaler_";

/// Per-tier autoscaler gauges backed by a prometheus registry.
#[derive(Debug)]
pub struct AutoScalerMetrics {
    total_idle_instances: IntGaugeVec,
    total_failed_tasks: IntGaugeVec,
    total_tasks_past_slo: IntGaugeVec,
    total_tasks_for_scale_up: IntGaugeVec,
    total_agents_to_scale_up: IntGaugeVec,
    total_agents_being_scaled_up: IntGaugeVec,
    total_agents_to_scale_down: IntGaugeVec,
    total_agents_being_scaled_down: IntGaugeVec,
    registry: Registry,
}

impl AutoScalerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| {
            IntGaugeVec::new(Opts::new(format!("{METRIC_ROOT}{name}"), help), &["tier"])
        };

        let total_idle_instances =
            gauge("total_idle_instances", "Idle agent instances per tier")?;
        let total_failed_tasks = gauge(
            "total_failed_tasks",
            "Tasks that failed placement last iteration",
        )?;
        let total_tasks_past_slo =
            gauge("total_tasks_past_slo", "Scalable tasks past the tier SLO")?;
        let total_tasks_for_scale_up = gauge(
            "total_tasks_for_scale_up",
            "Tasks counted toward scale-up this iteration",
        )?;
        let total_agents_to_scale_up =
            gauge("total_agents_to_scale_up", "Proposed scale-up agent count")?;
        let total_agents_being_scaled_up = gauge(
            "total_agents_being_scaled_up",
            "Agents actually requested from instance groups",
        )?;
        let total_agents_to_scale_down = gauge(
            "total_agents_to_scale_down",
            "Proposed scale-down agent count",
        )?;
        let total_agents_being_scaled_down = gauge(
            "total_agents_being_scaled_down",
            "Instances actually marked removable",
        )?;

        let registry = Registry::new();
        registry.register(Box::new(total_idle_instances.clone()))?;
        registry.register(Box::new(total_failed_tasks.clone()))?;
        registry.register(Box::new(total_tasks_past_slo.clone()))?;
        registry.register(Box::new(total_tasks_for_scale_up.clone()))?;
        registry.register(Box::new(total_agents_to_scale_up.clone()))?;
        registry.register(Box::new(total_agents_being_scaled_up.clone()))?;
        registry.register(Box::new(total_agents_to_scale_down.clone()))?;
        registry.register(Box::new(total_agents_being_scaled_down.clone()))?;

        Ok(Self {
            total_idle_instances,
            total_failed_tasks,
            total_tasks_past_slo,
            total_tasks_for_scale_up,
            total_agents_to_scale_up,
            total_agents_being_scaled_up,
            total_agents_to_scale_down,
            total_agents_being_scaled_down,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Renders the registry in the Prometheus text format.
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl MetricsSink for AutoScalerMetrics {
    fn record_tier(&self, tier: Tier, gauges: &TierGauges) {
        let tier = tier.as_str();
        self.total_idle_instances
            .with_label_values(&[tier])
            .set(gauges.total_idle_instances);
        self.total_failed_tasks
            .with_label_values(&[tier])
            .set(gauges.total_failed_tasks);
        self.total_tasks_past_slo
            .with_label_values(&[tier])
            .set(gauges.total_tasks_past_slo);
        self.total_tasks_for_scale_up
            .with_label_values(&[tier])
            .set(gauges.total_tasks_for_scale_up);
        self.total_agents_to_scale_up
            .with_label_values(&[tier])
            .set(gauges.total_agents_to_scale_up);
        self.total_agents_being_scaled_up
            .with_label_values(&[tier])
            .set(gauges.total_agents_being_scaled_up);
        self.total_agents_to_scale_down
            .with_label_values(&[tier])
            .set(gauges.total_agents_to_scale_down);
        self.total_agents_being_scaled_down
            .with_label_values(&[tier])
            .set(gauges.total_agents_being_scaled_down);
    }
}
