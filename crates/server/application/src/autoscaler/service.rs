//! The autoscaling control loop.
//!
//! One logical actor: after an activation delay it evaluates the cluster at
//! a fixed cadence, bounded by a hard per-evaluation timeout. Errors inside
//! an evaluation are logged and swallowed so the loop never dies from a
//! transient fault.

use super::evaluator;
use super::execution::{
    SCALE_DOWN_TOKEN_BUCKET_CAPACITY, SCALE_UP_TOKEN_BUCKET_CAPACITY, TierExecution,
};
use super::planner;
use super::recent::RecentlyScaledTasks;
use super::snapshot::ClusterSnapshot;
use super::{MetricsSink, TierGauges};
use hodei_fleet_domain::Tier;
use hodei_fleet_domain::agents::{AgentManagement, ResourceDimension, attributes};
use hodei_fleet_domain::jobs::JobOperations;
use hodei_fleet_domain::scheduling::{FailureKind, SchedulingFeed};
use hodei_fleet_domain::shared_kernel::{InstanceGroupId, InstanceId, Result, TaskId};
use hodei_fleet_domain::time::{Clock, has_elapsed};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const TASK_IDS_PREVIOUSLY_SCALED_TTL_MS: u64 = 600_000;

/// Per-tier scaling policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TierScalingConfig {
    /// Instance type whose resource size defines the tier's scaling unit.
    pub primary_instance_type: String,
    /// Idle agents to keep warm at all times.
    pub min_idle: u32,
    /// Idle agents above which scale-down kicks in.
    pub max_idle: u32,
    pub scale_up_cooldown_ms: u64,
    pub scale_down_cooldown_ms: u64,
    /// Freshly launched agents are not counted as idle until this elapses.
    pub idle_instance_grace_period_ms: u64,
    /// Accepted tasks older than this count toward scale-up demand.
    pub task_slo_ms: u64,
}

impl Default for TierScalingConfig {
    fn default() -> Self {
        Self {
            primary_instance_type: "m5.large".to_string(),
            min_idle: 0,
            max_idle: 5,
            scale_up_cooldown_ms: 60_000,
            scale_down_cooldown_ms: 300_000,
            idle_instance_grace_period_ms: 600_000,
            task_slo_ms: 300_000,
        }
    }
}

/// Configuration for the autoscaling loop.
#[derive(Debug, Clone)]
pub struct AutoScalerConfig {
    pub enabled: bool,
    /// Grace period after activation before the first evaluation.
    pub activation_delay: Duration,
    pub iteration_interval: Duration,
    /// Hard deadline for one evaluation including its outbound actions.
    pub evaluation_timeout: Duration,
    /// A `REMOVABLE` mark older than this is reclaimed by the guard.
    pub agent_instance_removable_timeout_ms: u64,
    pub tiers: HashMap<Tier, TierScalingConfig>,
}

impl Default for AutoScalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_delay: Duration::from_millis(300_000),
            iteration_interval: Duration::from_millis(30_000),
            evaluation_timeout: Duration::from_millis(300_000),
            agent_instance_removable_timeout_ms: 600_000,
            tiers: Tier::ALL
                .into_iter()
                .map(|tier| (tier, TierScalingConfig::default()))
                .collect(),
        }
    }
}

/// Outbound action planned by one evaluation. Actions run sequentially;
/// individual failures are logged and do not abort the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleAction {
    ScaleUp {
        group_id: InstanceGroupId,
        delta: u32,
    },
    MarkRemovable {
        instance_id: InstanceId,
        marked_at: i64,
    },
    ResetRemovable {
        instance_id: InstanceId,
    },
}

/// What one evaluation decided and managed to submit.
#[derive(Debug, Default, Clone)]
pub struct IterationOutcome {
    pub agents_scaled_up: u32,
    pub instances_marked_removable: u32,
    pub removable_marks_reset: u32,
    pub action_errors: u32,
}

impl IterationOutcome {
    pub fn summary(&self) -> String {
        format!(
            "agent autoscaler: {} agents scaled up, {} instances marked removable, {} marks reset, {} action errors",
            self.agents_scaled_up,
            self.instances_marked_removable,
            self.removable_marks_reset,
            self.action_errors
        )
    }
}

struct ScalerState {
    tiers: HashMap<Tier, TierExecution>,
    recently_scaled: RecentlyScaledTasks,
}

/// Adds agents to, and marks agents for removal from, the fleet's instance
/// groups, one evaluation at a time.
pub struct ClusterAgentAutoScaler {
    config: AutoScalerConfig,
    agent_management: Arc<dyn AgentManagement>,
    job_operations: Arc<dyn JobOperations>,
    scheduling_feed: Arc<dyn SchedulingFeed>,
    metrics: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    state: Mutex<ScalerState>,
    shutdown: watch::Sender<bool>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterAgentAutoScaler {
    pub fn new(
        config: AutoScalerConfig,
        agent_management: Arc<dyn AgentManagement>,
        job_operations: Arc<dyn JobOperations>,
        scheduling_feed: Arc<dyn SchedulingFeed>,
        metrics: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            agent_management,
            job_operations,
            scheduling_feed,
            metrics,
            clock,
            state: Mutex::new(ScalerState {
                tiers: HashMap::new(),
                recently_scaled: RecentlyScaledTasks::new(TASK_IDS_PREVIOUSLY_SCALED_TTL_MS),
            }),
            shutdown,
            loop_task: Mutex::new(None),
        }
    }

    /// Starts the control loop. Invoked on leader activation; a second call
    /// while the loop is running is ignored.
    pub async fn start(self: Arc<Self>) {
        let mut loop_task = self.loop_task.lock().await;
        if loop_task.is_some() {
            warn!("agent autoscaler already started");
            return;
        }
        self.shutdown.send_replace(false);
        let scaler = Arc::clone(&self);
        *loop_task = Some(tokio::spawn(async move { scaler.run().await }));
        info!(
            activation_delay_ms = self.config.activation_delay.as_millis() as u64,
            iteration_interval_ms = self.config.iteration_interval.as_millis() as u64,
            "agent autoscaler started"
        );
    }

    /// Stops the loop. An in-flight evaluation is allowed to finish up to
    /// its deadline; no new one is scheduled.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.loop_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("agent autoscaler loop task ended abnormally: {}", e);
            }
        }
        info!("agent autoscaler stopped");
    }

    async fn run(&self) {
        let mut shutdown = self.shutdown.subscribe();

        tokio::select! {
            _ = tokio::time::sleep(self.config.activation_delay) => {}
            _ = shutdown.changed() => return,
        }

        let mut ticker = tokio::time::interval(self.config.iteration_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = ticker.tick() => {}
            }
            tick += 1;
            // The evaluation itself is never cancelled by shutdown; its own
            // timeout is the only bound.
            match tokio::time::timeout(self.config.evaluation_timeout, self.run_iteration()).await {
                Ok(Ok(outcome)) => {
                    info!(target: "hodei::autoscaler", "[Tick {}] {}", tick, outcome.summary());
                }
                Ok(Err(e)) => warn!("agent scaling iteration error: {}", e),
                Err(_) => warn!(
                    "agent scaling iteration timed out after {:?}",
                    self.config.evaluation_timeout
                ),
            }
            if *shutdown.borrow() {
                return;
            }
        }
    }

    /// One full evaluation: snapshot, per-tier scaling decisions, reaper
    /// guard, metrics push, then sequential submission of the actions.
    pub async fn run_iteration(&self) -> Result<IterationOutcome> {
        if !self.config.enabled {
            debug!("auto scaling agents is not enabled");
            return Ok(IterationOutcome::default());
        }

        let snapshot = ClusterSnapshot::capture(
            self.agent_management.as_ref(),
            self.job_operations.as_ref(),
            self.scheduling_feed.as_ref(),
            self.clock.as_ref(),
        )
        .await?;

        // Resource units are looked up outside the state lock; a tier whose
        // primary instance type is misconfigured is skipped for this round.
        let mut tier_dimensions: HashMap<Tier, ResourceDimension> = HashMap::new();
        for tier in Tier::ALL {
            let Some(tier_config) = self.config.tiers.get(&tier) else {
                warn!("{} has no scaling configuration, skipping", tier);
                continue;
            };
            match self
                .agent_management
                .resource_limits(&tier_config.primary_instance_type)
                .await
            {
                Ok(dimension) => {
                    tier_dimensions.insert(tier, dimension);
                }
                Err(e) => warn!(
                    "{} resource limits unavailable for instance type {}, skipping tier: {}",
                    tier, tier_config.primary_instance_type, e
                ),
            }
        }

        let ignoring_base: Vec<FailureKind> = FailureKind::NEVER_TRIGGER_AUTOSCALING.to_vec();
        let mut ignoring_with_launch_guard = ignoring_base.clone();
        ignoring_with_launch_guard.push(FailureKind::LaunchGuard);
        let failed_by_tier = snapshot.failed_task_ids_by_tier(&ignoring_base);
        let placement_failures_by_tier =
            snapshot.failed_task_ids_by_tier(&ignoring_with_launch_guard);

        let mut actions: Vec<ScaleAction> = Vec::new();
        {
            let mut state = self.state.lock().await;
            let ScalerState {
                tiers,
                recently_scaled,
            } = &mut *state;
            for tier in Tier::ALL {
                let Some(dimension) = tier_dimensions.get(&tier) else {
                    continue;
                };
                let Some(tier_config) = self.config.tiers.get(&tier) else {
                    continue;
                };
                let exec = tiers
                    .entry(tier)
                    .or_insert_with(|| TierExecution::new(self.clock.wall_time()));
                self.evaluate_tier(
                    tier,
                    tier_config,
                    dimension,
                    &snapshot,
                    failed_by_tier.get(&tier),
                    placement_failures_by_tier.get(&tier),
                    exec,
                    recently_scaled,
                    &mut actions,
                );
            }

            for (tier, exec) in tiers.iter() {
                self.metrics.record_tier(*tier, &exec.gauges);
            }
        }

        let stuck = snapshot.removable_instances_past(self.config.agent_instance_removable_timeout_ms);
        if !stuck.is_empty() {
            info!(
                "resetting {} agent instances stuck in removable state",
                stuck.len()
            );
            actions.extend(stuck.into_iter().map(|instance| ScaleAction::ResetRemovable {
                instance_id: instance.id.clone(),
            }));
        }

        Ok(self.execute_actions(actions).await)
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_tier(
        &self,
        tier: Tier,
        tier_config: &TierScalingConfig,
        dimension: &ResourceDimension,
        snapshot: &ClusterSnapshot,
        failed_task_ids: Option<&HashSet<TaskId>>,
        placement_failure_task_ids: Option<&HashSet<TaskId>>,
        exec: &mut TierExecution,
        recently_scaled: &mut RecentlyScaledTasks,
        actions: &mut Vec<ScaleAction>,
    ) {
        info!("starting scaling actions for tier: {}", tier);
        exec.gauges = TierGauges::default();

        let scalable_groups = evaluator::scalable_groups_for_tier(
            &snapshot.active_groups,
            tier,
            &tier_config.primary_instance_type,
        );
        let idle_instances = evaluator::idle_instances_for_tier(
            snapshot,
            tier,
            &tier_config.primary_instance_type,
            tier_config.idle_instance_grace_period_ms,
        );
        exec.gauges.total_idle_instances = idle_instances.len() as i64;
        debug!("{} idle instances({})", tier, idle_instances.len());

        let empty = HashSet::new();
        let failed_task_ids = failed_task_ids.unwrap_or(&empty);
        exec.gauges.total_failed_tasks = failed_task_ids.len() as i64;
        debug!("{} failed tasks({})", tier, failed_task_ids.len());

        let mut agents_to_scale_up: u32 = 0;
        let mut tasks_for_scale_up: HashSet<TaskId> = HashSet::new();
        let mut used_scale_up_cooldown = false;

        if has_elapsed(exec.last_scale_up, snapshot.now, tier_config.scale_up_cooldown_ms) {
            if (idle_instances.len() as u32) < tier_config.min_idle {
                let shortfall = tier_config.min_idle - idle_instances.len() as u32;
                info!(
                    "{} needs {} instances to satisfy min idle {}",
                    tier, shortfall, tier_config.min_idle
                );
                agents_to_scale_up += shortfall;
            }

            let placement_failure_task_ids = placement_failure_task_ids.unwrap_or(&empty);
            let scalable_placement_failures = evaluator::filter_scalable_tasks(
                placement_failure_task_ids,
                snapshot,
                dimension,
            );
            debug!(
                "{} scalable placement failures({})",
                tier,
                scalable_placement_failures.len()
            );

            let past_slo =
                evaluator::tasks_past_slo(failed_task_ids, snapshot, tier_config.task_slo_ms);
            let scalable_past_slo = evaluator::filter_scalable_tasks(&past_slo, snapshot, dimension);
            exec.gauges.total_tasks_past_slo = scalable_past_slo.len() as i64;
            debug!("{} tasks past slo({})", tier, scalable_past_slo.len());

            for task_id in scalable_placement_failures
                .union(&scalable_past_slo)
            {
                if recently_scaled.try_claim(task_id, snapshot.now) {
                    tasks_for_scale_up.insert(task_id.clone());
                }
            }
            exec.gauges.total_tasks_for_scale_up = tasks_for_scale_up.len() as i64;
            info!(
                "{} had tasks to scale up({})",
                tier,
                tasks_for_scale_up.len()
            );

            let by_dominant_resource = evaluator::scale_up_count_by_dominant_resource(
                &tasks_for_scale_up,
                snapshot,
                dimension,
            );
            info!(
                "{} needs {} instances based on dominant resource",
                tier, by_dominant_resource
            );
            agents_to_scale_up += by_dominant_resource;
            if agents_to_scale_up > 0 {
                used_scale_up_cooldown = true;
            }
        }

        exec.gauges.total_agents_to_scale_up = agents_to_scale_up as i64;
        info!("{} needs {} instances", tier, agents_to_scale_up);

        let mut scaling_up = false;
        if agents_to_scale_up > 0 {
            let max_tokens = SCALE_UP_TOKEN_BUCKET_CAPACITY.min(agents_to_scale_up as u64);
            if let Some((granted, next_bucket)) =
                exec.scale_up_bucket
                    .try_take(1, max_tokens, self.clock.wall_time())
            {
                exec.scale_up_bucket = next_bucket;
                let planned = planner::plan_scale_up(&scalable_groups, granted as u32);
                let planned_count: u32 = planned.iter().map(|p| p.delta).sum();
                exec.gauges.total_agents_being_scaled_up = planned_count as i64;
                if planned_count > 0 {
                    info!(
                        "attempting to scale up {} tier by {} agent instances",
                        tier, planned_count
                    );
                    actions.extend(planned.into_iter().map(|p| ScaleAction::ScaleUp {
                        group_id: p.group_id,
                        delta: p.delta,
                    }));
                    scaling_up = true;
                    // Failing to find capacity inside the groups does not
                    // burn the cooldown.
                    if used_scale_up_cooldown {
                        exec.last_scale_up = self.clock.wall_time();
                    }
                }
            }
        }

        if !scaling_up
            && has_elapsed(
                exec.last_scale_down,
                snapshot.now,
                tier_config.scale_down_cooldown_ms,
            )
        {
            let surplus = (idle_instances.len() as u32).saturating_sub(tier_config.max_idle);
            exec.gauges.total_agents_to_scale_down = surplus as i64;
            if surplus > 0 {
                info!(
                    "{} can remove {} instances to satisfy max idle {}",
                    tier, surplus, tier_config.max_idle
                );
                let max_tokens = SCALE_DOWN_TOKEN_BUCKET_CAPACITY.min(surplus as u64);
                if let Some((granted, next_bucket)) =
                    exec.scale_down_bucket
                        .try_take(1, max_tokens, self.clock.wall_time())
                {
                    exec.scale_down_bucket = next_bucket;
                    let selected = planner::plan_scale_down(
                        &idle_instances,
                        &scalable_groups,
                        &snapshot.instances_by_group,
                        granted as u32,
                    );
                    exec.gauges.total_agents_being_scaled_down = selected.len() as i64;
                    if !selected.is_empty() {
                        info!(
                            "attempting to scale down {} tier by {} agent instances",
                            tier,
                            selected.len()
                        );
                        let marked_at = self.clock.wall_time();
                        actions.extend(selected.into_iter().map(|instance_id| {
                            ScaleAction::MarkRemovable {
                                instance_id,
                                marked_at,
                            }
                        }));
                        exec.last_scale_down = self.clock.wall_time();
                    }
                }
            }
        }
        info!("finishing scaling actions for tier: {}", tier);
    }

    async fn execute_actions(&self, actions: Vec<ScaleAction>) -> IterationOutcome {
        let mut outcome = IterationOutcome::default();
        for action in actions {
            match action {
                ScaleAction::ScaleUp { group_id, delta } => {
                    match self.agent_management.scale_up(&group_id, delta).await {
                        Ok(()) => outcome.agents_scaled_up += delta,
                        Err(e) => {
                            outcome.action_errors += 1;
                            warn!("scale up of group {} by {} failed: {}", group_id, delta, e);
                        }
                    }
                }
                ScaleAction::MarkRemovable {
                    instance_id,
                    marked_at,
                } => {
                    let removable_attributes = HashMap::from([
                        (attributes::REMOVABLE.to_string(), marked_at.to_string()),
                        (
                            attributes::SYSTEM_NO_PLACEMENT.to_string(),
                            "true".to_string(),
                        ),
                    ]);
                    match self
                        .agent_management
                        .update_instance_attributes(&instance_id, removable_attributes)
                        .await
                    {
                        Ok(()) => outcome.instances_marked_removable += 1,
                        Err(e) => {
                            outcome.action_errors += 1;
                            warn!("marking instance {} removable failed: {}", instance_id, e);
                        }
                    }
                }
                ScaleAction::ResetRemovable { instance_id } => {
                    let keys = vec![
                        attributes::REMOVABLE.to_string(),
                        attributes::SYSTEM_NO_PLACEMENT.to_string(),
                    ];
                    match self
                        .agent_management
                        .delete_instance_attributes(&instance_id, keys)
                        .await
                    {
                        Ok(()) => outcome.removable_marks_reset += 1,
                        Err(e) => {
                            outcome.action_errors += 1;
                            warn!(
                                "resetting removable mark on instance {} failed: {}",
                                instance_id, e
                            );
                        }
                    }
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hodei_fleet_domain::testing::{
        InMemoryAgentManagement, InMemoryJobOperations, InMemorySchedulingFeed, ManualClock,
    };
    use crate::autoscaler::NoopMetricsSink;

    fn scaler(
        config: AutoScalerConfig,
        fleet: &InMemoryAgentManagement,
        clock: &Arc<ManualClock>,
    ) -> ClusterAgentAutoScaler {
        ClusterAgentAutoScaler::new(
            config,
            Arc::new(fleet.clone()),
            Arc::new(InMemoryJobOperations::new()),
            Arc::new(InMemorySchedulingFeed::new()),
            Arc::new(NoopMetricsSink),
            Arc::clone(clock) as Arc<dyn Clock>,
        )
    }

    #[tokio::test]
    async fn disabled_autoscaler_takes_no_action() {
        let fleet = InMemoryAgentManagement::new();
        let clock = Arc::new(ManualClock::new(0));
        let config = AutoScalerConfig {
            enabled: false,
            ..Default::default()
        };
        let scaler = scaler(config, &fleet, &clock);

        let outcome = scaler.run_iteration().await.expect("iteration");
        assert_eq!(outcome.agents_scaled_up, 0);
        assert!(fleet.scale_ups().await.is_empty());
    }

    #[tokio::test]
    async fn misconfigured_tier_is_skipped_without_failing_the_iteration() {
        // No resource limits registered: both tiers skip, nothing breaks.
        let fleet = InMemoryAgentManagement::new();
        let clock = Arc::new(ManualClock::new(1_000_000));
        let scaler = scaler(AutoScalerConfig::default(), &fleet, &clock);

        let outcome = scaler.run_iteration().await.expect("iteration");
        assert_eq!(outcome.agents_scaled_up, 0);
        assert_eq!(outcome.action_errors, 0);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_joins_the_loop() {
        let fleet = InMemoryAgentManagement::new();
        let clock = Arc::new(ManualClock::new(0));
        let scaler = Arc::new(scaler(AutoScalerConfig::default(), &fleet, &clock));

        Arc::clone(&scaler).start().await;
        Arc::clone(&scaler).start().await;
        scaler.stop().await;
        assert!(scaler.loop_task.lock().await.is_none());
    }
}
