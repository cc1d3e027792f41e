//! Per-tier execution state carried across iterations.

use hodei_fleet_domain::limiter::TokenBucket;

pub const SCALE_UP_TOKEN_BUCKET_CAPACITY: u64 = 50;
pub const SCALE_UP_TOKEN_BUCKET_REFILL_AMOUNT: u64 = 2;
pub const SCALE_UP_TOKEN_BUCKET_REFILL_INTERVAL_MS: u64 = 1_000;
pub const SCALE_DOWN_TOKEN_BUCKET_CAPACITY: u64 = 50;
pub const SCALE_DOWN_TOKEN_BUCKET_REFILL_AMOUNT: u64 = 2;
pub const SCALE_DOWN_TOKEN_BUCKET_REFILL_INTERVAL_MS: u64 = 1_000;

/// Gauge values computed for one tier during one evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierGauges {
    pub total_idle_instances: i64,
    pub total_failed_tasks: i64,
    pub total_tasks_past_slo: i64,
    pub total_tasks_for_scale_up: i64,
    pub total_agents_to_scale_up: i64,
    pub total_agents_being_scaled_up: i64,
    pub total_agents_to_scale_down: i64,
    pub total_agents_being_scaled_down: i64,
}

/// Mutable per-tier state: cooldown timestamps, both token buckets and the
/// gauges of the latest evaluation. All writes happen on the loop task.
#[derive(Debug)]
pub struct TierExecution {
    /// Wall-clock millis of the last scale-up that burned the cooldown.
    pub last_scale_up: i64,
    /// Wall-clock millis of the last scale-down.
    pub last_scale_down: i64,
    pub scale_up_bucket: TokenBucket,
    pub scale_down_bucket: TokenBucket,
    pub gauges: TierGauges,
}

impl TierExecution {
    pub fn new(now: i64) -> Self {
        Self {
            last_scale_up: 0,
            last_scale_down: 0,
            scale_up_bucket: TokenBucket::new(
                SCALE_UP_TOKEN_BUCKET_CAPACITY,
                SCALE_UP_TOKEN_BUCKET_REFILL_AMOUNT,
                SCALE_UP_TOKEN_BUCKET_REFILL_INTERVAL_MS,
                now,
            ),
            scale_down_bucket: TokenBucket::new(
                SCALE_DOWN_TOKEN_BUCKET_CAPACITY,
                SCALE_DOWN_TOKEN_BUCKET_REFILL_AMOUNT,
                SCALE_DOWN_TOKEN_BUCKET_REFILL_INTERVAL_MS,
                now,
            ),
            gauges: TierGauges::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_execution_has_full_buckets_and_no_cooldowns() {
        let exec = TierExecution::new(1_000);
        assert_eq!(exec.last_scale_up, 0);
        assert_eq!(exec.last_scale_down, 0);
        assert_eq!(
            exec.scale_up_bucket.tokens_at(1_000),
            SCALE_UP_TOKEN_BUCKET_CAPACITY
        );
        assert_eq!(
            exec.scale_down_bucket.tokens_at(1_000),
            SCALE_DOWN_TOKEN_BUCKET_CAPACITY
        );
        assert_eq!(exec.gauges, TierGauges::default());
    }
}
