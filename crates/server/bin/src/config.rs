use hodei_fleet_application::autoscaler::{AutoScalerConfig, TierScalingConfig};
use hodei_fleet_domain::Tier;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub auto_scaler: AutoScalerSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AutoScalerSettings {
    pub enabled: bool,
    pub activation_delay_ms: u64,
    pub iteration_interval_ms: u64,
    pub evaluation_timeout_ms: u64,
    pub agent_instance_removable_timeout_ms: u64,
    pub critical: TierSettings,
    pub flex: TierSettings,
}

impl Default for AutoScalerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            activation_delay_ms: 300_000,
            iteration_interval_ms: 30_000,
            evaluation_timeout_ms: 300_000,
            agent_instance_removable_timeout_ms: 600_000,
            critical: TierSettings::default(),
            flex: TierSettings::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TierSettings {
    pub primary_instance_type: String,
    pub min_idle: u32,
    pub max_idle: u32,
    pub scale_up_cooldown_ms: u64,
    pub scale_down_cooldown_ms: u64,
    pub idle_instance_grace_period_ms: u64,
    pub task_slo_ms: u64,
}

impl Default for TierSettings {
    fn default() -> Self {
        let defaults = TierScalingConfig::default();
        Self {
            primary_instance_type: defaults.primary_instance_type,
            min_idle: defaults.min_idle,
            max_idle: defaults.max_idle,
            scale_up_cooldown_ms: defaults.scale_up_cooldown_ms,
            scale_down_cooldown_ms: defaults.scale_down_cooldown_ms,
            idle_instance_grace_period_ms: defaults.idle_instance_grace_period_ms,
            task_slo_ms: defaults.task_slo_ms,
        }
    }
}

impl TierSettings {
    fn to_tier_config(&self) -> TierScalingConfig {
        TierScalingConfig {
            primary_instance_type: self.primary_instance_type.clone(),
            min_idle: self.min_idle,
            max_idle: self.max_idle,
            scale_up_cooldown_ms: self.scale_up_cooldown_ms,
            scale_down_cooldown_ms: self.scale_down_cooldown_ms,
            idle_instance_grace_period_ms: self.idle_instance_grace_period_ms,
            task_slo_ms: self.task_slo_ms,
        }
    }
}

impl AutoScalerSettings {
    pub fn to_config(&self) -> AutoScalerConfig {
        AutoScalerConfig {
            enabled: self.enabled,
            activation_delay: Duration::from_millis(self.activation_delay_ms),
            iteration_interval: Duration::from_millis(self.iteration_interval_ms),
            evaluation_timeout: Duration::from_millis(self.evaluation_timeout_ms),
            agent_instance_removable_timeout_ms: self.agent_instance_removable_timeout_ms,
            tiers: HashMap::from([
                (Tier::Critical, self.critical.to_tier_config()),
                (Tier::Flex, self.flex.to_tier_config()),
            ]),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    pub fn new() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(
                config::Environment::with_prefix("HODEI_FLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_application_config() {
        let settings = AutoScalerSettings::default();
        let config = settings.to_config();
        assert!(config.enabled);
        assert_eq!(config.iteration_interval, Duration::from_millis(30_000));
        assert_eq!(config.tiers.len(), 2);
        assert_eq!(
            config.tiers[&Tier::Flex],
            TierScalingConfig::default()
        );
    }
}
