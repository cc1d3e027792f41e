//! Tracing initialization.

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for log output.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "hodei-fleet".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Installs the global fmt subscriber. Safe to call once per process;
/// repeated calls are ignored.
pub fn init_tracing(config: &TracingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let logging_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stdout);

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(logging_layer)
        .try_init();

    if result.is_ok() {
        info!("tracing initialized for service: {}", config.service_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let config = TracingConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }
}
