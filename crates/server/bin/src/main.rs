//! Hodei Fleet Autoscaler Server
//!
//! Entry point for the cluster agent autoscaler: loads configuration,
//! starts the control loop on activation and serves health and metrics
//! endpoints.

mod config;

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tracing::{info, warn};

use hodei_fleet_application::autoscaler::{ClusterAgentAutoScaler, MetricsSink};
use hodei_fleet_domain::Tier;
use hodei_fleet_domain::agents::{
    AgentInstance, AgentInstanceGroup, InstanceGroupLifecycleState, InstanceLifecycleState,
    ResourceDimension,
};
use hodei_fleet_domain::shared_kernel::{InstanceGroupId, InstanceId};
use hodei_fleet_domain::testing::{
    InMemoryAgentManagement, InMemoryJobOperations, InMemorySchedulingFeed,
};
use hodei_fleet_domain::time::{Clock, SystemClock};
use hodei_fleet_infrastructure::metrics::AutoScalerMetrics;
use hodei_fleet_infrastructure::observability::{TracingConfig, init_tracing};

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::new()?;

    init_tracing(&TracingConfig {
        service_name: "hodei-fleet".to_string(),
        log_level: server_config.log_level.clone(),
    });

    info!("╔═══════════════════════════════════════════════════════════════╗");
    info!("║           Hodei Fleet - Cluster Agent Autoscaler              ║");
    info!("╚═══════════════════════════════════════════════════════════════╝");

    let metrics = Arc::new(AutoScalerMetrics::new()?);

    // The platform collaborators (agent management, scheduling feed, job
    // operations) are external services; until their wiring lands this
    // binary runs against the in-memory implementations.
    let fleet = InMemoryAgentManagement::new();
    let job_operations = InMemoryJobOperations::new();
    let scheduling_feed = InMemorySchedulingFeed::new();
    warn!("running with in-memory collaborators");

    let dev_mode = env::var("HODEI_FLEET_DEV_MODE").unwrap_or_default() == "1";
    if dev_mode {
        info!("🔓 Development mode ENABLED, seeding a sample fleet");
        seed_dev_fleet(&fleet, server_config.auto_scaler.flex.primary_instance_type.clone()).await;
    }

    let autoscaler = Arc::new(ClusterAgentAutoScaler::new(
        server_config.auto_scaler.to_config(),
        Arc::new(fleet),
        Arc::new(job_operations),
        Arc::new(scheduling_feed),
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        Arc::new(SystemClock) as Arc<dyn Clock>,
    ));
    Arc::clone(&autoscaler).start().await;

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(serve_metrics))
        .with_state(Arc::clone(&metrics));

    let addr = format!("0.0.0.0:{}", server_config.http_port);
    info!("serving health and metrics on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    autoscaler.stop().await;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn serve_metrics(State(metrics): State<Arc<AutoScalerMetrics>>) -> impl IntoResponse {
    match metrics.gather() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            warn!("failed to gather metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutdown signal received");
}

/// Seeds one Flex instance group so the loop has something to evaluate in
/// development.
async fn seed_dev_fleet(fleet: &InMemoryAgentManagement, instance_type: String) {
    fleet
        .set_resource_limits(
            &instance_type,
            ResourceDimension {
                cpu: 16.0,
                memory_mb: 65_536,
                disk_mb: 200_000,
                network_mbps: 10_000,
            },
        )
        .await;
    let group_id = InstanceGroupId::new("dev-flex-1");
    let instances = (0..2)
        .map(|i| AgentInstance {
            id: InstanceId::new(format!("dev-instance-{i}")),
            instance_group_id: group_id.clone(),
            lifecycle_state: InstanceLifecycleState::Started,
            launch_timestamp: 0,
            attributes: HashMap::new(),
        })
        .collect();
    fleet
        .add_group(
            AgentInstanceGroup {
                id: group_id,
                tier: Tier::Flex,
                instance_type,
                min: 0,
                current: 2,
                desired: 2,
                max: 10,
                lifecycle_state: InstanceGroupLifecycleState::Active,
                attributes: HashMap::new(),
            },
            instances,
        )
        .await;
}
