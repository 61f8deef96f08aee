//! Gateway service entry point.
//!
//! Webhook ingest with WebSocket fan-out to subscribers.

use anyhow::{Context, Result};
use external_services::azure::{ArmClient, SqlInventory};
use external_services::JsonRuleStore;
use gateway::{create_router, AppState, BroadcastHub, GatewayConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use normalizer::{AlertAdapter, NoTopology, Normalizer, RuleTable, TopologyProvider};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Gateway service");

    let config = GatewayConfig::from_env()?;

    info!("Configuration:");
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  RULES_FILE: {}", config.rules_file.display());
    info!("  HEARTBEAT_INTERVAL: {:?}", config.heartbeat_interval);
    info!("  CONNECTION_TIMEOUT: {:?}", config.connection_timeout);
    info!("  TOPOLOGY_TIMEOUT: {:?}", config.topology_timeout);
    info!("  AZURE_MANAGEMENT_URL: {}", config.azure_management_url);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()
        .context("Failed to start Prometheus exporter")?;
    info!("Prometheus metrics server started on port {}", config.metrics_port);

    // Load rules
    let rule_store = Arc::new(JsonRuleStore::open(&config.rules_file).await?);
    let rules = Arc::new(RuleTable::new());
    rules.reload_from(rule_store.as_ref()).await?;

    // Topology source
    let arm = ArmClient::new(&config.azure_management_url);
    let arm = match &config.azure_access_token {
        Some(token) => arm.with_access_token(token),
        None => arm,
    };
    let topology: Arc<dyn TopologyProvider> = if config.azure_access_token.is_some() {
        Arc::new(arm.clone())
    } else {
        warn!("AZURE_ACCESS_TOKEN not set, failover enrichment disabled");
        Arc::new(NoTopology)
    };
    let inventory: Arc<dyn SqlInventory> = Arc::new(arm);

    let normalizer = Arc::new(Normalizer::new(
        rules,
        topology,
        config.normalizer_config(),
    ));
    let hub = BroadcastHub::new(config.hub_config());

    // Create application state
    let state = Arc::new(AppState {
        normalizer,
        rule_store,
        hub: hub.clone(),
        inventory,
        alerts: AlertAdapter::new(),
    });

    // Create HTTP router
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Closing {} subscribers", hub.connection_count());
            hub.close_all();
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
