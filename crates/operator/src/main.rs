//! Slice operator - slice status reconciliation for worker clusters
//!
//! Keeps each Slice's app pod connectivity in line with its slice router
//! and forwards namespace resource usage to the hub cluster.

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use slice_lib::{
    controller::SliceController,
    health::HealthRegistry,
    hub::HubClient,
    metrics_server::MetricsServerClient,
    observability::{OperatorMetrics, StructuredLogger},
    reconciler::{AppPodReconciler, ResourceUsageReconciler},
    router::SliceRouterClient,
    store::KubeStore,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::OperatorConfig::load()?;
    info!(
        cluster_name = %config.cluster_name,
        hub_namespace = %config.hub_namespace,
        "Operator configured"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let hub_client = hub_client(&config, &client).await?;

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = OperatorMetrics::new();
    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(OPERATOR_VERSION);

    let store = Arc::new(KubeStore::new(client.clone()));
    let registry = Arc::new(SliceRouterClient::new(config.router()));
    let metrics_source = Arc::new(MetricsServerClient::new(client));
    let publisher = Arc::new(HubClient::new(
        hub_client,
        &config.hub_namespace,
        &config.cluster_name,
    ));

    let app_pods = AppPodReconciler::new(
        store.clone(),
        registry,
        store.clone(),
        config.reconciler(),
    );
    let resource_usage = ResourceUsageReconciler::new(
        store.clone(),
        store.clone(),
        metrics_source,
        publisher,
        config.reconciler(),
    );
    let controller = SliceController::new(
        store,
        app_pods,
        resource_usage,
        health_registry.clone(),
        logger.clone(),
        config.controller(),
    );

    let app_state = Arc::new(api::AppState::new(health_registry, metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let controller_handle = tokio::spawn(controller.run(shutdown_rx));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    // Receiver may already be gone if the controller exited
    let _ = shutdown_tx.send(());
    controller_handle
        .await
        .context("Controller task panicked")?;

    info!("Shutdown complete");
    Ok(())
}

/// Client for the hub cluster, falling back to the local cluster
async fn hub_client(config: &config::OperatorConfig, local: &Client) -> Result<Client> {
    let Some(path) = &config.hub_kubeconfig else {
        return Ok(local.clone());
    };

    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read hub kubeconfig {path}"))?;
    let hub_config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("Invalid hub kubeconfig")?;

    Client::try_from(hub_config).context("Failed to create hub client")
}
