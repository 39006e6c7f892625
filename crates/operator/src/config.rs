//! Operator configuration

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use slice_lib::controller::ControllerConfig;
use slice_lib::reconciler::ReconcilerConfig;
use slice_lib::router::RouterClientConfig;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "SLICE_OPERATOR_CONFIG";

const ENV_PREFIX: &str = "SLICE_OPERATOR";

/// Operator configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OperatorConfig {
    /// Name of this worker cluster as registered with the hub
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Hub project namespace holding this cluster's worker slice configs
    #[serde(default = "default_hub_namespace")]
    pub hub_namespace: String,

    /// Kubeconfig for the hub cluster; the local cluster is used when unset
    #[serde(default)]
    pub hub_kubeconfig: Option<String>,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_resource_usage_interval")]
    pub resource_usage_interval_secs: u64,

    /// Slice router sidecar address, `{slice}` is substituted
    #[serde(default = "default_router_address_template")]
    pub router_address_template: String,

    /// Per external call timeout within a reconcile pass
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Connectivity passes allowed per slice per tick
    #[serde(default = "default_max_app_pod_steps")]
    pub max_app_pod_steps: usize,
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_hub_namespace() -> String {
    std::env::var("HUB_PROJECT_NAMESPACE").unwrap_or_else(|_| "kubeslice-default".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_resource_usage_interval() -> u64 {
    60
}

fn default_router_address_template() -> String {
    RouterClientConfig::default().address_template
}

fn default_call_timeout() -> u64 {
    30
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_app_pod_steps() -> usize {
    10
}

impl OperatorConfig {
    /// Load configuration from the file named by `SLICE_OPERATOR_CONFIG`
    /// (if any), overridden by `SLICE_OPERATOR_*` environment variables
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_FILE_ENV).ok();
        Self::load_from(file.as_deref().map(Path::new))
    }

    pub fn load_from(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read operator configuration")?;

        config
            .try_deserialize()
            .context("Invalid operator configuration")
    }

    pub fn router(&self) -> RouterClientConfig {
        RouterClientConfig {
            address_template: self.router_address_template.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    pub fn controller(&self) -> ControllerConfig {
        ControllerConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            resource_usage_interval: Duration::from_secs(self.resource_usage_interval_secs),
            max_app_pod_steps: self.max_app_pod_steps,
            ..Default::default()
        }
    }
}
