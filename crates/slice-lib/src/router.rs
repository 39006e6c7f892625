//! Connection registry client for slice routers
//!
//! Each slice runs a router whose sidecar knows which endpoints are attached
//! to the slice's network service. This module provides:
//! - the `ConnectionRegistry` trait consumed by the app pod reconciler
//! - a gRPC implementation with one cached channel per slice

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::ConnectedEndpoint;
use crate::proto::{ClientConnectionInfo, ClientConnectionInfoRequest, SliceRouterSidecarServiceClient};

/// Placeholder replaced with the slice name in router addresses
pub const SLICE_PLACEHOLDER: &str = "{slice}";

/// Query for the endpoints attached to a slice's router
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Every endpoint currently attached, app pods and gateways alike
    async fn connected_endpoints(&self, slice_name: &str) -> Result<Vec<ConnectedEndpoint>>;
}

impl From<ClientConnectionInfo> for ConnectedEndpoint {
    fn from(info: ClientConnectionInfo) -> Self {
        Self {
            pod_name: info.pod_name,
            pod_namespace: info.pod_namespace,
            mesh_ip: info.nsm_ip,
            mesh_peer_ip: info.nsm_peer_ip,
            mesh_interface: info.nsm_interface,
        }
    }
}

/// Configuration for the slice router client
#[derive(Debug, Clone)]
pub struct RouterClientConfig {
    /// Router sidecar address, `{slice}` is substituted
    pub address_template: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RouterClientConfig {
    fn default() -> Self {
        Self {
            address_template: "http://vl3-slice-router-{slice}:5000".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RouterClientConfig {
    pub fn address_for(&self, slice_name: &str) -> String {
        self.address_template.replace(SLICE_PLACEHOLDER, slice_name)
    }
}

/// gRPC client for slice router sidecars
pub struct SliceRouterClient {
    config: RouterClientConfig,
    channels: Arc<RwLock<HashMap<String, Channel>>>,
}

impl SliceRouterClient {
    pub fn new(config: RouterClientConfig) -> Self {
        Self {
            config,
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of slices with a cached channel
    pub async fn cached_channels(&self) -> usize {
        self.channels.read().await.len()
    }

    async fn connect(&self, slice_name: &str) -> Result<Channel> {
        let address = self.config.address_for(slice_name);
        let registry_error = |message: String| Error::Registry {
            slice: slice_name.to_string(),
            message,
        };

        let channel = Endpoint::from_shared(address.clone())
            .map_err(|e| registry_error(format!("invalid router address {address}: {e}")))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .connect()
            .await
            .map_err(|e| registry_error(format!("failed to connect to {address}: {e}")))?;

        info!(slice = %slice_name, address = %address, "Connected to slice router");
        Ok(channel)
    }

    /// Get the cached channel for a slice or open a new one
    async fn channel(&self, slice_name: &str) -> Result<Channel> {
        if let Some(channel) = self.channels.read().await.get(slice_name) {
            return Ok(channel.clone());
        }

        let channel = self.connect(slice_name).await?;
        self.channels
            .write()
            .await
            .insert(slice_name.to_string(), channel.clone());
        Ok(channel)
    }

    /// Forget a slice's channel so the next query reconnects
    pub async fn drop_channel(&self, slice_name: &str) {
        if self.channels.write().await.remove(slice_name).is_some() {
            debug!(slice = %slice_name, "Dropped slice router channel");
        }
    }
}

#[async_trait]
impl ConnectionRegistry for SliceRouterClient {
    async fn connected_endpoints(&self, slice_name: &str) -> Result<Vec<ConnectedEndpoint>> {
        let channel = self.channel(slice_name).await?;
        let mut client = SliceRouterSidecarServiceClient::new(channel);

        let request = tonic::Request::new(ClientConnectionInfoRequest {
            slice_name: slice_name.to_string(),
        });

        match client.get_client_connection_info(request).await {
            Ok(response) => {
                let info = response.into_inner();
                debug!(
                    slice = %slice_name,
                    connections = info.connections.len(),
                    collected_at = ?info.collected_at,
                    "Got slice router connections"
                );
                Ok(info.connections.into_iter().map(Into::into).collect())
            }
            Err(status) => {
                self.drop_channel(slice_name).await;
                warn!(
                    slice = %slice_name,
                    code = ?status.code(),
                    "Slice router query failed"
                );
                Err(Error::Registry {
                    slice: slice_name.to_string(),
                    message: status.message().to_string(),
                })
            }
        }
    }
}
