//! Slice status reconciliation library
//!
//! This crate provides the core functionality for:
//! - App pod connectivity reconciliation against the slice router
//! - Namespace resource usage aggregation with hysteresis
//! - Clients for the slice router, the metrics API and the hub cluster
//! - Health checks and observability

pub mod controller;
pub mod error;
pub mod health;
pub mod hub;
pub mod metrics_server;
pub mod models;
pub mod observability;
pub mod proto;
pub mod reconciler;
pub mod router;
pub mod store;
pub mod units;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OperatorMetrics, StructuredLogger};
