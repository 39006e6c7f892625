//! Error types for slice reconciliation
//!
//! Every variant carries the slice, namespace or component it concerns so a
//! failed pass can be attributed without re-reading logs.

use std::time::Duration;

use thiserror::Error;

use crate::health::components;

/// Result alias used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for slice reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error from the slice store or workload inventory
    #[error("kubernetes error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    /// The status write lost an optimistic-concurrency race
    #[error("status update of slice {slice} conflicted with a concurrent writer")]
    Conflict { slice: String },

    /// Status could not be encoded for the store
    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    /// The slice router could not be queried
    #[error("slice router query for {slice} failed: {message}")]
    Registry { slice: String, message: String },

    /// The metrics API could not be queried or returned unusable data
    #[error("metrics query for namespace {namespace} failed: {message}")]
    Metrics { namespace: String, message: String },

    /// The hub cluster rejected or never received the usage snapshot
    #[error("publishing resource usage of slice {slice} failed: {message}")]
    Publish { slice: String, message: String },

    /// A resource quantity could not be parsed or converted
    #[error("invalid quantity {value:?}: {reason}")]
    Quantity { value: String, reason: String },

    /// An external call exceeded its per-call budget
    #[error("{component} call timed out after {after:?}")]
    Timeout {
        component: &'static str,
        after: Duration,
    },
}

impl Error {
    pub(crate) fn quantity(value: &str, reason: impl Into<String>) -> Self {
        Error::Quantity {
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the outer trigger should retry the pass.
    ///
    /// Malformed quantities will not fix themselves on retry; everything else
    /// is an external condition that may clear.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Quantity { .. } | Error::Serialization { .. } => false,
            Error::Kube {
                source: kube::Error::Api(response),
            } => response.code == 409 || response.code == 429 || response.code >= 500,
            _ => true,
        }
    }

    /// Health component the failure is attributed to
    pub fn component(&self) -> &'static str {
        match self {
            Error::Kube { .. } | Error::Conflict { .. } | Error::Serialization { .. } => {
                components::SLICE_STORE
            }
            Error::Registry { .. } => components::CONNECTION_REGISTRY,
            Error::Metrics { .. } | Error::Quantity { .. } => components::METRICS_SERVER,
            Error::Publish { .. } => components::HUB,
            Error::Timeout { component, .. } => component,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_retryable_classification() {
        assert!(api_error(500).is_retryable());
        assert!(api_error(409).is_retryable());
        assert!(!api_error(404).is_retryable());
        assert!(!Error::quantity("12x", "unknown suffix").is_retryable());
        assert!(Error::Conflict {
            slice: "red".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_component_attribution() {
        let err = Error::Registry {
            slice: "red".to_string(),
            message: "unavailable".to_string(),
        };
        assert_eq!(err.component(), components::CONNECTION_REGISTRY);

        let err = Error::Timeout {
            component: components::HUB,
            after: Duration::from_secs(5),
        };
        assert_eq!(err.component(), components::HUB);
        assert_eq!(api_error(500).component(), components::SLICE_STORE);
    }
}
