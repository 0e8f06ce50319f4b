//! Error types for the orchestrator.
//!
//! Defines the command-level error with classification for retry behavior.

use std::time::Duration;

use thiserror::Error;

use crate::client::ValkeyError;
use crate::config::ConfigError;
use crate::slots::PlanError;
use crate::topology::Address;

/// Error type for orchestrator operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, raised before the cluster is touched
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The cluster is in a shape the requested operation cannot handle
    #[error("Logic error: {0}")]
    Logic(String),

    /// The cluster reported problems before a destructive step
    #[error("Cluster unhealthy: {0}")]
    Unhealthy(String),

    /// A convergence wait ran out of time
    #[error("Timed out after {duration:?} waiting for {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// A driver call failed
    #[error("{operation} failed on {node}: {source}")]
    Driver {
        operation: String,
        node: Address,
        #[source]
        source: ValkeyError,
    },

    /// Slot reconciliation could not be planned
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl Error {
    pub(crate) fn logic(message: impl Into<String>) -> Self {
        Error::Logic(message.into())
    }

    pub(crate) fn driver(operation: &str, node: &Address, source: ValkeyError) -> Self {
        Error::Driver {
            operation: operation.to_string(),
            node: node.clone(),
            source,
        }
    }

    /// Structural violations that no amount of waiting will fix.
    pub fn is_logic_error(&self) -> bool {
        matches!(self, Error::Logic(_) | Error::Plan(_))
    }

    /// Check if running the command again may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Timeout { .. } | Error::Unhealthy(_) => true,
            Error::Driver { source, .. } => matches!(
                source,
                ValkeyError::Connection(_) | ValkeyError::Timeout { .. } | ValkeyError::Redis(_)
            ),
            Error::Config(_) | Error::Logic(_) | Error::Plan(_) => false,
        }
    }
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;
