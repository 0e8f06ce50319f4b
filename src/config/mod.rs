//! Desired cluster shape and process configuration.

pub mod desired_state;
pub mod environment;

pub use desired_state::{DesiredState, PersistenceMode, is_valid_storage_size, parse_persistence};
pub use environment::ClusterConfig;

use thiserror::Error;

/// Configuration errors. Raised before the cluster is touched.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),

    #[error("invalid value `{value}` for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("invalid desired state: {0}")]
    Validation(String),

    #[error("invalid desired state document: {0}")]
    Json(#[from] serde_json::Error),
}
