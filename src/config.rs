//! Configuration for the mediation layer.
//!
//! Kept deliberately small: the storage engine, routing and authentication layers
//! carry their own configuration and are external to this crate.

use serde::{Deserialize, Serialize};

/// Runtime options for a [`DataGate`](crate::DataGate) instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataGateConfig {
    /// Whether a non-master caller may implicitly create a new class by writing
    /// the first object of that class.
    #[serde(default = "default_allow_client_class_creation")]
    pub allow_client_class_creation: bool,

    /// Upper bound applied to the `limit` of every find. `None` leaves caller
    /// limits untouched.
    #[serde(default)]
    pub max_limit: Option<u64>,
}

fn default_allow_client_class_creation() -> bool {
    true
}

impl Default for DataGateConfig {
    fn default() -> Self {
        Self {
            allow_client_class_creation: true,
            max_limit: None,
        }
    }
}
