//! Server configuration.

use serde::{Deserialize, Serialize};

/// Default cadence of progress log lines while opening a merged region.
pub const DEFAULT_MERGE_OPEN_LOG_INTERVAL_MS: u64 = 10_000;

/// Default root of the coordination node tree.
pub const DEFAULT_COORDINATION_ROOT: &str = "/spanbase";

/// Region server configuration.
///
/// All fields have defaults so partial configuration files deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Disable coordination-service and catalog side effects. Used by tests
    /// that exercise the local transaction machinery without a cluster.
    pub testing_no_cluster: bool,
    /// Cadence, in millis, of progress log lines during merged-region open.
    pub merge_open_log_interval_ms: u64,
    /// Root path of the coordination node tree.
    pub coordination_root: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            testing_no_cluster: false,
            merge_open_log_interval_ms: DEFAULT_MERGE_OPEN_LOG_INTERVAL_MS,
            coordination_root: DEFAULT_COORDINATION_ROOT.to_owned(),
        }
    }
}

impl ServerConfig {
    /// Configuration with cluster side effects disabled.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            testing_no_cluster: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert!(!config.testing_no_cluster);
        assert_eq!(config.merge_open_log_interval_ms, 10_000);
        assert_eq!(config.coordination_root, "/spanbase");
    }

    #[test]
    fn partial_config_deserializes_with_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"testing_no_cluster": true}"#).expect("parse");
        assert!(config.testing_no_cluster);
        assert_eq!(config.merge_open_log_interval_ms, 10_000);
    }
}
