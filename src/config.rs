//! Operator configuration loaded from the environment

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use crate::{Error, Result};

/// Policy restricting which topic config keys the operator may alter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterableTopicConfig {
    /// Alter any key (default)
    All,
    /// Drop every alter op
    None,
    /// Alter only keys in the allow-list
    Subset(BTreeSet<String>),
}

impl AlterableTopicConfig {
    /// Parse the `ALTERABLE_TOPIC_CONFIG` knob: `ALL`, `NONE`, or a
    /// comma-separated allow-list
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "ALL" => AlterableTopicConfig::All,
            "NONE" => AlterableTopicConfig::None,
            list => AlterableTopicConfig::Subset(
                list.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
            ),
        }
    }

    pub fn permits(&self, key: &str) -> bool {
        match self {
            AlterableTopicConfig::All => true,
            AlterableTopicConfig::None => false,
            AlterableTopicConfig::Subset(keys) => keys.contains(key),
        }
    }
}

/// Operator configuration knobs
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch
    pub namespace: String,
    /// Label selector resources must match to be reconciled
    pub resource_labels: BTreeMap<String, String>,
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Guard deletion with finalizers
    pub use_finalizer: bool,
    /// Skip the startup `auto.create.topics.enable` warning and the
    /// `min.insync.replicas` lookup
    pub skip_cluster_config_review: bool,
    /// Per-admin-call duration timers
    pub enable_additional_metrics: bool,
    /// Gate for the replica-change subsystem
    pub cruise_control_enabled: bool,
    /// Cruise Control REST endpoint, e.g. `http://cruise-control:9090`
    pub cruise_control_url: String,
    /// Which topic config keys may be altered
    pub alterable_topic_config: AlterableTopicConfig,
    /// Timeout applied to Kafka admin operations
    pub request_timeout: Duration,
    /// Port for the metrics/health server
    pub metrics_port: u16,
}

impl OperatorConfig {
    /// Load configuration from environment variables, `.env` included
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(OperatorConfig {
            namespace: env::var("NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            resource_labels: parse_labels(
                &env::var("RESOURCE_LABELS").unwrap_or_default(),
            )?,
            bootstrap_servers: env::var("BOOTSTRAP_SERVERS")
                .map_err(|_| Error::ConfigError("BOOTSTRAP_SERVERS must be set".to_string()))?,
            use_finalizer: parse_bool("USE_FINALIZER", true)?,
            skip_cluster_config_review: parse_bool("SKIP_CLUSTER_CONFIG_REVIEW", false)?,
            enable_additional_metrics: parse_bool("ENABLE_ADDITIONAL_METRICS", false)?,
            cruise_control_enabled: parse_bool("CRUISE_CONTROL_ENABLED", false)?,
            cruise_control_url: env::var("CRUISE_CONTROL_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            alterable_topic_config: AlterableTopicConfig::parse(
                &env::var("ALTERABLE_TOPIC_CONFIG").unwrap_or_else(|_| "ALL".to_string()),
            ),
            request_timeout: Duration::from_millis(parse_u64("REQUEST_TIMEOUT_MS", 30_000)?),
            metrics_port: parse_u64("METRICS_PORT", 8080)? as u16,
        })
    }

    /// True when the resource's labels satisfy the configured selector
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        self.resource_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(v) => v
            .parse::<bool>()
            .map_err(|_| Error::ConfigError(format!("{} must be true or false, got '{}'", key, v))),
        Err(_) => Ok(default),
    }
}

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map_err(|_| Error::ConfigError(format!("{} must be an integer, got '{}'", key, v))),
        Err(_) => Ok(default),
    }
}

/// Parse `k1=v1,k2=v2` into a label map
fn parse_labels(value: &str) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    for pair in value.split(',').filter(|p| !p.trim().is_empty()) {
        let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| Error::ConfigError(format!("Invalid label pair '{}'", pair)))?;
        labels.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(labels)
}
