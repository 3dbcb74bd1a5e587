//! Error types for the Kafka Topic Operator

use rdkafka::error::RDKafkaErrorCode;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level operator error, surfaced by the controller loop
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// Batch aborted by cooperative cancellation
    #[error("Reconciliation interrupted")]
    Interrupted(#[from] Interrupted),
}

/// Cooperative cancellation signal.
///
/// Raised once per batch when the operator is shutting down while an
/// external call is in flight. Never written to resource status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Per-item reconciliation failure.
///
/// Every variant is terminal for the item: it becomes a `Ready=False`
/// condition with the variant name as reason and is retried by the next
/// reconciliation. Nothing is retried within a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcileError {
    /// Spec is malformed (e.g. a config value of an unsupported kind)
    #[error("{0}")]
    InvalidResource(String),
    /// Legal request refused by design (decrease partitions, rename, RF
    /// change without Cruise Control)
    #[error("{0}")]
    NotSupported(String),
    /// Another resource owns this topic name
    #[error("{0}")]
    ResourceConflict(String),
    /// Cluster-side rejection, keeping the Kafka API error kind
    #[error("{message}")]
    Kafka {
        code: RDKafkaErrorCode,
        message: String,
    },
    /// Unexpected cause wrapped
    #[error("{0}")]
    Internal(String),
}

impl ReconcileError {
    pub fn kafka(code: RDKafkaErrorCode) -> Self {
        ReconcileError::Kafka {
            code,
            message: code.to_string(),
        }
    }

    /// Kafka API error kind, if this is a cluster-side rejection
    pub fn kafka_code(&self) -> Option<RDKafkaErrorCode> {
        match self {
            ReconcileError::Kafka { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Reason string used in the `Ready=False` status condition
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::InvalidResource(_) => "InvalidResource",
            ReconcileError::NotSupported(_) => "NotSupported",
            ReconcileError::ResourceConflict(_) => "ResourceConflict",
            ReconcileError::Kafka { .. } => "KafkaError",
            ReconcileError::Internal(_) => "InternalError",
        }
    }
}
