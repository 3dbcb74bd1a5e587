//! KafkaTopic Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Finalizer guarding cluster-side deletion
pub const FINALIZER: &str = "strimzi.io/topic-operator";

/// Annotation controlling whether the operator owns the topic lifecycle.
/// Absent means managed.
pub const MANAGED_ANNOTATION: &str = "strimzi.io/managed";

/// Annotation pausing reconciliation of a resource
pub const PAUSED_ANNOTATION: &str = "strimzi.io/paused-reconciliation";

/// KafkaTopic resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kafka.strimzi.io",
    version = "v1beta2",
    kind = "KafkaTopic",
    plural = "kafkatopics",
    singular = "kafkatopic",
    shortname = "kt",
    namespaced,
    status = "KafkaTopicStatus",
    printcolumn = r#"{"name": "Topic", "type": "string", "jsonPath": ".status.topicName"}"#,
    printcolumn = r#"{"name": "Partitions", "type": "integer", "jsonPath": ".spec.partitions"}"#,
    printcolumn = r#"{"name": "Replicas", "type": "integer", "jsonPath": ".spec.replicas"}"#,
    printcolumn = r#"{"name": "Ready", "type": "string", "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Name of the topic in Kafka. Defaults to the resource name.
    /// Cannot be changed after the topic has been created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,

    /// Number of partitions. Defaults to the broker default. May only
    /// be increased once the topic exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitions: Option<i32>,

    /// Replication factor for every partition. Defaults to the broker
    /// default. Changes require Cruise Control.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,

    /// Topic configuration. Values may be scalars or lists of scalars.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// KafkaTopic status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicStatus {
    /// Generation last acted on by the operator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Name of the topic in Kafka. Never changes once set on a managed
    /// resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_name: Option<String>,

    /// Id assigned to the topic by the cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,

    /// Replication factor change tracked by Cruise Control
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas_change: Option<ReplicasChangeStatus>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Replication factor change state embedded in status
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicasChangeStatus {
    /// Change state (pending until accepted, ongoing while Cruise Control
    /// works)
    pub state: ReplicasChangeState,

    /// Replication factor being converged to
    pub target_replicas: i32,

    /// Cruise Control task id, set while the change is ongoing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Failure message from a rejected or failed change
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// State of a replication factor change
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReplicasChangeState {
    Pending,
    Ongoing,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type (Ready, Unmanaged, ReconciliationPaused, Warning)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl KafkaTopic {
    /// Name of the topic in Kafka, defaulting to the resource name
    pub fn topic_name(&self) -> String {
        self.spec
            .topic_name
            .clone()
            .unwrap_or_else(|| self.metadata.name.clone().unwrap_or_default())
    }

    /// Managed unless annotated `strimzi.io/managed: "false"`
    pub fn is_managed(&self) -> bool {
        !self.has_annotation(MANAGED_ANNOTATION, "false")
    }

    /// Paused iff annotated `strimzi.io/paused-reconciliation: "true"`
    pub fn is_paused(&self) -> bool {
        self.has_annotation(PAUSED_ANNOTATION, "true")
    }

    pub fn has_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|n| n == FINALIZER))
    }

    /// True when a `Ready=True` condition is present in status
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| {
            s.conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
    }

    fn has_annotation(&self, key: &str, value: &str) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .is_some_and(|v| v == value)
    }
}
