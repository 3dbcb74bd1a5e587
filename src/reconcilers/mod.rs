//! Batch reconciliation of KafkaTopic resources
//!
//! The controller core lives here: the classification pipeline, ownership
//! arbitration, config/partition diffing, the replica-change subsystem and
//! status synthesis.

pub mod diff;
pub mod outcome;
pub mod ownership;
pub mod replicas;
pub mod status;
pub mod topic;

use std::fmt;

use chrono::{DateTime, Utc};
use kube::ResourceExt;

use crate::crd::KafkaTopic;

/// Stable identity of a topic resource.
///
/// Creation time breaks ownership ties between resources claiming the same
/// Kafka topic name; uid breaks creation-time ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KubeRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl KubeRef {
    pub fn from_resource(topic: &KafkaTopic) -> Self {
        KubeRef {
            namespace: topic.namespace().unwrap_or_default(),
            name: topic.name_any(),
            uid: topic.metadata.uid.clone().unwrap_or_default(),
            creation_timestamp: topic.metadata.creation_timestamp.as_ref().map(|t| t.0),
        }
    }

    /// Sort key for ownership arbitration
    pub fn age_key(&self) -> (Option<DateTime<Utc>>, &str) {
        (self.creation_timestamp, &self.uid)
    }

    /// Same stored resource, regardless of uid churn
    pub fn same_resource(&self, other: &KubeRef) -> bool {
        self.namespace == other.namespace && self.name == other.name
    }
}

impl fmt::Display for KubeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A topic resource bundled with its derived Kafka topic name for the
/// duration of one batch
#[derive(Debug, Clone)]
pub struct ReconcilableTopic {
    pub resource: KafkaTopic,
    pub topic_name: String,
    pub kref: KubeRef,
}

impl ReconcilableTopic {
    pub fn new(resource: KafkaTopic) -> Self {
        let topic_name = resource.topic_name();
        let kref = KubeRef::from_resource(&resource);
        ReconcilableTopic {
            resource,
            topic_name,
            kref,
        }
    }
}
