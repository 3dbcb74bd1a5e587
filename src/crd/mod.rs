//! Custom Resource Definitions for the Kafka Topic Operator

mod kafka_topic;

pub use kafka_topic::*;

use kube::CustomResourceExt;

/// Generate CRD YAML manifests for all custom resources
pub fn generate_crds() -> Vec<String> {
    vec![serde_yaml::to_string(&KafkaTopic::crd()).unwrap()]
}
