//! Resource store facade
//!
//! The three operations the controller needs from the orchestrator: fetch a
//! topic resource, patch its status sub-resource, and edit its finalizers.

use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::crd::{KafkaTopic, KafkaTopicStatus, FINALIZER};
use crate::error::ReconcileError;
use crate::metrics::ExternalCallTimer;

/// Contract over the topic resource store
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Fetch a resource; None when it does not exist
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<KafkaTopic>, ReconcileError>;

    /// Replace the status sub-resource
    async fn patch_status(
        &self,
        topic: &KafkaTopic,
        status: &KafkaTopicStatus,
    ) -> std::result::Result<(), ReconcileError>;

    /// Add the operator finalizer; returns false when already present
    async fn add_finalizer(&self, topic: &KafkaTopic)
        -> std::result::Result<bool, ReconcileError>;

    /// Remove the operator finalizer; returns false when absent. Tolerates
    /// the resource having been garbage-collected already.
    async fn remove_finalizer(
        &self,
        topic: &KafkaTopic,
    ) -> std::result::Result<bool, ReconcileError>;
}

/// Production store over the Kubernetes API
pub struct KubeTopicStore {
    client: Client,
    additional_metrics: bool,
}

impl KubeTopicStore {
    pub fn new(client: Client, additional_metrics: bool) -> Self {
        Self {
            client,
            additional_metrics,
        }
    }

    fn api(&self, namespace: &str) -> Api<KafkaTopic> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn map_error(err: kube::Error) -> ReconcileError {
        ReconcileError::Internal(format!("Kubernetes API error: {}", err))
    }

    fn is_not_found(err: &kube::Error) -> bool {
        matches!(err, kube::Error::Api(ae) if ae.code == 404)
    }

    async fn patch_finalizers(
        &self,
        topic: &KafkaTopic,
        finalizers: Vec<String>,
    ) -> std::result::Result<(), kube::Error> {
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": topic.resource_version(),
                "finalizers": finalizers,
            }
        });
        self.api(&topic.namespace().unwrap_or_default())
            .patch(
                &topic.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TopicStore for KubeTopicStore {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<KafkaTopic>, ReconcileError> {
        let _timer = ExternalCallTimer::start("get_topic", self.additional_metrics);
        match self.api(namespace).get(name).await {
            Ok(topic) => Ok(Some(topic)),
            Err(e) if Self::is_not_found(&e) => Ok(None),
            Err(e) => Err(Self::map_error(e)),
        }
    }

    async fn patch_status(
        &self,
        topic: &KafkaTopic,
        status: &KafkaTopicStatus,
    ) -> std::result::Result<(), ReconcileError> {
        let _timer = ExternalCallTimer::start("patch_status", self.additional_metrics);
        let patch = serde_json::json!({ "status": status });
        self.api(&topic.namespace().unwrap_or_default())
            .patch_status(
                &topic.name_any(),
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(Self::map_error)?;
        Ok(())
    }

    async fn add_finalizer(
        &self,
        topic: &KafkaTopic,
    ) -> std::result::Result<bool, ReconcileError> {
        if topic.has_finalizer() {
            return Ok(false);
        }
        let _timer = ExternalCallTimer::start("add_finalizer", self.additional_metrics);
        let mut finalizers = topic.metadata.finalizers.clone().unwrap_or_default();
        finalizers.push(FINALIZER.to_string());
        self.patch_finalizers(topic, finalizers)
            .await
            .map_err(Self::map_error)?;
        Ok(true)
    }

    async fn remove_finalizer(
        &self,
        topic: &KafkaTopic,
    ) -> std::result::Result<bool, ReconcileError> {
        if !topic.has_finalizer() {
            return Ok(false);
        }
        let _timer = ExternalCallTimer::start("remove_finalizer", self.additional_metrics);
        let finalizers: Vec<String> = topic
            .metadata
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != FINALIZER)
            .collect();
        match self.patch_finalizers(topic, finalizers).await {
            Ok(()) => Ok(true),
            Err(e) if Self::is_not_found(&e) => {
                debug!(
                    topic = %topic.name_any(),
                    "Resource already gone while removing finalizer"
                );
                Ok(false)
            }
            Err(e) => Err(Self::map_error(e)),
        }
    }
}
