//! Ownership arbitration for Kafka topic names
//!
//! Multiple resources may claim the same topic name; exactly one owns it.
//! The tracker records every claimant observed since startup; arbitration
//! picks the oldest by `(creationTimestamp, uid)` and lets an established
//! `Ready=True` owner keep the crown on a creation-time tie.

use std::collections::HashMap;

use crate::error::ReconcileError;
use crate::reconcilers::{KubeRef, ReconcilableTopic};

/// Process-wide map of topic name to observed claimants.
///
/// Initialized empty at startup and only mutated by the batch entry points,
/// which never overlap.
#[derive(Debug, Default)]
pub struct TopicRefTracker {
    refs: HashMap<String, Vec<KubeRef>>,
}

impl TopicRefTracker {
    /// Record that `kref` manages `topic_name`. An older entry for the same
    /// stored resource is replaced, so uid churn cannot leave ghosts.
    pub fn remember(&mut self, topic_name: &str, kref: &KubeRef) {
        let claimants = self.refs.entry(topic_name.to_string()).or_default();
        claimants.retain(|existing| !existing.same_resource(kref));
        claimants.push(kref.clone());
    }

    /// Drop `kref` from the claimants of `topic_name`
    pub fn forget(&mut self, topic_name: &str, kref: &KubeRef) {
        if let Some(claimants) = self.refs.get_mut(topic_name) {
            claimants.retain(|existing| !existing.same_resource(kref));
            if claimants.is_empty() {
                self.refs.remove(topic_name);
            }
        }
    }

    pub fn claimants(&self, topic_name: &str) -> &[KubeRef] {
        self.refs.get(topic_name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Succeeds iff `topic` is the sole owner of its Kafka topic name.
    ///
    /// With several claimants the oldest wins; the win must be strict
    /// unless the current resource already reconciled to `Ready=True`.
    pub fn validate_single_managing_resource(
        &self,
        topic: &ReconcilableTopic,
    ) -> Result<(), ReconcileError> {
        let claimants = self.claimants(&topic.topic_name);
        if claimants.len() <= 1 {
            return Ok(());
        }

        let mut sorted: Vec<&KubeRef> = claimants.iter().collect();
        sorted.sort_by(|a, b| a.age_key().cmp(&b.age_key()));
        let oldest = sorted[0];
        let next_oldest = sorted[1];

        if oldest == &topic.kref {
            let strictly_older = match (oldest.creation_timestamp, next_oldest.creation_timestamp)
            {
                (Some(a), Some(b)) => a < b,
                (None, Some(_)) => true,
                _ => false,
            };
            if strictly_older || topic.resource.is_ready() {
                return Ok(());
            }
        }

        Err(ReconcileError::ResourceConflict(format!(
            "Managed by {}",
            oldest
        )))
    }
}

/// Fails when `status.topicName` is already set and the spec now derives a
/// different Kafka topic name: topics cannot be renamed.
pub fn validate_unchanged_topic_name(topic: &ReconcilableTopic) -> Result<(), ReconcileError> {
    let recorded = topic
        .resource
        .status
        .as_ref()
        .and_then(|s| s.topic_name.as_deref());
    match recorded {
        Some(name) if name != topic.topic_name => Err(ReconcileError::NotSupported(format!(
            "Changing spec.topicName is not supported (was {}, now {})",
            name, topic.topic_name
        ))),
        _ => Ok(()),
    }
}
