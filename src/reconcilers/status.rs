//! Status synthesis
//!
//! Every classified item of a batch ends with exactly one terminal
//! condition: `Ready=True`, `Unmanaged=True`, `ReconciliationPaused=True`
//! or `Ready=False(reason, message)`, plus a `Warning` condition when
//! non-alterable config keys were skipped. The status is only written when
//! it differs from what is stored; a failed write is retried implicitly by
//! the next reconciliation.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::adapters::topic_store::TopicStore;
use crate::crd::{Condition, KafkaTopicStatus, ReplicasChangeStatus};
use crate::error::ReconcileError;
use crate::reconcilers::ReconcilableTopic;

/// Per-item inputs gathered by the pipeline for the status write
#[derive(Debug)]
pub struct StatusInputs {
    pub outcome: Result<(), ReconcileError>,
    /// Config keys dropped by the alterable-config policy
    pub skipped_config_keys: Vec<String>,
    /// Outer None preserves the stored `replicasChange`; `Some(None)`
    /// clears it
    pub replicas_change: Option<Option<ReplicasChangeStatus>>,
    /// Topic id learned in this batch (from creation or description)
    pub topic_id: Option<String>,
}

impl Default for StatusInputs {
    fn default() -> Self {
        StatusInputs {
            outcome: Ok(()),
            skipped_config_keys: Vec::new(),
            replicas_change: None,
            topic_id: None,
        }
    }
}

impl StatusInputs {
    pub fn with_outcome(outcome: Result<(), ReconcileError>) -> Self {
        StatusInputs {
            outcome,
            ..Default::default()
        }
    }
}

/// Build the target status for one item
pub fn build_status(
    topic: &ReconcilableTopic,
    inputs: &StatusInputs,
    now: DateTime<Utc>,
) -> KafkaTopicStatus {
    let prior = topic.resource.status.clone().unwrap_or_default();
    let managed = topic.resource.is_managed();

    let mut conditions = vec![terminal_condition(topic, &inputs.outcome, now)];
    if !inputs.skipped_config_keys.is_empty() {
        conditions.push(Condition {
            type_: "Warning".to_string(),
            status: "True".to_string(),
            last_transition_time: now,
            reason: Some("NotConfigurable".to_string()),
            message: Some(format!(
                "These .spec.config properties are not configurable: [{}]",
                inputs.skipped_config_keys.join(", ")
            )),
        });
    }
    let conditions = preserve_transition_times(conditions, &prior.conditions);

    KafkaTopicStatus {
        observed_generation: topic.resource.metadata.generation,
        topic_name: if managed {
            prior
                .topic_name
                .clone()
                .or_else(|| Some(topic.topic_name.clone()))
        } else {
            None
        },
        topic_id: inputs.topic_id.clone().or(prior.topic_id),
        replicas_change: match &inputs.replicas_change {
            Some(update) => update.clone(),
            None => prior.replicas_change,
        },
        conditions,
    }
}

fn terminal_condition(
    topic: &ReconcilableTopic,
    outcome: &Result<(), ReconcileError>,
    now: DateTime<Utc>,
) -> Condition {
    match outcome {
        Err(error) => Condition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            last_transition_time: now,
            reason: Some(error.reason().to_string()),
            message: Some(error.to_string()),
        },
        Ok(()) if !topic.resource.is_managed() => Condition {
            type_: "Unmanaged".to_string(),
            status: "True".to_string(),
            last_transition_time: now,
            reason: None,
            message: None,
        },
        Ok(()) if topic.resource.is_paused() => Condition {
            type_: "ReconciliationPaused".to_string(),
            status: "True".to_string(),
            last_transition_time: now,
            reason: None,
            message: None,
        },
        Ok(()) => Condition {
            type_: "Ready".to_string(),
            status: "True".to_string(),
            last_transition_time: now,
            reason: None,
            message: None,
        },
    }
}

/// Keep the stored transition time for conditions that did not actually
/// transition, so an unchanged status compares equal and is not rewritten
fn preserve_transition_times(
    conditions: Vec<Condition>,
    prior: &[Condition],
) -> Vec<Condition> {
    conditions
        .into_iter()
        .map(|mut condition| {
            if let Some(previous) = prior.iter().find(|p| {
                p.type_ == condition.type_
                    && p.status == condition.status
                    && p.reason == condition.reason
                    && p.message == condition.message
            }) {
                condition.last_transition_time = previous.last_transition_time;
            }
            condition
        })
        .collect()
}

/// Write the status if it changed; failures are logged and swallowed
pub async fn sync_status(
    store: &dyn TopicStore,
    topic: &ReconcilableTopic,
    status: KafkaTopicStatus,
) {
    let stored = topic.resource.status.clone().unwrap_or_default();
    if stored == status {
        debug!(topic = %topic.kref, "Status unchanged");
        return;
    }
    if let Err(error) = store.patch_status(&topic.resource, &status).await {
        warn!(topic = %topic.kref, %error,
            "Failed to update status, will retry on the next reconciliation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{KafkaTopic, KafkaTopicSpec, MANAGED_ANNOTATION, PAUSED_ANNOTATION};
    use kube::api::ObjectMeta;

    fn reconcilable(annotations: &[(&str, &str)]) -> ReconcilableTopic {
        ReconcilableTopic::new(KafkaTopic {
            metadata: ObjectMeta {
                namespace: Some("kafka".to_string()),
                name: Some("t1".to_string()),
                uid: Some("u-1".to_string()),
                generation: Some(4),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: KafkaTopicSpec::default(),
            status: None,
        })
    }

    #[test]
    fn successful_item_is_ready() {
        let topic = reconcilable(&[]);
        let status = build_status(&topic, &StatusInputs::default(), Utc::now());
        assert_eq!(status.observed_generation, Some(4));
        assert_eq!(status.topic_name, Some("t1".to_string()));
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].type_, "Ready");
        assert_eq!(status.conditions[0].status, "True");
    }

    #[test]
    fn failed_item_keeps_reason_and_message() {
        let topic = reconcilable(&[]);
        let inputs = StatusInputs::with_outcome(Err(ReconcileError::NotSupported(
            "Decreasing partitions not supported".to_string(),
        )));
        let status = build_status(&topic, &inputs, Utc::now());
        let condition = &status.conditions[0];
        assert_eq!(condition.type_, "Ready");
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason, Some("NotSupported".to_string()));
        assert_eq!(
            condition.message,
            Some("Decreasing partitions not supported".to_string())
        );
    }

    #[test]
    fn unmanaged_and_paused_have_their_own_conditions() {
        let unmanaged = reconcilable(&[(MANAGED_ANNOTATION, "false")]);
        let status = build_status(&unmanaged, &StatusInputs::default(), Utc::now());
        assert_eq!(status.conditions[0].type_, "Unmanaged");
        assert_eq!(status.topic_name, None);

        let paused = reconcilable(&[(PAUSED_ANNOTATION, "true")]);
        let status = build_status(&paused, &StatusInputs::default(), Utc::now());
        assert_eq!(status.conditions[0].type_, "ReconciliationPaused");
    }

    #[test]
    fn skipped_keys_append_a_warning() {
        let topic = reconcilable(&[]);
        let inputs = StatusInputs {
            skipped_config_keys: vec!["retention.ms".to_string(), "cleanup.policy".to_string()],
            ..Default::default()
        };
        let status = build_status(&topic, &inputs, Utc::now());
        assert_eq!(status.conditions.len(), 2);
        let warning = &status.conditions[1];
        assert_eq!(warning.type_, "Warning");
        assert_eq!(warning.reason, Some("NotConfigurable".to_string()));
        assert!(warning
            .message
            .as_deref()
            .unwrap()
            .contains("retention.ms, cleanup.policy"));
    }

    #[test]
    fn recorded_topic_name_is_preserved() {
        let mut topic = reconcilable(&[]);
        topic.resource.status = Some(KafkaTopicStatus {
            topic_name: Some("recorded".to_string()),
            topic_id: Some("id-1".to_string()),
            ..Default::default()
        });
        let status = build_status(&topic, &StatusInputs::default(), Utc::now());
        assert_eq!(status.topic_name, Some("recorded".to_string()));
        assert_eq!(status.topic_id, Some("id-1".to_string()));
    }

    #[test]
    fn unchanged_conditions_keep_their_transition_time() {
        let mut topic = reconcilable(&[]);
        let original = Utc::now() - chrono::Duration::hours(2);
        let first = build_status(&topic, &StatusInputs::default(), original);
        topic.resource.status = Some(first.clone());

        let second = build_status(&topic, &StatusInputs::default(), Utc::now());
        assert_eq!(second, first);
    }

    #[test]
    fn replicas_change_update_wins_over_preservation() {
        let mut topic = reconcilable(&[]);
        let stored = ReplicasChangeStatus {
            state: crate::crd::ReplicasChangeState::Pending,
            target_replicas: 3,
            session_id: None,
            message: None,
        };
        topic.resource.status = Some(KafkaTopicStatus {
            replicas_change: Some(stored.clone()),
            ..Default::default()
        });

        let preserved = build_status(&topic, &StatusInputs::default(), Utc::now());
        assert_eq!(preserved.replicas_change, Some(stored));

        let cleared = build_status(
            &topic,
            &StatusInputs {
                replicas_change: Some(None),
                ..Default::default()
            },
            Utc::now(),
        );
        assert_eq!(cleared.replicas_change, None);
    }
}
