//! Replication factor changes
//!
//! Replication factor never changes through direct partition-assignment
//! edits; mismatches are delegated to the rebalancer and tracked through a
//! small state machine embedded in `status.replicasChange`, reconciled
//! across controller restarts.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::adapters::kafka_admin::{KafkaAdmin, TopicPartition, TopicState, BROKER_DEFAULT};
use crate::adapters::rebalancer::{OngoingChange, PendingChange, Rebalancer};
use crate::crd::{ReplicasChangeState, ReplicasChangeStatus};
use crate::error::Interrupted;
use crate::reconcilers::{KubeRef, ReconcilableTopic};

/// The replica-change state machine, disambiguated.
///
/// The wire encoding conflates "pending, never accepted" and "pending after
/// a failure" behind an optional message; this variant keeps them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicasChange {
    /// Submitted but not yet accepted by the rebalancer
    Pending { target: i32 },
    /// Previously failed; awaiting a spec revert or retry
    PendingFailed { target: i32, message: String },
    /// The rebalancer is working under this session
    Ongoing { target: i32, session_id: String },
}

impl ReplicasChange {
    pub fn from_status(status: &ReplicasChangeStatus) -> Self {
        match (status.state, &status.session_id, &status.message) {
            (ReplicasChangeState::Ongoing, Some(session_id), _) => ReplicasChange::Ongoing {
                target: status.target_replicas,
                session_id: session_id.clone(),
            },
            (_, _, Some(message)) => ReplicasChange::PendingFailed {
                target: status.target_replicas,
                message: message.clone(),
            },
            _ => ReplicasChange::Pending {
                target: status.target_replicas,
            },
        }
    }

    pub fn to_status(&self) -> ReplicasChangeStatus {
        match self {
            ReplicasChange::Pending { target } => ReplicasChangeStatus {
                state: ReplicasChangeState::Pending,
                target_replicas: *target,
                session_id: None,
                message: None,
            },
            ReplicasChange::PendingFailed { target, message } => ReplicasChangeStatus {
                state: ReplicasChangeState::Pending,
                target_replicas: *target,
                session_id: None,
                message: Some(message.clone()),
            },
            ReplicasChange::Ongoing { target, session_id } => ReplicasChangeStatus {
                state: ReplicasChangeState::Ongoing,
                target_replicas: *target,
                session_id: Some(session_id.clone()),
                message: None,
            },
        }
    }
}

/// Desired replication factor when it differs from the observed one
pub fn replication_mismatch(topic: &ReconcilableTopic, state: &TopicState) -> Option<i32> {
    let desired = topic.resource.spec.replicas?;
    if desired == BROKER_DEFAULT {
        return None;
    }
    match state.unique_replication_factor() {
        Some(current) if current == desired => None,
        _ => Some(desired),
    }
}

/// Effective `min.insync.replicas`: topic config overrides the cluster
/// config; defaults to 1
pub fn effective_min_isr(state: &TopicState, cluster_min_isr: Option<i32>) -> i32 {
    state
        .config_value("min.insync.replicas")
        .and_then(|v| v.parse().ok())
        .or(cluster_min_isr)
        .unwrap_or(1)
}

fn current_change(topic: &ReconcilableTopic) -> Option<ReplicasChange> {
    topic
        .resource
        .status
        .as_ref()
        .and_then(|s| s.replicas_change.as_ref())
        .map(ReplicasChange::from_status)
}

/// Reconcile replication factor changes for one batch.
///
/// Returns the per-item new value for `status.replicasChange`; an entry of
/// `None` clears the field (change completed or reverted). Items absent
/// from the map keep whatever their status already records.
pub async fn reconcile_replicas_changes(
    admin: &dyn KafkaAdmin,
    rebalancer: &dyn Rebalancer,
    cluster_min_isr: Option<i32>,
    items: &[(&ReconcilableTopic, &TopicState)],
) -> Result<HashMap<KubeRef, Option<ReplicasChangeStatus>>, Interrupted> {
    let mut updates: HashMap<KubeRef, Option<ReplicasChangeStatus>> = HashMap::new();

    let mut candidates: Vec<(&ReconcilableTopic, &TopicState, i32)> = Vec::new();
    let mut settled: Vec<&ReconcilableTopic> = Vec::new();
    for &(topic, state) in items {
        match replication_mismatch(topic, state) {
            Some(target) => candidates.push((topic, state, target)),
            None => settled.push(topic),
        }
    }

    // Filter out pseudo-mismatches: a reassignment already in flight toward
    // the desired replication factor must not be re-submitted on every
    // reconciliation.
    let looked_up: Vec<TopicPartition> = candidates
        .iter()
        .flat_map(|(topic, state, target)| {
            state
                .partitions_with_replication_other_than(*target)
                .into_iter()
                .map(|partition| TopicPartition {
                    topic: topic.topic_name.clone(),
                    partition,
                })
        })
        .collect();
    let reassignments = if looked_up.is_empty() {
        HashMap::new()
    } else {
        admin.list_partition_reassignments(looked_up).await?
    };

    let mut to_submit: Vec<(&ReconcilableTopic, &TopicState, i32)> = Vec::new();
    let mut to_poll: Vec<OngoingChange> = Vec::new();
    let mut by_name: HashMap<String, KubeRef> = HashMap::new();

    for (topic, state, target) in candidates {
        let converging = state
            .partitions_with_replication_other_than(target)
            .into_iter()
            .all(|partition| {
                reassignments
                    .get(&TopicPartition {
                        topic: topic.topic_name.clone(),
                        partition,
                    })
                    .is_some_and(|r| r.target_replication_factor() == target)
            });
        if converging {
            debug!(topic = %topic.topic_name, target,
                "Reassignment already converging, skipping");
            continue;
        }

        by_name.insert(topic.topic_name.clone(), topic.kref.clone());
        match current_change(topic) {
            Some(ReplicasChange::Ongoing { session_id, .. }) => to_poll.push(OngoingChange {
                topic_name: topic.topic_name.clone(),
                target_replicas: target,
                session_id,
            }),
            _ => to_submit.push((topic, state, target)),
        }
    }

    for (topic, state, target) in &to_submit {
        let min_isr = effective_min_isr(state, cluster_min_isr);
        if *target < min_isr {
            // The rebalancer permits this and the broker-side roller
            // silently ignores such topics; failing here would strand the
            // user, so warn and continue.
            warn!(topic = %topic.topic_name, target, min_isr,
                "Target replication factor is below min.insync.replicas");
        }
    }

    if !to_submit.is_empty() {
        let changes: Vec<PendingChange> = to_submit
            .iter()
            .map(|(topic, _, target)| PendingChange {
                topic_name: topic.topic_name.clone(),
                target_replicas: *target,
            })
            .collect();
        for (name, status) in rebalancer.request_pending_changes(&changes).await {
            if let Some(kref) = by_name.get(&name) {
                updates.insert(kref.clone(), Some(status));
            }
        }
    }

    if !to_poll.is_empty() {
        for (name, status) in rebalancer.request_ongoing_changes(&to_poll).await {
            if let Some(kref) = by_name.get(&name) {
                updates.insert(kref.clone(), Some(status));
            }
        }
    }

    // Completion detection: the observed replication factor has converged,
    // so the tracked change is finished, either cleanly or by a spec revert
    // after a failure.
    for topic in settled {
        match current_change(topic) {
            Some(ReplicasChange::PendingFailed { message, .. }) => {
                info!(topic = %topic.topic_name, %message,
                    "Replication factor change reverted");
                updates.insert(topic.kref.clone(), None);
            }
            Some(_) => {
                info!(topic = %topic.topic_name, "Replication factor change completed");
                updates.insert(topic.kref.clone(), None);
            }
            None => {}
        }
    }

    Ok(updates)
}
