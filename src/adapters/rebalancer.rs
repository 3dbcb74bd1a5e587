//! Rebalancer facade
//!
//! Replication factor changes are delegated to Cruise Control. The
//! controller submits a pending change once and then polls the resulting
//! task; both calls are idempotent, so a controller restart mid-change
//! resumes cleanly from whatever `status.replicasChange` recorded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::crd::{ReplicasChangeState, ReplicasChangeStatus};
use crate::metrics::ExternalCallTimer;

/// A replication factor change not yet accepted by the rebalancer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub topic_name: String,
    pub target_replicas: i32,
}

/// A change the rebalancer is already working on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OngoingChange {
    pub topic_name: String,
    pub target_replicas: i32,
    pub session_id: String,
}

/// Contract over the rebalancing service
#[async_trait]
pub trait Rebalancer: Send + Sync {
    /// Submit pending changes. Accepted topics come back `ongoing` with a
    /// session id; rejected ones stay `pending` with a failure message.
    async fn request_pending_changes(
        &self,
        changes: &[PendingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus>;

    /// Poll ongoing changes. Failed tasks come back `pending` with a
    /// failure message; everything else stays `ongoing`.
    async fn request_ongoing_changes(
        &self,
        changes: &[OngoingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus>;
}

fn pending_failed(target_replicas: i32, message: String) -> ReplicasChangeStatus {
    ReplicasChangeStatus {
        state: ReplicasChangeState::Pending,
        target_replicas,
        session_id: None,
        message: Some(message),
    }
}

/// Cruise Control REST client
pub struct CruiseControlRebalancer {
    client: reqwest::Client,
    base_url: String,
    additional_metrics: bool,
}

impl CruiseControlRebalancer {
    pub fn new(base_url: String, additional_metrics: bool) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            additional_metrics,
        }
    }

    /// Submit one `topic_configuration` request for all topics sharing a
    /// target replication factor
    async fn submit_group(
        &self,
        topics: &[&PendingChange],
        target_replicas: i32,
    ) -> std::result::Result<String, String> {
        let pattern = topics
            .iter()
            .map(|c| regex_escape(&c.topic_name))
            .collect::<Vec<_>>()
            .join("|");
        let url = format!(
            "{}/kafkacruisecontrol/topic_configuration",
            self.base_url
        );

        let replication_factor = target_replicas.to_string();
        let response = self
            .client
            .post(&url)
            .query(&[
                ("topic", pattern.as_str()),
                ("replication_factor", replication_factor.as_str()),
                ("skip_rack_awareness_check", "false"),
                ("dryrun", "false"),
                ("json", "true"),
            ])
            .send()
            .await
            .map_err(|e| format!("Cruise Control request failed: {}", e))?;

        let session_id = response
            .headers()
            .get("User-Task-ID")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "Cruise Control rejected the change ({}): {}",
                status, body
            ));
        }

        session_id.ok_or_else(|| "Cruise Control returned no User-Task-ID".to_string())
    }

    async fn fetch_task_states(
        &self,
        session_ids: &[&str],
    ) -> std::result::Result<BTreeMap<String, UserTaskState>, String> {
        let url = format!("{}/kafkacruisecontrol/user_tasks", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("user_task_ids", session_ids.join(",").as_str()),
                ("json", "true"),
            ])
            .send()
            .await
            .map_err(|e| format!("Cruise Control request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!(
                "Cruise Control user_tasks returned {}",
                response.status()
            ));
        }

        let body: UserTasksResponse = response
            .json()
            .await
            .map_err(|e| format!("Malformed user_tasks response: {}", e))?;

        Ok(body
            .user_tasks
            .into_iter()
            .map(|t| (t.user_task_id, t.status))
            .collect())
    }
}

#[async_trait]
impl Rebalancer for CruiseControlRebalancer {
    async fn request_pending_changes(
        &self,
        changes: &[PendingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus> {
        let _timer = ExternalCallTimer::start("request_pending_changes", self.additional_metrics);
        let mut out = BTreeMap::new();

        // Cruise Control takes one replication factor per request
        let mut by_target: BTreeMap<i32, Vec<&PendingChange>> = BTreeMap::new();
        for change in changes {
            by_target.entry(change.target_replicas).or_default().push(change);
        }

        for (target_replicas, group) in by_target {
            match self.submit_group(&group, target_replicas).await {
                Ok(session_id) => {
                    debug!(%session_id, target_replicas, topics = group.len(),
                        "Replication factor change accepted");
                    for change in group {
                        out.insert(
                            change.topic_name.clone(),
                            ReplicasChangeStatus {
                                state: ReplicasChangeState::Ongoing,
                                target_replicas,
                                session_id: Some(session_id.clone()),
                                message: None,
                            },
                        );
                    }
                }
                Err(message) => {
                    warn!(target_replicas, %message, "Replication factor change rejected");
                    for change in group {
                        out.insert(
                            change.topic_name.clone(),
                            pending_failed(target_replicas, message.clone()),
                        );
                    }
                }
            }
        }
        out
    }

    async fn request_ongoing_changes(
        &self,
        changes: &[OngoingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus> {
        let _timer = ExternalCallTimer::start("request_ongoing_changes", self.additional_metrics);
        let session_ids: Vec<&str> = changes.iter().map(|c| c.session_id.as_str()).collect();

        let states = match self.fetch_task_states(&session_ids).await {
            Ok(states) => states,
            Err(message) => {
                warn!(%message, "Failed to poll ongoing replication factor changes");
                return changes
                    .iter()
                    .map(|c| {
                        (
                            c.topic_name.clone(),
                            pending_failed(c.target_replicas, message.clone()),
                        )
                    })
                    .collect();
            }
        };

        changes
            .iter()
            .map(|change| {
                let status = match states.get(&change.session_id) {
                    Some(UserTaskState::CompletedWithError) => pending_failed(
                        change.target_replicas,
                        format!("Task {} completed with error", change.session_id),
                    ),
                    // Completed tasks stay ongoing until the observed
                    // replication factor confirms convergence
                    _ => ReplicasChangeStatus {
                        state: ReplicasChangeState::Ongoing,
                        target_replicas: change.target_replicas,
                        session_id: Some(change.session_id.clone()),
                        message: None,
                    },
                };
                (change.topic_name.clone(), status)
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct UserTasksResponse {
    #[serde(rename = "userTasks", default)]
    user_tasks: Vec<UserTask>,
}

#[derive(Debug, Deserialize)]
struct UserTask {
    #[serde(rename = "UserTaskId")]
    user_task_id: String,
    #[serde(rename = "Status")]
    status: UserTaskState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
enum UserTaskState {
    Active,
    InExecution,
    Completed,
    CompletedWithError,
}

/// Escape a topic name for use inside the Cruise Control topic regex
fn regex_escape(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c == '.' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
