//! In-memory fakes of the three facades, plus resource builders shared by
//! the integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use rdkafka::error::RDKafkaErrorCode;

use kafka_topic_operator::adapters::kafka_admin::{
    ConfigOp, KafkaAdmin, NewTopicSpec, PartitionInfo, PartitionReassignment, PerTopicResult,
    TopicConfigEntry, TopicDescription, TopicPartition, BROKER_DEFAULT,
};
use kafka_topic_operator::adapters::rebalancer::{OngoingChange, PendingChange, Rebalancer};
use kafka_topic_operator::adapters::topic_store::TopicStore;
use kafka_topic_operator::config::{AlterableTopicConfig, OperatorConfig};
use kafka_topic_operator::crd::{
    KafkaTopic, KafkaTopicStatus, ReplicasChangeState, ReplicasChangeStatus, FINALIZER,
};
use kafka_topic_operator::error::{Interrupted, ReconcileError};
use kafka_topic_operator::reconcilers::topic::BatchingTopicController;

// ============================================================================
// Resource Builders
// ============================================================================

pub fn make_topic(name: &str) -> KafkaTopic {
    KafkaTopic {
        metadata: ObjectMeta {
            namespace: Some("kafka".to_string()),
            name: Some(name.to_string()),
            uid: Some(format!("uid-{}", name)),
            creation_timestamp: Some(Time(Utc.timestamp_opt(1_000, 0).unwrap())),
            generation: Some(1),
            ..Default::default()
        },
        spec: Default::default(),
        status: None,
    }
}

pub fn created_at(mut topic: KafkaTopic, secs: i64) -> KafkaTopic {
    topic.metadata.creation_timestamp = Some(Time(Utc.timestamp_opt(secs, 0).unwrap()));
    topic
}

pub fn with_annotation(mut topic: KafkaTopic, key: &str, value: &str) -> KafkaTopic {
    topic
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    topic
}

pub fn with_finalizer(mut topic: KafkaTopic) -> KafkaTopic {
    topic
        .metadata
        .finalizers
        .get_or_insert_with(Default::default)
        .push(FINALIZER.to_string());
    topic
}

pub fn deleting(mut topic: KafkaTopic) -> KafkaTopic {
    topic.metadata.deletion_timestamp = Some(Time(Utc.timestamp_opt(2_000, 0).unwrap()));
    topic
}

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        namespace: "kafka".to_string(),
        resource_labels: BTreeMap::new(),
        bootstrap_servers: "localhost:9092".to_string(),
        use_finalizer: true,
        skip_cluster_config_review: false,
        enable_additional_metrics: false,
        cruise_control_enabled: false,
        cruise_control_url: "http://localhost:9090".to_string(),
        alterable_topic_config: AlterableTopicConfig::All,
        request_timeout: Duration::from_secs(30),
        metrics_port: 8080,
    }
}

// ============================================================================
// Fake Kafka Admin
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FakeTopic {
    /// Replica assignment per partition
    pub partitions: Vec<Vec<i32>>,
    /// Config key to (value, is dynamic topic config)
    pub configs: BTreeMap<String, (String, bool)>,
}

impl FakeTopic {
    pub fn new(partitions: i32, replicas: i32) -> Self {
        FakeTopic {
            partitions: (0..partitions).map(|_| (1..=replicas).collect()).collect(),
            configs: BTreeMap::new(),
        }
    }

    pub fn with_config(mut self, key: &str, value: &str) -> Self {
        self.configs
            .insert(key.to_string(), (value.to_string(), true));
        self
    }
}

#[derive(Default)]
pub struct MockAdmin {
    pub topics: Mutex<BTreeMap<String, FakeTopic>>,
    pub reassignments: Mutex<HashMap<TopicPartition, PartitionReassignment>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_delete_with: Mutex<Option<RDKafkaErrorCode>>,
    /// Topics the describe calls pretend not to know, even when present
    pub describe_unknown: Mutex<Vec<String>>,
}

impl MockAdmin {
    pub fn with_topic(self, name: &str, topic: FakeTopic) -> Self {
        self.topics.lock().unwrap().insert(name.to_string(), topic);
        self
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == name)
            .count()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| {
                matches!(
                    c.as_str(),
                    "create_topics" | "create_partitions" | "alter_topic_configs" | "delete_topics"
                )
            })
            .cloned()
            .collect()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl KafkaAdmin for MockAdmin {
    async fn describe_topics(
        &self,
        names: &[String],
    ) -> Result<PerTopicResult<TopicDescription>, Interrupted> {
        self.record("describe_topics");
        let unknown = self.describe_unknown.lock().unwrap().clone();
        let topics = self.topics.lock().unwrap();
        Ok(names
            .iter()
            .map(|name| {
                let result = match topics.get(name).filter(|_| !unknown.contains(name)) {
                    Some(topic) => Ok(TopicDescription {
                        topic_id: Some(format!("id-{}", name)),
                        partitions: topic
                            .partitions
                            .iter()
                            .enumerate()
                            .map(|(i, replicas)| PartitionInfo {
                                partition: i as i32,
                                replicas: replicas.clone(),
                            })
                            .collect(),
                    }),
                    None => Err(ReconcileError::kafka(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    )),
                };
                (name.clone(), result)
            })
            .collect())
    }

    async fn describe_topic_configs(
        &self,
        names: &[String],
    ) -> Result<PerTopicResult<BTreeMap<String, TopicConfigEntry>>, Interrupted> {
        self.record("describe_topic_configs");
        let unknown = self.describe_unknown.lock().unwrap().clone();
        let topics = self.topics.lock().unwrap();
        Ok(names
            .iter()
            .map(|name| {
                let result = match topics.get(name).filter(|_| !unknown.contains(name)) {
                    Some(topic) => Ok(topic
                        .configs
                        .iter()
                        .map(|(k, (value, dynamic))| {
                            (
                                k.clone(),
                                TopicConfigEntry {
                                    value: Some(value.clone()),
                                    dynamic_topic_config: *dynamic,
                                },
                            )
                        })
                        .collect()),
                    None => Err(ReconcileError::kafka(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    )),
                };
                (name.clone(), result)
            })
            .collect())
    }

    async fn create_topics(
        &self,
        specs: Vec<NewTopicSpec>,
    ) -> Result<PerTopicResult<Option<String>>, Interrupted> {
        self.record("create_topics");
        let mut topics = self.topics.lock().unwrap();
        Ok(specs
            .into_iter()
            .map(|spec| {
                if topics.contains_key(&spec.name) {
                    return (
                        spec.name,
                        Err(ReconcileError::kafka(RDKafkaErrorCode::TopicAlreadyExists)),
                    );
                }
                let partitions = if spec.partitions == BROKER_DEFAULT {
                    1
                } else {
                    spec.partitions
                };
                let replicas = if spec.replicas == BROKER_DEFAULT {
                    1
                } else {
                    spec.replicas
                };
                let mut topic = FakeTopic::new(partitions, replicas);
                topic.configs = spec
                    .configs
                    .into_iter()
                    .map(|(k, v)| (k, (v, true)))
                    .collect();
                topics.insert(spec.name.clone(), topic);
                let id = format!("id-{}", spec.name);
                (spec.name, Ok(Some(id)))
            })
            .collect())
    }

    async fn create_partitions(
        &self,
        changes: Vec<(String, i32)>,
    ) -> Result<PerTopicResult<()>, Interrupted> {
        self.record("create_partitions");
        let mut topics = self.topics.lock().unwrap();
        Ok(changes
            .into_iter()
            .map(|(name, increase_to)| {
                let result = match topics.get_mut(&name) {
                    Some(topic) => {
                        let replicas = topic.partitions.first().cloned().unwrap_or_default();
                        while (topic.partitions.len() as i32) < increase_to {
                            topic.partitions.push(replicas.clone());
                        }
                        Ok(())
                    }
                    None => Err(ReconcileError::kafka(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    )),
                };
                (name, result)
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        ops: BTreeMap<String, Vec<ConfigOp>>,
    ) -> Result<PerTopicResult<()>, Interrupted> {
        self.record("alter_topic_configs");
        let mut topics = self.topics.lock().unwrap();
        Ok(ops
            .into_iter()
            .map(|(name, topic_ops)| {
                let result = match topics.get_mut(&name) {
                    Some(topic) => {
                        for op in topic_ops {
                            match op {
                                ConfigOp::Set { key, value } => {
                                    topic.configs.insert(key, (value, true));
                                }
                                ConfigOp::Delete { key } => {
                                    topic.configs.remove(&key);
                                }
                            }
                        }
                        Ok(())
                    }
                    None => Err(ReconcileError::kafka(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    )),
                };
                (name, result)
            })
            .collect())
    }

    async fn list_partition_reassignments(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> Result<HashMap<TopicPartition, PartitionReassignment>, Interrupted> {
        self.record("list_partition_reassignments");
        let reassignments = self.reassignments.lock().unwrap();
        Ok(partitions
            .into_iter()
            .filter_map(|tp| reassignments.get(&tp).map(|r| (tp, r.clone())))
            .collect())
    }

    async fn delete_topics(
        &self,
        names: &[String],
    ) -> Result<PerTopicResult<()>, Interrupted> {
        self.record("delete_topics");
        if let Some(code) = *self.fail_delete_with.lock().unwrap() {
            return Ok(names
                .iter()
                .map(|n| (n.clone(), Err(ReconcileError::kafka(code))))
                .collect());
        }
        let mut topics = self.topics.lock().unwrap();
        Ok(names
            .iter()
            .map(|name| {
                let result = if topics.remove(name).is_some() {
                    Ok(())
                } else {
                    Err(ReconcileError::kafka(
                        RDKafkaErrorCode::UnknownTopicOrPartition,
                    ))
                };
                (name.clone(), result)
            })
            .collect())
    }

    async fn describe_cluster_config(
        &self,
        _key: &str,
    ) -> Result<Option<String>, Interrupted> {
        self.record("describe_cluster_config");
        Ok(None)
    }
}

// ============================================================================
// Fake Resource Store
// ============================================================================

#[derive(Default)]
pub struct MockStore {
    pub resources: Mutex<HashMap<String, KafkaTopic>>,
    pub status_writes: Mutex<Vec<(String, KafkaTopicStatus)>>,
    pub fail_status_writes: Mutex<bool>,
}

impl MockStore {
    pub fn with_resource(self, topic: &KafkaTopic) -> Self {
        let name = topic.metadata.name.clone().unwrap();
        self.resources.lock().unwrap().insert(name, topic.clone());
        self
    }

    pub fn last_status(&self, name: &str) -> Option<KafkaTopicStatus> {
        self.status_writes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    pub fn status_write_count(&self, name: &str) -> usize {
        self.status_writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    pub fn finalizers_of(&self, name: &str) -> Vec<String> {
        self.resources
            .lock()
            .unwrap()
            .get(name)
            .and_then(|t| t.metadata.finalizers.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TopicStore for MockStore {
    async fn get(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<KafkaTopic>, ReconcileError> {
        Ok(self.resources.lock().unwrap().get(name).cloned())
    }

    async fn patch_status(
        &self,
        topic: &KafkaTopic,
        status: &KafkaTopicStatus,
    ) -> Result<(), ReconcileError> {
        if *self.fail_status_writes.lock().unwrap() {
            return Err(ReconcileError::Internal("status write refused".to_string()));
        }
        let name = topic.metadata.name.clone().unwrap_or_default();
        self.status_writes
            .lock()
            .unwrap()
            .push((name.clone(), status.clone()));
        if let Some(stored) = self.resources.lock().unwrap().get_mut(&name) {
            stored.status = Some(status.clone());
        }
        Ok(())
    }

    async fn add_finalizer(&self, topic: &KafkaTopic) -> Result<bool, ReconcileError> {
        if topic.has_finalizer() {
            return Ok(false);
        }
        let name = topic.metadata.name.clone().unwrap_or_default();
        if let Some(stored) = self.resources.lock().unwrap().get_mut(&name) {
            stored
                .metadata
                .finalizers
                .get_or_insert_with(Default::default)
                .push(FINALIZER.to_string());
        }
        Ok(true)
    }

    async fn remove_finalizer(&self, topic: &KafkaTopic) -> Result<bool, ReconcileError> {
        if !topic.has_finalizer() {
            return Ok(false);
        }
        let name = topic.metadata.name.clone().unwrap_or_default();
        if let Some(stored) = self.resources.lock().unwrap().get_mut(&name) {
            if let Some(finalizers) = stored.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != FINALIZER);
            }
        }
        // A missing resource is fine: it was garbage-collected already
        Ok(true)
    }
}

// ============================================================================
// Fake Rebalancer
// ============================================================================

#[derive(Default)]
pub struct MockRebalancer {
    pub pending_requests: Mutex<Vec<Vec<PendingChange>>>,
    pub ongoing_requests: Mutex<Vec<Vec<OngoingChange>>>,
    pub reject_with: Mutex<Option<String>>,
    pub fail_ongoing_with: Mutex<Option<String>>,
}

impl MockRebalancer {
    pub fn pending_request_count(&self) -> usize {
        self.pending_requests.lock().unwrap().len()
    }

    pub fn ongoing_request_count(&self) -> usize {
        self.ongoing_requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Rebalancer for MockRebalancer {
    async fn request_pending_changes(
        &self,
        changes: &[PendingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus> {
        self.pending_requests.lock().unwrap().push(changes.to_vec());
        let reject = self.reject_with.lock().unwrap().clone();
        changes
            .iter()
            .map(|change| {
                let status = match &reject {
                    Some(message) => ReplicasChangeStatus {
                        state: ReplicasChangeState::Pending,
                        target_replicas: change.target_replicas,
                        session_id: None,
                        message: Some(message.clone()),
                    },
                    None => ReplicasChangeStatus {
                        state: ReplicasChangeState::Ongoing,
                        target_replicas: change.target_replicas,
                        session_id: Some("task-1".to_string()),
                        message: None,
                    },
                };
                (change.topic_name.clone(), status)
            })
            .collect()
    }

    async fn request_ongoing_changes(
        &self,
        changes: &[OngoingChange],
    ) -> BTreeMap<String, ReplicasChangeStatus> {
        self.ongoing_requests.lock().unwrap().push(changes.to_vec());
        let fail = self.fail_ongoing_with.lock().unwrap().clone();
        changes
            .iter()
            .map(|change| {
                let status = match &fail {
                    Some(message) => ReplicasChangeStatus {
                        state: ReplicasChangeState::Pending,
                        target_replicas: change.target_replicas,
                        session_id: None,
                        message: Some(message.clone()),
                    },
                    None => ReplicasChangeStatus {
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

// ============================================================================
// Controller Assembly
// ============================================================================

pub struct Harness {
    pub admin: Arc<MockAdmin>,
    pub store: Arc<MockStore>,
    pub rebalancer: Arc<MockRebalancer>,
    pub controller: BatchingTopicController,
}

pub fn harness(config: OperatorConfig, admin: MockAdmin, store: MockStore) -> Harness {
    let admin = Arc::new(admin);
    let store = Arc::new(store);
    let rebalancer = Arc::new(MockRebalancer::default());
    let controller = BatchingTopicController::new(
        config,
        admin.clone(),
        store.clone(),
        Some(rebalancer.clone() as Arc<dyn Rebalancer>),
        Some(1),
    );
    Harness {
        admin,
        store,
        rebalancer,
        controller,
    }
}

pub fn terminal_condition(status: &KafkaTopicStatus) -> (&str, &str, Option<&str>) {
    let condition = status
        .conditions
        .first()
        .expect("status has no conditions");
    (
        condition.type_.as_str(),
        condition.status.as_str(),
        condition.reason.as_deref(),
    )
}
