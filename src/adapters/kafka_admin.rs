//! Kafka admin facade
//!
//! Thin contract over the Kafka admin protocol. Every operation is batched
//! and returns a per-topic result, so one topic failing never hides the
//! outcome of the others in the same call. The only batch-level failure is
//! cooperative cancellation, surfaced as [`Interrupted`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, ConfigSource, NewPartitions, NewTopic,
    OwnedResourceSpecifier, ResourceSpecifier, TopicReplication,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OperatorConfig;
use crate::error::{Error, Interrupted, ReconcileError};
use crate::metrics::ExternalCallTimer;

/// Sentinel for "let the broker pick" partitions / replication factor
pub const BROKER_DEFAULT: i32 = -1;

/// Per-topic results of a batched admin operation
pub type PerTopicResult<T> = BTreeMap<String, std::result::Result<T, ReconcileError>>;

/// Replica assignment of a single partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionInfo {
    pub partition: i32,
    pub replicas: Vec<i32>,
}

/// Topic metadata as described by the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDescription {
    /// Id assigned by the cluster, when the transport surfaces it
    pub topic_id: Option<String>,
    pub partitions: Vec<PartitionInfo>,
}

/// One dynamic config entry of a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfigEntry {
    pub value: Option<String>,
    /// True when the entry is an explicit dynamic topic config rather than
    /// an inherited broker default
    pub dynamic_topic_config: bool,
}

/// Observed state of one topic: description plus current configs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicState {
    pub description: TopicDescription,
    pub configs: BTreeMap<String, TopicConfigEntry>,
}

impl TopicState {
    pub fn partition_count(&self) -> i32 {
        self.description.partitions.len() as i32
    }

    /// The replication factor shared by all partitions, or None when
    /// partitions disagree (e.g. mid-reassignment)
    pub fn unique_replication_factor(&self) -> Option<i32> {
        let mut factors = self
            .description
            .partitions
            .iter()
            .map(|p| p.replicas.len() as i32);
        let first = factors.next()?;
        factors.all(|f| f == first).then_some(first)
    }

    /// Partitions whose current replication factor differs from `target`
    pub fn partitions_with_replication_other_than(&self, target: i32) -> Vec<i32> {
        self.description
            .partitions
            .iter()
            .filter(|p| p.replicas.len() as i32 != target)
            .map(|p| p.partition)
            .collect()
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.configs.get(key).and_then(|e| e.value.as_deref())
    }
}

/// Request to create one topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replicas: i32,
    pub configs: BTreeMap<String, String>,
}

/// One incremental config change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl ConfigOp {
    pub fn key(&self) -> &str {
        match self {
            ConfigOp::Set { key, .. } => key,
            ConfigOp::Delete { key } => key,
        }
    }
}

/// A (topic, partition) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

/// An in-progress partition reassignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionReassignment {
    pub replicas: Vec<i32>,
    pub adding: Vec<i32>,
    pub removing: Vec<i32>,
}

impl PartitionReassignment {
    /// Replication factor the reassignment is converging to
    pub fn target_replication_factor(&self) -> i32 {
        self.replicas.len() as i32 - self.removing.len() as i32
    }
}

/// Contract over the Kafka admin protocol
#[async_trait]
pub trait KafkaAdmin: Send + Sync {
    /// Describe topic metadata for each name
    async fn describe_topics(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<TopicDescription>, Interrupted>;

    /// Describe current dynamic configs for each name
    async fn describe_topic_configs(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<BTreeMap<String, TopicConfigEntry>>, Interrupted>;

    /// Create topics; the success value is the cluster-assigned topic id
    /// when the transport surfaces one
    async fn create_topics(
        &self,
        topics: Vec<NewTopicSpec>,
    ) -> std::result::Result<PerTopicResult<Option<String>>, Interrupted>;

    /// Grow each topic to the given total partition count
    async fn create_partitions(
        &self,
        changes: Vec<(String, i32)>,
    ) -> std::result::Result<PerTopicResult<()>, Interrupted>;

    /// Apply incremental config changes per topic
    async fn alter_topic_configs(
        &self,
        ops: BTreeMap<String, Vec<ConfigOp>>,
    ) -> std::result::Result<PerTopicResult<()>, Interrupted>;

    /// Reassignments currently in progress for the given partitions.
    /// Partitions with no in-flight reassignment are absent from the result.
    async fn list_partition_reassignments(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> std::result::Result<HashMap<TopicPartition, PartitionReassignment>, Interrupted>;

    /// Delete topics
    async fn delete_topics(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<()>, Interrupted>;

    /// Value of a cluster-level config key, read from a single broker
    async fn describe_cluster_config(
        &self,
        key: &str,
    ) -> std::result::Result<Option<String>, Interrupted>;
}

/// Map a client-level rdkafka error onto the reconciliation taxonomy
fn map_kafka_error(err: &KafkaError) -> ReconcileError {
    match err {
        KafkaError::AdminOp(code) | KafkaError::MetadataFetch(code) => {
            ReconcileError::kafka(*code)
        }
        other => ReconcileError::Internal(other.to_string()),
    }
}

/// Spread one client-level error over every topic of the batch
fn batch_error<T>(names: impl IntoIterator<Item = String>, err: &KafkaError) -> PerTopicResult<T> {
    names
        .into_iter()
        .map(|n| (n, Err(map_kafka_error(err))))
        .collect()
}

fn specifier_name(specifier: &OwnedResourceSpecifier) -> Option<&str> {
    match specifier {
        OwnedResourceSpecifier::Topic(name) => Some(name),
        _ => None,
    }
}

/// Production admin facade over librdkafka
pub struct RdKafkaAdmin {
    admin: AdminClient<DefaultClientContext>,
    timeout: Duration,
    shutdown: CancellationToken,
    additional_metrics: bool,
}

impl RdKafkaAdmin {
    pub fn new(config: &OperatorConfig, shutdown: CancellationToken) -> crate::Result<Self> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set(
                "request.timeout.ms",
                config.request_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(|e| Error::ConfigError(format!("Failed to create admin client: {}", e)))?;

        Ok(Self {
            admin,
            timeout: config.request_timeout,
            shutdown,
            additional_metrics: config.enable_additional_metrics,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.timeout))
    }

    fn check_interrupted(&self) -> std::result::Result<(), Interrupted> {
        if self.shutdown.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Run one admin future under the cancellation token, timing it when
    /// additional metrics are enabled
    async fn run_op<T>(
        &self,
        op: &'static str,
        fut: impl std::future::Future<Output = T> + Send,
    ) -> std::result::Result<T, Interrupted> {
        let _timer = ExternalCallTimer::start(op, self.additional_metrics);
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(Interrupted),
            out = fut => Ok(out),
        }
    }

    fn describe_one_topic(
        &self,
        name: &str,
    ) -> std::result::Result<TopicDescription, ReconcileError> {
        let metadata = self
            .admin
            .inner()
            .fetch_metadata(Some(name), self.timeout)
            .map_err(|e| map_kafka_error(&e))?;

        let topic = metadata
            .topics()
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| {
                ReconcileError::kafka(rdkafka::error::RDKafkaErrorCode::UnknownTopicOrPartition)
            })?;

        if let Some(err) = topic.error() {
            return Err(ReconcileError::kafka(err.into()));
        }

        Ok(TopicDescription {
            // TODO: surface cluster topic ids once librdkafka exposes them
            // in metadata responses
            topic_id: None,
            partitions: topic
                .partitions()
                .iter()
                .map(|p| PartitionInfo {
                    partition: p.id(),
                    replicas: p.replicas().to_vec(),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl KafkaAdmin for RdKafkaAdmin {
    async fn describe_topics(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<TopicDescription>, Interrupted> {
        self.check_interrupted()?;
        let _timer = ExternalCallTimer::start("describe_topics", self.additional_metrics);
        let mut out = BTreeMap::new();
        for name in names {
            out.insert(name.clone(), self.describe_one_topic(name));
            self.check_interrupted()?;
        }
        Ok(out)
    }

    async fn describe_topic_configs(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<BTreeMap<String, TopicConfigEntry>>, Interrupted> {
        self.check_interrupted()?;
        let specifiers: Vec<ResourceSpecifier> = names
            .iter()
            .map(|n| ResourceSpecifier::Topic(n.as_str()))
            .collect();

        let results = match self
            .run_op(
                "describe_configs",
                self.admin.describe_configs(specifiers.iter(), &self.options()),
            )
            .await?
        {
            Ok(results) => results,
            Err(e) => return Ok(batch_error(names.iter().cloned(), &e)),
        };

        // Results come back in request order; the error arm carries no name
        let mut out = BTreeMap::new();
        for (name, result) in names.iter().zip(results) {
            let entry = match result {
                Ok(resource) => Ok(resource
                    .entries
                    .into_iter()
                    .map(|e| {
                        (
                            e.name,
                            TopicConfigEntry {
                                value: e.value,
                                dynamic_topic_config: e.source == ConfigSource::DynamicTopic,
                            },
                        )
                    })
                    .collect()),
                Err(code) => Err(ReconcileError::kafka(code)),
            };
            out.insert(name.clone(), entry);
        }
        Ok(out)
    }

    async fn create_topics(
        &self,
        topics: Vec<NewTopicSpec>,
    ) -> std::result::Result<PerTopicResult<Option<String>>, Interrupted> {
        self.check_interrupted()?;
        let new_topics: Vec<NewTopic> = topics
            .iter()
            .map(|t| {
                let topic =
                    NewTopic::new(&t.name, t.partitions, TopicReplication::Fixed(t.replicas));
                t.configs
                    .iter()
                    .fold(topic, |nt, (key, value)| nt.set(key, value))
            })
            .collect();

        let results = match self
            .run_op(
                "create_topics",
                self.admin.create_topics(new_topics.iter(), &self.options()),
            )
            .await?
        {
            Ok(results) => results,
            Err(e) => {
                return Ok(batch_error(topics.into_iter().map(|t| t.name), &e));
            }
        };

        Ok(results
            .into_iter()
            .map(|result| match result {
                // TODO: surface cluster topic ids once librdkafka exposes
                // CreateTopics v7+ responses
                Ok(name) => (name, Ok(None)),
                Err((name, code)) => (name, Err(ReconcileError::kafka(code))),
            })
            .collect())
    }

    async fn create_partitions(
        &self,
        changes: Vec<(String, i32)>,
    ) -> std::result::Result<PerTopicResult<()>, Interrupted> {
        self.check_interrupted()?;
        let new_partitions: Vec<NewPartitions> = changes
            .iter()
            .map(|(name, count)| NewPartitions::new(name, *count as usize))
            .collect();

        let results = match self
            .run_op(
                "create_partitions",
                self.admin
                    .create_partitions(new_partitions.iter(), &self.options()),
            )
            .await?
        {
            Ok(results) => results,
            Err(e) => {
                return Ok(batch_error(changes.into_iter().map(|(n, _)| n), &e));
            }
        };

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, Ok(())),
                Err((name, code)) => (name, Err(ReconcileError::kafka(code))),
            })
            .collect())
    }

    async fn alter_topic_configs(
        &self,
        ops: BTreeMap<String, Vec<ConfigOp>>,
    ) -> std::result::Result<PerTopicResult<()>, Interrupted> {
        self.check_interrupted()?;
        let names: Vec<String> = ops.keys().cloned().collect();

        // Legacy AlterConfigs replaces the whole dynamic config of the
        // topic, so read the current entries and carry the unchanged ones.
        // TODO: switch to IncrementalAlterConfigs when the rdkafka bindings
        // expose it
        let current = self.describe_topic_configs(&names).await?;

        let mut full_entries: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut out: PerTopicResult<()> = BTreeMap::new();
        for (name, topic_ops) in &ops {
            let existing = match current.get(name) {
                Some(Ok(entries)) => entries,
                Some(Err(e)) => {
                    out.insert(name.clone(), Err(e.clone()));
                    continue;
                }
                None => {
                    out.insert(
                        name.clone(),
                        Err(ReconcileError::Internal(format!(
                            "No config description returned for topic {}",
                            name
                        ))),
                    );
                    continue;
                }
            };

            let mut entries: BTreeMap<String, String> = existing
                .iter()
                .filter(|(_, e)| e.dynamic_topic_config)
                .filter_map(|(k, e)| e.value.clone().map(|v| (k.clone(), v)))
                .collect();
            for op in topic_ops {
                match op {
                    ConfigOp::Set { key, value } => {
                        entries.insert(key.clone(), value.clone());
                    }
                    ConfigOp::Delete { key } => {
                        entries.remove(key);
                    }
                }
            }
            full_entries.insert(name.clone(), entries);
        }

        if full_entries.is_empty() {
            return Ok(out);
        }

        let alter_names: Vec<&String> = full_entries.keys().collect();
        let alterations: Vec<AlterConfig> = alter_names
            .iter()
            .map(|name| {
                let base = AlterConfig::new(ResourceSpecifier::Topic(name.as_str()));
                full_entries[name.as_str()]
                    .iter()
                    .fold(base, |ac, (k, v)| ac.set(k, v))
            })
            .collect();

        let results = match self
            .run_op(
                "alter_configs",
                self.admin.alter_configs(alterations.iter(), &self.options()),
            )
            .await?
        {
            Ok(results) => results,
            Err(e) => {
                out.extend(batch_error::<()>(
                    alter_names.into_iter().cloned(),
                    &e,
                ));
                return Ok(out);
            }
        };

        for (name, result) in alter_names.into_iter().zip(results) {
            let entry = match result {
                Ok(_) => Ok(()),
                Err((specifier, code)) => {
                    debug!(
                        topic = specifier_name(&specifier).unwrap_or(name),
                        error = %code,
                        "Alter configs rejected"
                    );
                    Err(ReconcileError::kafka(code))
                }
            };
            out.insert(name.clone(), entry);
        }
        Ok(out)
    }

    async fn list_partition_reassignments(
        &self,
        partitions: Vec<TopicPartition>,
    ) -> std::result::Result<HashMap<TopicPartition, PartitionReassignment>, Interrupted> {
        self.check_interrupted()?;
        // TODO: issue a real ListPartitionReassignments (KIP-455) request
        // once the rdkafka bindings expose it; until then every mismatch is
        // treated as a genuine one
        debug!(
            partitions = partitions.len(),
            "ListPartitionReassignments not supported by the admin transport"
        );
        Ok(HashMap::new())
    }

    async fn delete_topics(
        &self,
        names: &[String],
    ) -> std::result::Result<PerTopicResult<()>, Interrupted> {
        self.check_interrupted()?;
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();

        let results = match self
            .run_op("delete_topics", self.admin.delete_topics(&refs, &self.options()))
            .await?
        {
            Ok(results) => results,
            Err(e) => return Ok(batch_error(names.iter().cloned(), &e)),
        };

        Ok(results
            .into_iter()
            .map(|result| match result {
                Ok(name) => (name, Ok(())),
                Err((name, code)) => (name, Err(ReconcileError::kafka(code))),
            })
            .collect())
    }

    async fn describe_cluster_config(
        &self,
        key: &str,
    ) -> std::result::Result<Option<String>, Interrupted> {
        self.check_interrupted()?;
        let _timer = ExternalCallTimer::start("describe_cluster_config", self.additional_metrics);

        let metadata = match self.admin.inner().fetch_metadata(None, self.timeout) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(error = %e, "Failed to fetch cluster metadata");
                return Ok(None);
            }
        };
        let Some(broker) = metadata.brokers().first() else {
            return Ok(None);
        };

        // One broker is enough; cluster-level keys are expected to agree
        // across brokers
        let results = match self
            .run_op(
                "describe_configs",
                self.admin.describe_configs(
                    &[ResourceSpecifier::Broker(broker.id())],
                    &self.options(),
                ),
            )
            .await?
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "Failed to describe broker configs");
                return Ok(None);
            }
        };

        Ok(results
            .into_iter()
            .next()
            .and_then(|r| r.ok())
            .and_then(|resource| {
                resource
                    .entries
                    .into_iter()
                    .find(|e| e.name == key)
                    .and_then(|e| e.value)
            }))
    }
}
