//! Batching topic controller
//!
//! `on_update` and `on_delete` are the two batch entry points and the only
//! mutators of the topic-name claim map. Batches never overlap: a single
//! controller instance processes them sequentially, with concurrent
//! fan-out to the Kafka admin layer inside each batch.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::join;
use rdkafka::error::RDKafkaErrorCode;
use tracing::{debug, info, warn};

use crate::adapters::kafka_admin::{
    ConfigOp, KafkaAdmin, NewTopicSpec, PerTopicResult, TopicState, BROKER_DEFAULT,
};
use crate::adapters::rebalancer::Rebalancer;
use crate::adapters::topic_store::TopicStore;
use crate::config::OperatorConfig;
use crate::crd::{KafkaTopic, ReplicasChangeStatus};
use crate::error::{Interrupted, ReconcileError};
use crate::metrics::{RECONCILIATIONS_FAILED, RECONCILIATIONS_SUCCESSFUL};
use crate::reconcilers::outcome::BatchOutcomes;
use crate::reconcilers::ownership::{validate_unchanged_topic_name, TopicRefTracker};
use crate::reconcilers::replicas::{self, replication_mismatch};
use crate::reconcilers::status::{build_status, sync_status, StatusInputs};
use crate::reconcilers::{diff, KubeRef, ReconcilableTopic};

/// The reconciliation engine for one Kafka cluster
pub struct BatchingTopicController {
    config: OperatorConfig,
    admin: Arc<dyn KafkaAdmin>,
    store: Arc<dyn TopicStore>,
    rebalancer: Option<Arc<dyn Rebalancer>>,
    /// Kafka topic name to observed claimants; only ever touched by the
    /// batch entry points
    topic_refs: Mutex<TopicRefTracker>,
    /// Cluster-level `min.insync.replicas`, cached at startup
    cluster_min_isr: Option<i32>,
}

impl BatchingTopicController {
    pub fn new(
        config: OperatorConfig,
        admin: Arc<dyn KafkaAdmin>,
        store: Arc<dyn TopicStore>,
        rebalancer: Option<Arc<dyn Rebalancer>>,
        cluster_min_isr: Option<i32>,
    ) -> Self {
        Self {
            config,
            admin,
            store,
            rebalancer,
            topic_refs: Mutex::new(TopicRefTracker::default()),
            cluster_min_isr,
        }
    }

    /// Reconcile a batch of upserted resources
    pub async fn on_update(&self, batch: Vec<KafkaTopic>) -> Result<(), Interrupted> {
        let items: Vec<ReconcilableTopic> =
            batch.into_iter().map(ReconcilableTopic::new).collect();
        debug!(items = items.len(), "Reconciling batch");

        let (selected, unselected): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|t| self.selected(&t.resource));
        for topic in &unselected {
            debug!(topic = %topic.kref, "Does not match the label selector, forgetting");
            self.forget(topic);
        }

        let (deleting, live): (Vec<_>, Vec<_>) = selected
            .into_iter()
            .partition(|t| t.resource.metadata.deletion_timestamp.is_some());
        if !deleting.is_empty() {
            self.delete_internal(deleting, false).await?;
        }
        if !live.is_empty() {
            self.update_internal(live).await?;
        }
        Ok(())
    }

    /// Reconcile a batch of deleted resources
    pub async fn on_delete(&self, batch: Vec<KafkaTopic>) -> Result<(), Interrupted> {
        let items: Vec<ReconcilableTopic> =
            batch.into_iter().map(ReconcilableTopic::new).collect();
        debug!(items = items.len(), "Reconciling deletion batch");

        let (selected, unselected): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|t| self.selected(&t.resource));
        for topic in &unselected {
            self.forget(topic);
        }
        self.delete_internal(selected, true).await
    }

    fn selected(&self, resource: &KafkaTopic) -> bool {
        self.config
            .selects(resource.metadata.labels.as_ref().unwrap_or(&BTreeMap::new()))
    }

    fn forget(&self, topic: &ReconcilableTopic) {
        self.topic_refs
            .lock()
            .expect("topic refs lock poisoned")
            .forget(&topic.topic_name, &topic.kref);
    }

    async fn update_internal(&self, items: Vec<ReconcilableTopic>) -> Result<(), Interrupted> {
        let mut outcomes = BatchOutcomes::default();
        let mut states: HashMap<KubeRef, TopicState> = HashMap::new();
        let mut topic_ids: HashMap<KubeRef, String> = HashMap::new();
        let mut skipped_keys: HashMap<KubeRef, Vec<String>> = HashMap::new();
        let mut replicas_updates: HashMap<
            KubeRef,
            Option<ReplicasChangeStatus>,
        > = HashMap::new();
        // Items whose classification is final, awaiting the status write
        let mut done: Vec<ReconcilableTopic> = Vec::new();

        // Unmanaged resources succeed trivially; they also give up their
        // claim on the topic name and must not carry the finalizer.
        let (managed, unmanaged): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|t| t.resource.is_managed());
        for topic in unmanaged {
            self.forget(&topic);
            if let Err(error) = self.store.remove_finalizer(&topic.resource).await {
                outcomes.record_err(&topic.kref, error);
            } else {
                outcomes.record_ok(&topic.kref);
            }
            done.push(topic);
        }

        // Validation: the topic name must be stable and singly managed
        let mut validated: Vec<ReconcilableTopic> = Vec::new();
        for topic in managed {
            let result = validate_unchanged_topic_name(&topic).and_then(|()| {
                let mut refs = self.topic_refs.lock().expect("topic refs lock poisoned");
                refs.remember(&topic.topic_name, &topic.kref);
                refs.validate_single_managing_resource(&topic)
            });
            match result {
                Ok(()) => validated.push(topic),
                Err(error) => {
                    outcomes.record_err(&topic.kref, error);
                    done.push(topic);
                }
            }
        }

        // Paused resources succeed trivially
        let (active, paused): (Vec<_>, Vec<_>) =
            validated.into_iter().partition(|t| !t.resource.is_paused());
        for topic in paused {
            outcomes.record_ok(&topic.kref);
            done.push(topic);
        }

        // Finalizer reconciliation
        let mut described: Vec<ReconcilableTopic> = Vec::new();
        for mut topic in active {
            let result = if self.config.use_finalizer {
                self.store.add_finalizer(&topic.resource).await
            } else {
                self.store.remove_finalizer(&topic.resource).await
            };
            match result {
                Ok(changed) => {
                    if changed {
                        // The metadata edit bumped the resource version;
                        // re-read so the status patch targets the fresh
                        // object
                        if let Ok(Some(fresh)) = self
                            .store
                            .get(&topic.kref.namespace, &topic.kref.name)
                            .await
                        {
                            topic.resource = fresh;
                        }
                    }
                    described.push(topic);
                }
                Err(error) => {
                    outcomes.record_err(&topic.kref, error);
                    done.push(topic);
                }
            }
        }

        // Describe: topic metadata and configs, concurrently
        let names: Vec<String> = described.iter().map(|t| t.topic_name.clone()).collect();
        let mut known: Vec<ReconcilableTopic> = Vec::new();
        let mut to_create: Vec<ReconcilableTopic> = Vec::new();
        if !names.is_empty() {
            let (descriptions, configs) = join!(
                self.admin.describe_topics(&names),
                self.admin.describe_topic_configs(&names)
            );
            let descriptions = descriptions?;
            let configs = configs?;

            for topic in described {
                let description = descriptions.get(&topic.topic_name);
                let config = configs.get(&topic.topic_name);
                match (description, config) {
                    (Some(Ok(description)), Some(Ok(config))) => {
                        if let Some(id) = &description.topic_id {
                            topic_ids.insert(topic.kref.clone(), id.clone());
                        }
                        states.insert(
                            topic.kref.clone(),
                            TopicState {
                                description: description.clone(),
                                configs: config.clone(),
                            },
                        );
                        known.push(topic);
                    }
                    (Some(Err(error)), _) | (_, Some(Err(error))) => {
                        if error.kafka_code()
                            == Some(RDKafkaErrorCode::UnknownTopicOrPartition)
                        {
                            to_create.push(topic);
                        } else {
                            outcomes.record_err(&topic.kref, error.clone());
                            done.push(topic);
                        }
                    }
                    _ => {
                        outcomes.record_err(
                            &topic.kref,
                            ReconcileError::Internal(format!(
                                "No describe result for topic {}",
                                topic.topic_name
                            )),
                        );
                        done.push(topic);
                    }
                }
            }
        }

        // Create missing topics
        self.create_missing(to_create, &mut outcomes, &mut topic_ids, &mut done)
            .await?;

        // Diff and apply config and partition changes
        self.alter_known(&known, &states, &mut outcomes, &mut skipped_keys)
            .await?;

        // Replica changes
        if self.config.cruise_control_enabled {
            if let Some(rebalancer) = &self.rebalancer {
                let pairs: Vec<(&ReconcilableTopic, &TopicState)> = known
                    .iter()
                    .filter_map(|t| states.get(&t.kref).map(|s| (t, s)))
                    .collect();
                let updates = replicas::reconcile_replicas_changes(
                    self.admin.as_ref(),
                    rebalancer.as_ref(),
                    self.cluster_min_isr,
                    &pairs,
                )
                .await?;
                replicas_updates.extend(updates);
            }
        } else {
            for topic in &known {
                let Some(state) = states.get(&topic.kref) else {
                    continue;
                };
                if replication_mismatch(topic, state).is_some() {
                    outcomes.record_err(
                        &topic.kref,
                        ReconcileError::NotSupported(
                            "Replication factor change not supported without Cruise Control"
                                .to_string(),
                        ),
                    );
                }
            }
        }
        done.extend(known);

        // Status synthesis: one terminal write per classified item
        let now = Utc::now();
        for topic in done {
            let outcome = outcomes.get(&topic.kref);
            match &outcome {
                Ok(()) => RECONCILIATIONS_SUCCESSFUL.inc(),
                Err(error) => {
                    info!(topic = %topic.kref, %error, "Reconciliation failed");
                    RECONCILIATIONS_FAILED.inc();
                }
            }
            let inputs = StatusInputs {
                outcome,
                skipped_config_keys: skipped_keys.remove(&topic.kref).unwrap_or_default(),
                replicas_change: replicas_updates.remove(&topic.kref),
                topic_id: topic_ids.remove(&topic.kref),
            };
            let status = build_status(&topic, &inputs, now);
            sync_status(self.store.as_ref(), &topic, status).await;
        }
        Ok(())
    }

    async fn create_missing(
        &self,
        to_create: Vec<ReconcilableTopic>,
        outcomes: &mut BatchOutcomes,
        topic_ids: &mut HashMap<KubeRef, String>,
        done: &mut Vec<ReconcilableTopic>,
    ) -> Result<(), Interrupted> {
        let mut specs: Vec<NewTopicSpec> = Vec::new();
        let mut creating: Vec<ReconcilableTopic> = Vec::new();
        for topic in to_create {
            // A malformed config value is caught before the admin call
            match diff::build_creation_configs(&topic.resource.spec) {
                Ok(configs) => {
                    specs.push(NewTopicSpec {
                        name: topic.topic_name.clone(),
                        partitions: topic.resource.spec.partitions.unwrap_or(BROKER_DEFAULT),
                        replicas: topic.resource.spec.replicas.unwrap_or(BROKER_DEFAULT),
                        configs,
                    });
                    creating.push(topic);
                }
                Err(error) => {
                    outcomes.record_err(&topic.kref, error);
                    done.push(topic);
                }
            }
        }
        if specs.is_empty() {
            return Ok(());
        }

        let results = self.admin.create_topics(specs).await?;
        for topic in creating {
            match results.get(&topic.topic_name) {
                Some(Ok(topic_id)) => {
                    info!(topic = %topic.topic_name, "Created topic");
                    if let Some(id) = topic_id {
                        topic_ids.insert(topic.kref.clone(), id.clone());
                    }
                    outcomes.record_ok(&topic.kref);
                }
                Some(Err(error))
                    if error.kafka_code() == Some(RDKafkaErrorCode::TopicAlreadyExists) =>
                {
                    // Someone got there first; the next reconciliation
                    // picks up the actual state
                    debug!(topic = %topic.topic_name, "Topic already exists");
                    outcomes.record_ok(&topic.kref);
                }
                Some(Err(error)) => outcomes.record_err(&topic.kref, error.clone()),
                None => outcomes.record_err(
                    &topic.kref,
                    ReconcileError::Internal(format!(
                        "No create result for topic {}",
                        topic.topic_name
                    )),
                ),
            }
            done.push(topic);
        }
        Ok(())
    }

    async fn alter_known(
        &self,
        known: &[ReconcilableTopic],
        states: &HashMap<KubeRef, TopicState>,
        outcomes: &mut BatchOutcomes,
        skipped_keys: &mut HashMap<KubeRef, Vec<String>>,
    ) -> Result<(), Interrupted> {
        let mut alter_ops: BTreeMap<String, Vec<ConfigOp>> = BTreeMap::new();
        let mut partition_increases: Vec<(String, i32)> = Vec::new();
        let by_name: HashMap<&str, &KubeRef> = known
            .iter()
            .map(|t| (t.topic_name.as_str(), &t.kref))
            .collect();

        for topic in known {
            let Some(state) = states.get(&topic.kref) else {
                continue;
            };
            match diff::config_ops(&topic.resource.spec, state) {
                Ok(ops) => {
                    let (kept, skipped) =
                        diff::filter_alterable(ops, &self.config.alterable_topic_config);
                    if !skipped.is_empty() {
                        warn!(topic = %topic.topic_name, keys = ?skipped,
                            "Skipping non-alterable config properties");
                        skipped_keys.insert(topic.kref.clone(), skipped);
                    }
                    if !kept.is_empty() {
                        alter_ops.insert(topic.topic_name.clone(), kept);
                    }
                }
                Err(error) => outcomes.record_err(&topic.kref, error),
            }
            match diff::partition_delta(&topic.resource.spec, state.partition_count()) {
                Ok(Some(increase_to)) => {
                    partition_increases.push((topic.topic_name.clone(), increase_to));
                }
                Ok(None) => {}
                Err(error) => outcomes.record_err(&topic.kref, error),
            }
        }

        if !alter_ops.is_empty() {
            let results = self.admin.alter_topic_configs(alter_ops).await?;
            merge_grouped(outcomes, &by_name, results);
        }
        if !partition_increases.is_empty() {
            let results = self.admin.create_partitions(partition_increases).await?;
            merge_grouped(outcomes, &by_name, results);
        }
        Ok(())
    }

    async fn delete_internal(
        &self,
        items: Vec<ReconcilableTopic>,
        from_deleted_event: bool,
    ) -> Result<(), Interrupted> {
        let (managed, unmanaged): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|t| t.resource.is_managed());

        // Unmanaged: release the resource, never touch the cluster
        for topic in unmanaged {
            match self.store.remove_finalizer(&topic.resource).await {
                Ok(_) => RECONCILIATIONS_SUCCESSFUL.inc(),
                Err(error) => {
                    warn!(topic = %topic.kref, %error,
                        "Failed to remove finalizer from unmanaged resource");
                    RECONCILIATIONS_FAILED.inc();
                }
            }
            self.forget(&topic);
        }

        let mut deletable: Vec<ReconcilableTopic> = Vec::new();
        for topic in managed {
            let validation = self
                .topic_refs
                .lock()
                .expect("topic refs lock poisoned")
                .validate_single_managing_resource(&topic);
            match validation {
                Ok(()) => deletable.push(topic),
                Err(error) => {
                    self.fail_deletion(&topic, error, from_deleted_event).await;
                }
            }
        }
        if deletable.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = deletable.iter().map(|t| t.topic_name.clone()).collect();
        let results = self.admin.delete_topics(&names).await?;

        for topic in deletable {
            let result = results.get(&topic.topic_name).cloned().unwrap_or_else(|| {
                Err(ReconcileError::Internal(format!(
                    "No delete result for topic {}",
                    topic.topic_name
                )))
            });
            match result {
                Ok(()) => self.finish_deletion(&topic).await,
                Err(error)
                    if error.kafka_code()
                        == Some(RDKafkaErrorCode::UnknownTopicOrPartition) =>
                {
                    // Already gone; deletion is idempotent
                    debug!(topic = %topic.topic_name, "Topic already deleted");
                    self.finish_deletion(&topic).await;
                }
                Err(error) => self.fail_deletion(&topic, error, from_deleted_event).await,
            }
        }
        Ok(())
    }

    async fn finish_deletion(&self, topic: &ReconcilableTopic) {
        match self.store.remove_finalizer(&topic.resource).await {
            Ok(_) => {
                info!(topic = %topic.kref, "Deleted topic");
                self.forget(topic);
                RECONCILIATIONS_SUCCESSFUL.inc();
            }
            Err(error) => {
                warn!(topic = %topic.kref, %error, "Failed to remove finalizer");
                RECONCILIATIONS_FAILED.inc();
            }
        }
    }

    async fn fail_deletion(
        &self,
        topic: &ReconcilableTopic,
        error: ReconcileError,
        from_deleted_event: bool,
    ) {
        RECONCILIATIONS_FAILED.inc();
        if from_deleted_event {
            // The resource is already gone, there is nothing to update
            warn!(topic = %topic.kref, %error, "Failed to delete topic");
            return;
        }
        info!(topic = %topic.kref, %error, "Failed to delete topic");
        let status = build_status(topic, &StatusInputs::with_outcome(Err(error)), Utc::now());
        sync_status(self.store.as_ref(), topic, status).await;
    }
}

/// Fold per-topic results of a grouped admin call back into per-item
/// outcomes
fn merge_grouped(
    outcomes: &mut BatchOutcomes,
    by_name: &HashMap<&str, &KubeRef>,
    results: PerTopicResult<()>,
) {
    for (name, result) in results {
        if let Some(kref) = by_name.get(name.as_str()) {
            outcomes.record(kref, result);
        }
    }
}
