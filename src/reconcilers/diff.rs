//! Config and partition diffing
//!
//! Computes the minimum set of admin operations converging a topic toward
//! its spec: incremental config SET/DELETE ops filtered by the alterable
//! policy, and a partition-count increase when the spec asks for one.

use std::collections::BTreeMap;

use crate::adapters::kafka_admin::{ConfigOp, TopicState, BROKER_DEFAULT};
use crate::config::AlterableTopicConfig;
use crate::crd::KafkaTopicSpec;
use crate::error::ReconcileError;

/// Stringify one `spec.config` value the way Kafka expects it: scalars in
/// their natural string form, lists of scalars joined by `,`
pub fn stringify_config_value(
    key: &str,
    value: &serde_json::Value,
) -> Result<String, ReconcileError> {
    match value {
        serde_json::Value::String(s) => Ok(s.clone()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        return Err(invalid_value(key, value));
                    }
                    scalar => parts.push(stringify_config_value(key, scalar)?),
                }
            }
            Ok(parts.join(","))
        }
        _ => Err(invalid_value(key, value)),
    }
}

fn invalid_value(key: &str, value: &serde_json::Value) -> ReconcileError {
    ReconcileError::InvalidResource(format!(
        "Invalid value for config property {}: {}",
        key, value
    ))
}

/// Stringify the whole `spec.config` map, for topic creation
pub fn build_creation_configs(
    spec: &KafkaTopicSpec,
) -> Result<BTreeMap<String, String>, ReconcileError> {
    spec.config
        .iter()
        .map(|(k, v)| stringify_config_value(k, v).map(|s| (k.clone(), s)))
        .collect()
}

/// Ops bringing the current dynamic config in line with `spec.config`:
/// SET for added or changed keys, DELETE for dynamic topic configs the spec
/// no longer mentions
pub fn config_ops(
    spec: &KafkaTopicSpec,
    state: &TopicState,
) -> Result<Vec<ConfigOp>, ReconcileError> {
    let mut ops = Vec::new();

    for (key, value) in &spec.config {
        let desired = stringify_config_value(key, value)?;
        if state.config_value(key) != Some(desired.as_str()) {
            ops.push(ConfigOp::Set {
                key: key.clone(),
                value: desired,
            });
        }
    }

    for (key, entry) in &state.configs {
        if entry.dynamic_topic_config && !spec.config.contains_key(key) {
            ops.push(ConfigOp::Delete { key: key.clone() });
        }
    }

    Ok(ops)
}

/// Apply the alterable-config policy, returning the surviving ops and the
/// keys that were dropped
pub fn filter_alterable(
    ops: Vec<ConfigOp>,
    policy: &AlterableTopicConfig,
) -> (Vec<ConfigOp>, Vec<String>) {
    let mut kept = Vec::with_capacity(ops.len());
    let mut skipped = Vec::new();
    for op in ops {
        if policy.permits(op.key()) {
            kept.push(op);
        } else {
            skipped.push(op.key().to_string());
        }
    }
    (kept, skipped)
}

/// Partition-count change required by the spec, if any.
///
/// `spec.partitions` may only grow; a decrease is refused without touching
/// the cluster.
pub fn partition_delta(
    spec: &KafkaTopicSpec,
    current_count: i32,
) -> Result<Option<i32>, ReconcileError> {
    match spec.partitions {
        None => Ok(None),
        Some(BROKER_DEFAULT) => Ok(None),
        Some(desired) if desired > current_count => Ok(Some(desired)),
        Some(desired) if desired < current_count => Err(ReconcileError::NotSupported(
            "Decreasing partitions not supported".to_string(),
        )),
        Some(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::kafka_admin::{TopicConfigEntry, TopicDescription};
    use serde_json::json;

    fn state_with_configs(entries: &[(&str, &str, bool)]) -> TopicState {
        TopicState {
            description: TopicDescription::default(),
            configs: entries
                .iter()
                .map(|(k, v, dynamic)| {
                    (
                        k.to_string(),
                        TopicConfigEntry {
                            value: Some(v.to_string()),
                            dynamic_topic_config: *dynamic,
                        },
                    )
                })
                .collect(),
        }
    }

    fn spec_with_config(entries: &[(&str, serde_json::Value)]) -> KafkaTopicSpec {
        KafkaTopicSpec {
            config: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn scalars_stringify_naturally() {
        assert_eq!(
            stringify_config_value("k", &json!("7200000")).unwrap(),
            "7200000"
        );
        assert_eq!(stringify_config_value("k", &json!(true)).unwrap(), "true");
        assert_eq!(stringify_config_value("k", &json!(3600)).unwrap(), "3600");
        assert_eq!(
            stringify_config_value("k", &json!([0.5, "a", 2])).unwrap(),
            "0.5,a,2"
        );
    }

    #[test]
    fn non_scalar_values_are_invalid() {
        assert!(matches!(
            stringify_config_value("k", &json!({"a": 1})),
            Err(ReconcileError::InvalidResource(_))
        ));
        assert!(matches!(
            stringify_config_value("k", &json!(null)),
            Err(ReconcileError::InvalidResource(_))
        ));
        assert!(matches!(
            stringify_config_value("k", &json!([[1]])),
            Err(ReconcileError::InvalidResource(_))
        ));
    }

    #[test]
    fn changed_and_added_keys_become_set_ops() {
        let spec = spec_with_config(&[
            ("retention.ms", json!("7200000")),
            ("cleanup.policy", json!("compact")),
        ]);
        let state = state_with_configs(&[
            ("retention.ms", "3600000", true),
            ("cleanup.policy", "compact", true),
        ]);

        let ops = config_ops(&spec, &state).unwrap();
        assert_eq!(
            ops,
            vec![ConfigOp::Set {
                key: "retention.ms".to_string(),
                value: "7200000".to_string(),
            }]
        );
    }

    #[test]
    fn removed_dynamic_configs_become_delete_ops() {
        let spec = spec_with_config(&[]);
        let state = state_with_configs(&[
            ("retention.ms", "3600000", true),
            ("segment.bytes", "1073741824", false),
        ]);

        let ops = config_ops(&spec, &state).unwrap();
        // the inherited default is left alone
        assert_eq!(
            ops,
            vec![ConfigOp::Delete {
                key: "retention.ms".to_string(),
            }]
        );
    }

    #[test]
    fn alterable_policy_filters_ops() {
        let ops = vec![
            ConfigOp::Set {
                key: "retention.ms".to_string(),
                value: "1".to_string(),
            },
            ConfigOp::Delete {
                key: "cleanup.policy".to_string(),
            },
        ];

        let (kept, skipped) =
            filter_alterable(ops.clone(), &AlterableTopicConfig::parse("retention.ms"));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].key(), "retention.ms");
        assert_eq!(skipped, vec!["cleanup.policy".to_string()]);

        let (kept, skipped) = filter_alterable(ops.clone(), &AlterableTopicConfig::None);
        assert!(kept.is_empty());
        assert_eq!(skipped.len(), 2);

        let (kept, skipped) = filter_alterable(ops, &AlterableTopicConfig::All);
        assert_eq!(kept.len(), 2);
        assert!(skipped.is_empty());
    }

    #[test]
    fn partitions_may_only_grow() {
        let mut spec = KafkaTopicSpec::default();
        assert_eq!(partition_delta(&spec, 3).unwrap(), None);

        spec.partitions = Some(5);
        assert_eq!(partition_delta(&spec, 3).unwrap(), Some(5));
        assert_eq!(partition_delta(&spec, 5).unwrap(), None);

        spec.partitions = Some(3);
        let err = partition_delta(&spec, 5).unwrap_err();
        assert_eq!(
            err,
            ReconcileError::NotSupported("Decreasing partitions not supported".to_string())
        );

        spec.partitions = Some(BROKER_DEFAULT);
        assert_eq!(partition_delta(&spec, 5).unwrap(), None);
    }
}
