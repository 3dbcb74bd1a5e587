//! Per-item outcome accounting
//!
//! Inside the pipeline nothing is thrown: each stage yields per-item
//! `Result`s, and [`partition_results`] splits them while keeping the item
//! attached, so every outcome survives to the status-writing step.

use std::collections::HashMap;

use crate::error::ReconcileError;
use crate::reconcilers::KubeRef;

/// A stream of per-item results split into its two arms
#[derive(Debug)]
pub struct PartitionedByError<K, T> {
    pub ok: Vec<(K, T)>,
    pub errors: Vec<(K, ReconcileError)>,
}

impl<K, T> Default for PartitionedByError<K, T> {
    fn default() -> Self {
        PartitionedByError {
            ok: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Split `(item, result)` pairs into successes and failures, preserving the
/// item on both sides
pub fn partition_results<K, T>(
    results: impl IntoIterator<Item = (K, Result<T, ReconcileError>)>,
) -> PartitionedByError<K, T> {
    let mut partitioned = PartitionedByError::default();
    for (item, result) in results {
        match result {
            Ok(value) => partitioned.ok.push((item, value)),
            Err(error) => partitioned.errors.push((item, error)),
        }
    }
    partitioned
}

/// Accumulated per-item outcomes of one batch.
///
/// Merge rule: errors win. A success never overwrites an error, and the
/// first error recorded for an item is the one that is kept.
#[derive(Debug, Default)]
pub struct BatchOutcomes {
    outcomes: HashMap<KubeRef, Result<(), ReconcileError>>,
}

impl BatchOutcomes {
    pub fn record_ok(&mut self, kref: &KubeRef) {
        self.outcomes.entry(kref.clone()).or_insert(Ok(()));
    }

    pub fn record_err(&mut self, kref: &KubeRef, error: ReconcileError) {
        match self.outcomes.get(kref) {
            Some(Err(_)) => {}
            _ => {
                self.outcomes.insert(kref.clone(), Err(error));
            }
        }
    }

    pub fn record(&mut self, kref: &KubeRef, result: Result<(), ReconcileError>) {
        match result {
            Ok(()) => self.record_ok(kref),
            Err(e) => self.record_err(kref, e),
        }
    }

    /// Outcome for an item; items never recorded count as successes
    pub fn get(&self, kref: &KubeRef) -> Result<(), ReconcileError> {
        self.outcomes.get(kref).cloned().unwrap_or(Ok(()))
    }

    pub fn is_err(&self, kref: &KubeRef) -> bool {
        matches!(self.outcomes.get(kref), Some(Err(_)))
    }
}
