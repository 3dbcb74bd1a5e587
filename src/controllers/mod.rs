//! Controller implementations for watching and reconciling resources

pub mod topic_controller;

use kube::Client;
use std::sync::Arc;

use crate::reconcilers::topic::BatchingTopicController;

/// Shared context for controllers
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// The batch reconciliation engine
    pub controller: Arc<BatchingTopicController>,
}

impl Context {
    /// Create a new context
    pub fn new(client: Client, controller: Arc<BatchingTopicController>) -> Arc<Self> {
        Arc::new(Self { client, controller })
    }
}
