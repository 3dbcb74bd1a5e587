//! Controller for KafkaTopic resources
//!
//! Thin feed between the kube-runtime watch loop and the batch
//! reconciliation engine: every watch event becomes a single-item batch.
//! The engine itself accepts batches of any size.

use futures::StreamExt;
use kube::{
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    Api, ResourceExt,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};

use crate::controllers::Context;
use crate::crd::KafkaTopic;
use crate::metrics::RECONCILE_DURATION;
use crate::Error;

/// Requeue interval for periodic drift detection
const RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Run the topic controller
pub async fn run(ctx: Arc<Context>, namespace: &str, label_selector: Option<String>) {
    let topics: Api<KafkaTopic> = Api::namespaced(ctx.client.clone(), namespace);

    let mut watcher_config = Config::default().any_semantic();
    if let Some(selector) = label_selector {
        watcher_config = watcher_config.labels(&selector);
    }

    info!(namespace, "Starting KafkaTopic controller");

    Controller::new(topics, watcher_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;

    info!("KafkaTopic controller stopped");
}

/// Reconcile a KafkaTopic resource
#[instrument(skip(topic, ctx), fields(name = %topic.name_any(), namespace = topic.namespace().unwrap_or_default()))]
async fn reconcile(topic: Arc<KafkaTopic>, ctx: Arc<Context>) -> Result<Action, Error> {
    let timer = RECONCILE_DURATION.start_timer();

    // Deletion routing happens inside the batch pipeline; events for
    // resources with a deletion timestamp still enter through on_update
    ctx.controller
        .on_update(vec![topic.as_ref().clone()])
        .await?;

    timer.observe_duration();
    Ok(Action::requeue(RESYNC_INTERVAL))
}

/// Error policy for the controller
fn error_policy(topic: Arc<KafkaTopic>, err: &Error, _ctx: Arc<Context>) -> Action {
    let ns = topic.namespace().unwrap_or_default();
    let name = topic.name_any();

    error!("Reconciliation error for {}/{}: {:?}", ns, name, err);

    match err {
        // Shutting down; do not spin
        Error::Interrupted(_) => Action::await_change(),
        Error::KubeError(_) => Action::requeue(Duration::from_secs(30)),
        Error::ConfigError(_) => Action::requeue(Duration::from_secs(300)),
    }
}
