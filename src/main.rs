//! Kafka Topic Operator
//!
//! Main entry point for the operator. Loads configuration, connects the
//! Kubernetes and Kafka admin clients, and runs the reconciliation loop.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kafka_topic_operator::{
    adapters::kafka_admin::{KafkaAdmin, RdKafkaAdmin},
    adapters::rebalancer::{CruiseControlRebalancer, Rebalancer},
    adapters::topic_store::KubeTopicStore,
    config::OperatorConfig,
    controllers::{topic_controller, Context},
    metrics,
    reconcilers::topic::BatchingTopicController,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    info!("Starting Kafka Topic Operator");

    let config = OperatorConfig::from_env()?;

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let shutdown = CancellationToken::new();
    let admin = Arc::new(RdKafkaAdmin::new(&config, shutdown.clone())?);

    let cluster_min_isr = if config.skip_cluster_config_review {
        None
    } else {
        review_cluster_config(admin.as_ref()).await
    };

    let store = Arc::new(KubeTopicStore::new(
        client.clone(),
        config.enable_additional_metrics,
    ));
    let rebalancer: Option<Arc<dyn Rebalancer>> = config.cruise_control_enabled.then(|| {
        Arc::new(CruiseControlRebalancer::new(
            config.cruise_control_url.clone(),
            config.enable_additional_metrics,
        )) as Arc<dyn Rebalancer>
    });

    let namespace = config.namespace.clone();
    let label_selector = (!config.resource_labels.is_empty()).then(|| {
        config
            .resource_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    });
    let metrics_port = config.metrics_port;

    let controller = Arc::new(BatchingTopicController::new(
        config,
        admin,
        store,
        rebalancer,
        cluster_min_isr,
    ));
    let context = Context::new(client, controller);

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(metrics_port));
    info!("Metrics server starting on port {}", metrics_port);

    // Run the topic controller
    let controller_handle = tokio::spawn(async move {
        topic_controller::run(context, &namespace, label_selector).await;
    });

    // Handle graceful shutdown
    tokio::select! {
        _ = controller_handle => {
            error!("Topic controller exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
            shutdown.cancel();
        }
    }

    info!("Kafka Topic Operator stopped");
    Ok(())
}

/// Startup review of cluster-level configuration: warn about automatic
/// topic creation and cache `min.insync.replicas` for replica-change
/// validation
async fn review_cluster_config(admin: &dyn KafkaAdmin) -> Option<i32> {
    match admin.describe_cluster_config("auto.create.topics.enable").await {
        Ok(Some(value)) if value == "true" => {
            warn!(
                "The cluster has auto.create.topics.enable set; \
                 topics created outside the operator will not be reconciled"
            );
        }
        Ok(_) => {}
        Err(_) => return None,
    }

    match admin.describe_cluster_config("min.insync.replicas").await {
        Ok(value) => value.and_then(|v| v.parse().ok()),
        Err(_) => None,
    }
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,kafka_topic_operator=debug,kube=warn,hyper=warn,rdkafka=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
