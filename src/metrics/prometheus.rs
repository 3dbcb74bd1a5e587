//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, Encoder, Histogram,
    HistogramTimer, HistogramVec, IntCounter, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Reconciliations that ended with a success outcome for the item
    pub static ref RECONCILIATIONS_SUCCESSFUL: IntCounter = register_int_counter!(
        "kafka_topic_operator_successful_reconciliations_total",
        "Total number of successful per-topic reconciliations"
    ).unwrap();

    /// Reconciliations that ended with an error outcome for the item
    pub static ref RECONCILIATIONS_FAILED: IntCounter = register_int_counter!(
        "kafka_topic_operator_failed_reconciliations_total",
        "Total number of failed per-topic reconciliations"
    ).unwrap();

    /// Batch reconciliation duration histogram
    pub static ref RECONCILE_DURATION: Histogram = register_histogram!(
        "kafka_topic_operator_reconcile_duration_seconds",
        "Duration of batch reconciliations in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Duration of calls to Kafka, the resource store and Cruise Control
    pub static ref EXTERNAL_CALL_DURATION: HistogramVec = register_histogram_vec!(
        "kafka_topic_operator_external_call_duration_seconds",
        "Duration of external calls in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "kafka_topic_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Scoped timer for one external call, no-op unless additional metrics are
/// enabled
pub struct ExternalCallTimer {
    timer: Option<HistogramTimer>,
}

impl ExternalCallTimer {
    pub fn start(operation: &str, enabled: bool) -> Self {
        Self {
            timer: enabled.then(|| {
                EXTERNAL_CALL_DURATION
                    .with_label_values(&[operation])
                    .start_timer()
            }),
        }
    }
}

impl Drop for ExternalCallTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.observe_duration();
        }
    }
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" => health_response(),
        "/readyz" | "/ready" => ready_response(),
        _ => not_found_response(),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Full::new(Bytes::from("Failed to encode metrics")))
            .unwrap();
    }

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", encoder.format_type())
        .body(Full::new(Bytes::from(buffer)))
        .unwrap()
}

/// Health check response
fn health_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Readiness check response
fn ready_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .body(Full::new(Bytes::from("ok")))
        .unwrap()
}

/// Not found response
fn not_found_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from("Not Found")))
        .unwrap()
}
