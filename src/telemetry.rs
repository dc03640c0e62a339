//! Ambient observability: structured logging, the request/response audit
//! log, and the `/metrics` + `/health` HTTP surface. Grounded on the
//! teacher's `main.rs` — same `tracing_subscriber` registry shape, same
//! `prometheus` + `axum` metrics server.

use serde::Serialize;
use std::sync::OnceLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes the global tracing subscriber. Call once at startup.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();
}

pub struct Metrics {
    pub dispatch_total: prometheus::IntCounterVec,
    pub dispatch_duration_seconds: prometheus::Histogram,
    pub batch_orders_total: prometheus::IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Returns the process-wide metrics registry, registering it with the
/// default `prometheus` registry on first access.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let dispatch_total = prometheus::register_int_counter_vec!(
            "dispatch_total",
            "Single-order dispatch calls by outcome",
            &["outcome"]
        )
        .expect("dispatch_total metric registers exactly once");

        let dispatch_duration_seconds = prometheus::register_histogram!(
            "dispatch_duration_seconds",
            "Wall-clock duration of a single-order dispatch call"
        )
        .expect("dispatch_duration_seconds metric registers exactly once");

        let batch_orders_total = prometheus::register_int_counter_vec!(
            "batch_orders_total",
            "Orders processed by a batch dispatch call, by outcome",
            &["outcome"]
        )
        .expect("batch_orders_total metric registers exactly once");

        Metrics {
            dispatch_total,
            dispatch_duration_seconds,
            batch_orders_total,
        }
    })
}

/// One line of the append-only dispatch audit log (spec.md §6: "append-only
/// JSON lines with ISO-8601 timestamps").
#[derive(Debug, Serialize)]
pub struct AuditRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: &'static str,
    pub order_id: Option<String>,
    pub assigned_vehicle_id: Option<String>,
    pub failure_reason: Option<&'static str>,
    pub duration_ms: u64,
}

/// Appends one JSON line per call. Failures to write are logged but never
/// propagated — an audit-log outage must not take down dispatch.
pub struct AuditSink {
    file: Mutex<tokio::fs::File>,
}

impl AuditSink {
    pub async fn open(path: &str) -> std::io::Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(AuditSink {
            file: Mutex::new(file),
        })
    }

    pub async fn record(&self, record: &AuditRecord) {
        let Ok(mut line) = serde_json::to_string(record) else {
            tracing::warn!("failed to serialize audit record");
            return;
        };
        line.push('\n');

        let mut file = self.file.lock().await;
        if let Err(e) = file.write_all(line.as_bytes()).await {
            tracing::warn!(error = %e, "failed to append audit record");
        }
    }
}

async fn metrics_handler() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Serves `/metrics` and `/health` on `port` until the process exits.
pub async fn serve_metrics_and_health(port: u16) -> anyhow::Result<()> {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_handler))
        .route("/health", axum::routing::get(health_handler));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "metrics server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
