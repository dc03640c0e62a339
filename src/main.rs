//! Last-mile dispatch service.
//!
//! Wires the road-network provider, geocoder adapter, and dispatch config
//! into a shared `AppState`, then serves the dispatch gRPC API alongside
//! a `/metrics` + `/health` HTTP surface.

mod grpc;

mod config;
mod dispatch;
mod errors;
mod feasibility;
mod geocode;
mod model;
mod road_network;
mod scoring;
mod sequencer;
mod telemetry;
mod zone;

use anyhow::Result;
use config::DispatchConfig;
use geocode::{GeocodeAdapter, StubGeocoder};
use road_network::{BoundingBox, RoadNetworkProvider};
use std::sync::Arc;
use tracing::info;

/// Default preload window: greater Buenos Aires, matching the zone map's
/// default coverage (config.rs's `default_zone_map`).
const DEFAULT_PRELOAD_BBOX: BoundingBox = BoundingBox {
    north: -34.30,
    south: -34.75,
    east: -58.20,
    west: -58.90,
};

/// Shared application state handed to every gRPC call.
pub struct AppState {
    pub config: Arc<DispatchConfig>,
    pub provider: Arc<RoadNetworkProvider>,
    pub geocoder: GeocodeAdapter<StubGeocoder>,
    pub audit: telemetry::AuditSink,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();
    info!("starting last-mile dispatch service");

    let config = Arc::new(DispatchConfig::from_env()?);
    info!(weights = ?config.weights, "configuration loaded");

    let provider = Arc::new(RoadNetworkProvider::new(
        config.default_avg_speed_kph,
        config.default_search_radius_m,
    ));
    provider.preload(DEFAULT_PRELOAD_BBOX).await;

    let geocoder = GeocodeAdapter::new(StubGeocoder);
    let audit = telemetry::AuditSink::open("dispatch-audit.jsonl").await?;

    let state = Arc::new(AppState {
        config: Arc::clone(&config),
        provider: Arc::clone(&provider),
        geocoder,
        audit,
    });

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .unwrap_or_else(|_| "8090".to_string())
        .parse()?;
    tokio::spawn(async move {
        if let Err(e) = telemetry::serve_metrics_and_health(metrics_port).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    let grpc_port: u16 = std::env::var("GRPC_PORT")
        .unwrap_or_else(|_| "50051".to_string())
        .parse()?;
    let addr = format!("0.0.0.0:{grpc_port}").parse()?;
    info!(%addr, "gRPC server listening");

    tonic::transport::Server::builder()
        .add_service(grpc::dispatch_service_server(state))
        .serve(addr)
        .await?;

    Ok(())
}
