use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
pub fn init(addr: SocketAddr) -> Result<(), BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();

    // Only the first call wins; the recorder can be installed once per process.
    let _ = PROM_HANDLE.set(handle);

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(render));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "metrics endpoint listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

/// Help text for every series the service emits.
pub fn describe_metrics() {
    describe_counter!("samples_ingested_total", "Telemetry samples appended to the sample store");
    describe_counter!("ingest_malformed_total", "Telemetry messages dropped as malformed");
    describe_counter!("ingest_store_errors_total", "Valid telemetry messages lost to store failures");
    describe_counter!("telemetry_source_errors_total", "Errors surfaced by the telemetry transport");
    describe_counter!("mqtt_messages_received_total", "Publishes received on the telemetry topic");
    describe_counter!("mqtt_connection_errors_total", "MQTT event loop errors, each followed by a reconnect");
    describe_counter!("http_ingest_requests_total", "Telemetry POSTs received by the HTTP source");
    describe_counter!("http_ingest_failed_total", "Telemetry POSTs rejected because the pipeline was gone");
    describe_histogram!(
        "ingest_end_to_end_latency_seconds",
        Unit::Seconds,
        "Time from receipt of a message to its sample being stored"
    );
    describe_counter!("aggregation_ticks_total", "Aggregation ticks started");
    describe_counter!("aggregation_tick_failures_total", "Aggregation ticks abandoned on a store error");
    describe_histogram!(
        "aggregation_tick_duration_seconds",
        Unit::Seconds,
        "Wall time of one aggregation tick"
    );
    describe_counter!("cost_aggregates_upserted_total", "Cost aggregate rows written, by granularity");
    describe_counter!("samples_retired_total", "Samples deleted by post-tick retention");
}

async fn render() -> String {
    PROM_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn described_series_render_with_help_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            metrics::counter!("aggregation_tick_failures_total").increment(2);
        });

        let out = handle.render();
        assert!(
            out.contains("# HELP aggregation_tick_failures_total Aggregation ticks abandoned on a store error"),
            "{out}"
        );
        assert!(out.contains("aggregation_tick_failures_total 2"), "{out}");
    }
}
