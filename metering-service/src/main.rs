use std::sync::Arc;

use anyhow::Result;
use metering_service::{
    aggregation::{AggregationScheduler, Windows},
    clock::{Clock, SystemClock},
    config::{parse_bind_addr, AppConfig, SourceKind, StoreKind},
    cost::CostCalculator,
    ingest::Ingestor,
    metrics_server, observability,
    pipeline::{IngestPipeline, SourceError, TelemetrySource, TelemetryStream},
    sources::{HttpSource, MqttSource},
    store::{AggregateStore, MemoryStore, PgStore, SampleStore},
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

enum Telemetry {
    Mqtt(MqttSource),
    Http(HttpSource),
}

#[async_trait::async_trait]
impl TelemetrySource for Telemetry {
    async fn stream(&self) -> Result<TelemetryStream, SourceError> {
        match self {
            Self::Mqtt(s) => s.stream().await,
            Self::Http(s) => s.stream().await,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration; any problem here is fatal.
    let cfg = AppConfig::load().inspect_err(|e| {
        tracing::error!(error = %e, "invalid configuration, not starting");
    })?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(parse_bind_addr("metrics.bind_addr", &metrics_cfg.bind_addr)?)?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(cfg.aggregation.utc_offset()?));

    let (samples, aggregates): (Arc<dyn SampleStore>, Arc<dyn AggregateStore>) = match cfg.database.kind {
        StoreKind::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(cfg.database.max_connections)
                .connect(&cfg.database.uri)
                .await?;
            if cfg.database.apply_schema {
                metering_client::db::schema::ensure_schema(&pool).await?;
                tracing::info!("database schema ensured");
            }
            let store = Arc::new(PgStore::new(pool));
            let samples: Arc<dyn SampleStore> = store.clone();
            let aggregates: Arc<dyn AggregateStore> = store;
            (samples, aggregates)
        }
        StoreKind::Memory => {
            tracing::warn!("using in-memory store; samples and aggregates are lost on exit");
            let store = Arc::new(MemoryStore::new());
            let samples: Arc<dyn SampleStore> = store.clone();
            let aggregates: Arc<dyn AggregateStore> = store;
            (samples, aggregates)
        }
    };

    let scheduler = AggregationScheduler::new(
        samples.clone(),
        aggregates,
        CostCalculator::new(cfg.pricing.price_per_kwh),
        clock.clone(),
        Windows::from(&cfg.aggregation),
        cfg.aggregation.tick_period(),
    );

    let src_cfg = &cfg.source;
    let source = match src_cfg.kind {
        SourceKind::Mqtt => {
            let mqtt_cfg = src_cfg
                .mqtt
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("missing [source.mqtt] section"))?;
            Telemetry::Mqtt(MqttSource::new(mqtt_cfg, src_cfg.channel_capacity))
        }
        SourceKind::Http => {
            let http_cfg = src_cfg
                .http
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("missing [source.http] section"))?;
            let addr = parse_bind_addr("source.http.bind_addr", &http_cfg.bind_addr)?;
            Telemetry::Http(HttpSource::new(addr, src_cfg.channel_capacity).await?)
        }
    };

    let pipeline = IngestPipeline {
        source,
        ingestor: Ingestor::new(samples, clock),
        max_in_flight: src_cfg.max_in_flight,
    };

    let scheduler = scheduler.spawn(CancellationToken::new());

    // Run ingestion until the source ends or we are asked to stop.
    let result: Result<()> = tokio::select! {
        res = pipeline.run() => res.map_err(Into::into),
        res = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            res.map_err(Into::into)
        }
    };

    // Let the in-flight tick finish before exiting.
    scheduler.shutdown().await;

    result
}
