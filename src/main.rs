mod config;
mod consumer;
mod generator;
mod mqtt;
mod registry;
mod sample;
mod scheduler;
mod sink;
mod stats;

use crate::config::Config;
use crate::consumer::Consumer;
use crate::mqtt::MqttPublisher;
use crate::registry::EntityRegistry;
use crate::scheduler::Scheduler;
use crate::sink::{InfluxStore, SinkWriter};
use crate::stats::DeliveryStats;
use anyhow::Result;
use futures::future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,equipment_telemetry=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "equipment-telemetry"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() || trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn join_optional(handle: Option<&mut JoinHandle<()>>) -> Result<(), JoinError> {
    match handle {
        Some(handle) => handle.await,
        None => future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (config, setup_error) = Config::from_env()?;
    init_tracing(&config)?;
    if let Some(err) = setup_error {
        tracing::warn!(error = %format!("{err:#}"), "ignoring setup config; using env defaults");
    }
    tracing::info!(
        mode = ?config.mode,
        strategy = ?config.strategy,
        entities = ?config.entity_ids,
        measurement = config.measurement.as_str(),
        bucket = %config.influx_bucket,
        "equipment telemetry starting"
    );

    let stats = Arc::new(DeliveryStats::new());
    let registry = EntityRegistry::new(config.entity_ids.iter().copied());
    let generator = generator::build(config.strategy, config.seed);
    let store = Arc::new(InfluxStore::new(
        &config.influx_url,
        config.influx_token.clone(),
        config.influx_timeout(),
    )?);
    let writer = SinkWriter::from_config(store, &config);
    let cancel = CancellationToken::new();

    let mut publisher_handle = None;
    let mut scheduler_handle = if !config.mode.runs_scheduler() {
        None
    } else if config.mode.publishes() {
        let (publisher, handle) = MqttPublisher::new(&config);
        publisher_handle = Some(handle);
        let scheduler = Scheduler::new(
            generator.clone(),
            publisher,
            registry.clone(),
            stats.clone(),
            config.tick_interval(),
        );
        Some(tokio::spawn(scheduler.run(cancel.clone())))
    } else {
        let scheduler = Scheduler::new(
            generator.clone(),
            writer.clone(),
            registry.clone(),
            stats.clone(),
            config.tick_interval(),
        );
        Some(tokio::spawn(scheduler.run(cancel.clone())))
    };

    let mut consumer_handle = if config.mode.runs_consumer() {
        let consumer = Consumer::new(
            writer,
            registry,
            generator,
            stats.clone(),
            config.topics(),
        );
        let consumer_config = config.clone();
        let consumer_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = mqtt::run_consumer(consumer_config, consumer, consumer_cancel).await {
                tracing::error!(error=%err, "queue consumer exited");
            }
        }))
    } else {
        None
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        res = join_optional(scheduler_handle.as_mut()) => {
            if let Err(err) = res { tracing::error!(error=%err, "scheduler task failed"); }
        }
        res = join_optional(consumer_handle.as_mut()) => {
            if let Err(err) = res { tracing::error!(error=%err, "consumer task failed"); }
        }
    }

    // Let an in-flight tick or message finish before exiting.
    cancel.cancel();
    for handle in [scheduler_handle, consumer_handle].into_iter().flatten() {
        if !handle.is_finished() {
            let _ = handle.await;
        }
    }
    if let Some(handle) = publisher_handle {
        handle.abort();
    }

    let snapshot = stats.snapshot();
    tracing::info!(
        ticks = snapshot.ticks,
        delivered = snapshot.delivered,
        failed = snapshot.failed,
        deleted = snapshot.deleted,
        rejected = snapshot.rejected,
        last_error = snapshot.last_error.as_deref().unwrap_or(""),
        "equipment telemetry stopped"
    );

    Ok(())
}
