//! Visitor counter - doorway presence detection and counting
//!
//! Samples an ultrasonic range finder, confirms entries through a debounce
//! filter and a zone hysteresis machine, persists the count, and reports the
//! cumulative total to the counting server.
//!
//! Module structure:
//! - `domain/` - Core types (distances, states, reports, storage layout)
//! - `io/` - External interfaces (sensor, storage, HTTP, SNTP, commands, Prometheus)
//! - `services/` - Business logic (debounce, zone machine, counter, clock, engine)
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use visitor_counter::infra::{Config, Metrics, SensorKind};
use visitor_counter::io::{
    start_command_listener, CommandRequest, DistanceSensor, FileNvStorage, HttpReporter,
    ReportSink, SerialDistanceSensor, SimulatedSensor, SntpClient, TimeSource,
};
use visitor_counter::services::Engine;

/// Visitor counter - ultrasonic doorway counter with server uplink
#[derive(Parser, Debug)]
#[command(name = "visitor-counter", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    // RUST_LOG overrides the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "visitor-counter starting");

    config.validate().context("invalid configuration")?;

    info!(
        config_file = %config.config_file(),
        device_id = %config.device_id(),
        sensor = ?config.sensor_kind(),
        zone_threshold_cm = %config.zone_threshold_cm(),
        exit_threshold_cm = %config.exit_threshold_cm(),
        required_consecutive = %config.required_consecutive(),
        report_url = %config.report_url(),
        ntp_server = %config.ntp_server(),
        storage = %config.storage_path(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let storage = FileNvStorage::open(config.storage_path(), config.storage_size())
        .with_context(|| format!("failed to open storage image {}", config.storage_path()))?;

    // Start command listener (if port > 0)
    let (cmd_tx, cmd_rx) = mpsc::channel::<CommandRequest>(16);
    let command_port = config.command_port();
    let command_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_command_listener(command_port, cmd_tx, command_shutdown).await {
            tracing::error!(error = %e, "command listener error");
        }
    });

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_device = config.device_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = visitor_counter::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                prom_device,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    match config.sensor_kind() {
        SensorKind::Serial => {
            let sensor = SerialDistanceSensor::new(&config);
            run_engine(config, sensor, storage, metrics, cmd_rx, shutdown_rx).await?
        }
        SensorKind::Simulated => {
            let sensor = SimulatedSensor::walkthrough();
            run_engine(config, sensor, storage, metrics, cmd_rx, shutdown_rx).await?
        }
    }

    info!("visitor-counter shutdown complete");
    Ok(())
}

async fn run_engine<S: DistanceSensor>(
    config: Config,
    sensor: S,
    storage: FileNvStorage,
    metrics: Arc<Metrics>,
    cmd_rx: mpsc::Receiver<CommandRequest>,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let reporter: Arc<dyn ReportSink> = Arc::new(HttpReporter::new(&config)?);
    let time_source: Arc<dyn TimeSource> = Arc::new(SntpClient::new(config.ntp_server()));

    let engine = Engine::new(config, sensor, storage, reporter, time_source, metrics)?;
    let engine = engine.run(cmd_rx, shutdown_rx).await;
    info!(visitor_count = engine.visitor_count(), "engine_finished");
    Ok(())
}
