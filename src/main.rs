//! Occupancy manager - location occupancy tracking for a home-automation system
//!
//! Listens to item events on the MQTT event bus, keeps every location's
//! occupied/vacant state, runs location actions and mirrors status items back.
//!
//! Module structure:
//! - `domain/` - Item model, occupancy metadata, action tokens
//! - `io/` - External interfaces (MQTT ingress/egress, Prometheus)
//! - `services/` - Business logic (LocationGraph, ActionExecutor)
//! - `infra/` - Infrastructure (Config, Metrics, ItemRegistry)

use anyhow::Context;
use clap::Parser;
use occupancy_manager::infra::{Config, ItemRegistry, Metrics, ModelError};
use occupancy_manager::io::{create_egress_channel, MqttPublisher};
use occupancy_manager::services::LocationGraph;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Occupancy manager - tracks location occupancy from sensor events
#[derive(Parser, Debug)]
#[command(name = "occupancy-manager", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the item model file from the configuration
    #[arg(short, long)]
    model: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Structured logging, level via RUST_LOG (default info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "occupancy_manager_starting");

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));
    let model_file = args.model.unwrap_or_else(|| config.model_file().to_string());

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        subscription = %config.mqtt_subscription(),
        egress_enabled = config.egress_enabled(),
        model_file = %model_file,
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    // A missing model is not fatal: locations arrive with `added` events
    let registry = match ItemRegistry::from_model_file(&model_file) {
        Ok(registry) => registry,
        Err(e @ ModelError::Read { .. }) => {
            warn!(error = %e, "model_file_unavailable_starting_empty");
            ItemRegistry::new()
        }
        Err(e) => return Err(e).context("invalid item model"),
    };
    info!(items = registry.len(), locations = registry.locations().len(), "model_loaded");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Bounded event queue between the MQTT client and the engine
    let (event_tx, event_rx) = mpsc::channel(config.event_queue_size());

    let mqtt_config = config.clone();
    let mqtt_tx = event_tx.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            occupancy_manager::io::mqtt::start_mqtt_client(&mqtt_config, mqtt_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "mqtt_client_error");
        }
    });

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        let site_id = config.site_id().to_string();
        tokio::spawn(async move {
            if let Err(e) = occupancy_manager::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                site_id,
                prom_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "prometheus_metrics_server_error");
            }
        });
    }

    // Periodic metrics summary; queue depth is sampled from the sender side
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    let depth_tx = event_tx;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            let depth = depth_tx.max_capacity() - depth_tx.capacity();
            metrics_clone.set_event_queue_depth(depth as u64);
            metrics_clone.report().log();
        }
    });

    let (egress_sender, mut egress_rx) = create_egress_channel(config.egress_queue_size(), metrics.clone());
    let publisher_handle = if config.egress_enabled() {
        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        }))
    } else {
        // Dry run: outbound messages are only logged
        tokio::spawn(async move {
            while let Some(msg) = egress_rx.recv().await {
                debug!(item = %msg.item(), value = %msg.value(), "egress_disabled_message_dropped");
            }
        });
        None
    };

    let mut graph = LocationGraph::new(&config, registry, egress_sender, metrics);
    graph.load_locations();
    for line in graph.render_tree().lines() {
        info!(tree = %line, "location_tree");
    }

    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    graph.run(event_rx, shutdown_rx).await;

    // Closing the egress channel lets the publisher drain and exit
    drop(graph);
    if let Some(handle) = publisher_handle {
        let _ = handle.await;
    }

    info!("occupancy_manager_shutdown_complete");
    Ok(())
}
