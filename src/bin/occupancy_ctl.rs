//! Occupancy control CLI
//!
//! Publishes a command to a location's control items on the event bus, the
//! same way the home-automation system does when a user flips the item.
//!
//! Usage:
//!   occupancy-ctl gKitchen lock --seconds 300
//!   occupancy-ctl gKitchen unlock
//!   occupancy-ctl gKitchen clear-locks
//!   occupancy-ctl gLounge occupied
//!   occupancy-ctl gLounge vacant

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use occupancy_manager::domain::types::StatusItem;
use occupancy_manager::infra::Config;
use occupancy_manager::services::{ControlCommand, StateCommand};
use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, QoS};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "occupancy-ctl")]
#[command(about = "Send occupancy commands to a location")]
struct Args {
    /// Path to TOML configuration file (broker and topic prefix)
    #[arg(short, long)]
    config: Option<String>,

    /// Location item name, e.g. gKitchen
    location: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Lock the location and its sub-locations
    Lock {
        /// Release the lock automatically after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },
    /// Release one lock level
    Unlock,
    /// Release every lock level at once
    ClearLocks,
    /// Mark the location occupied
    Occupied,
    /// Mark the location vacant
    Vacant,
}

impl Action {
    /// Target status item and the command text sent to it
    fn command(&self) -> (StatusItem, String) {
        match self {
            Action::Lock { seconds } => (
                StatusItem::Control,
                ControlCommand::Lock { timeout: seconds.map(Duration::from_secs) }.to_string(),
            ),
            Action::Unlock => (StatusItem::Control, ControlCommand::Unlock.to_string()),
            Action::ClearLocks => (StatusItem::Control, ControlCommand::ClearLocks.to_string()),
            Action::Occupied => (StatusItem::State, StateCommand::Occupied.as_str().to_string()),
            Action::Vacant => (StatusItem::State, StateCommand::Vacant.as_str().to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    let (status, command) = args.action.command();
    let item = status.item_name(&args.location);
    let topic = format!("{}/items/{}/command", config.mqtt_topic_prefix(), item);
    let payload = json!({ "type": "String", "value": command }).to_string();

    let mut mqtt_options =
        MqttOptions::new(format!("occupancy-ctl-{}", std::process::id()), config.mqtt_host(), config.mqtt_port());
    mqtt_options.set_keep_alive(Duration::from_secs(10));
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqtt_options.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);
    client
        .publish(topic.as_str(), QoS::AtLeastOnce, false, payload.clone())
        .await
        .context("failed to queue command")?;

    // Drive the event loop until the broker acknowledges the publish
    let delivered = tokio::time::timeout(PUBLISH_TIMEOUT, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(rumqttc::Packet::PubAck(_))) => return Ok(()),
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => debug!(pkid = pkid, "command_sent"),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    match delivered {
        Ok(Ok(())) => {
            info!(topic = %topic, payload = %payload, "command_published");
            let _ = client.disconnect().await;
            Ok(())
        }
        Ok(Err(e)) => Err(e).with_context(|| format!("MQTT connection to {}:{} failed", config.mqtt_host(), config.mqtt_port())),
        Err(_) => bail!("no acknowledgement from broker within {}s", PUBLISH_TIMEOUT.as_secs()),
    }
}
