//! MQTT client for receiving item events from the home-automation event bus
//!
//! Topics follow the event bus layout `<prefix>/items/<item>/<event>` where
//! `<event>` is one of added, updated, removed, statechanged or command.

use crate::domain::types::{ItemDef, ItemEvent};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// `statechanged` / `command` payload: `{"type": .., "value": .., "oldType": .., "oldValue": ..}`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValuePayload {
    value: Value,
    #[serde(default)]
    old_value: Option<Value>,
}

/// Start the MQTT client and forward parsed item events to the engine queue
///
/// Events are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped events are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    event_tx: mpsc::Sender<ItemEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("occupancy-manager-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    let subscription = config.mqtt_subscription();
    info!(topic = %subscription, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_connecting");

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);
    let prefix = config.mqtt_topic_prefix().to_string();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let payload = match std::str::from_utf8(&publish.payload) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(error = %e, topic = %publish.topic, "mqtt_invalid_utf8");
                                continue;
                            }
                        };

                        let Some(event) = parse_item_event(&prefix, &publish.topic, payload) else {
                            continue;
                        };
                        debug!(item = %event.item_name(), kind = %event.kind_str(), "item_event_received");

                        match event_tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                metrics.record_ingress_dropped();
                                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                    warn!("item_event_dropped: channel full");
                                    last_drop_warn = Instant::now();
                                }
                            }
                            Err(TrySendError::Closed(_)) => {
                                warn!("event channel closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // clean session: subscribe again after every reconnect
                        client.subscribe(subscription.as_str(), QoS::AtLeastOnce).await?;
                        info!(topic = %subscription, "mqtt_subscribed");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Map an event bus message to an `ItemEvent`
///
/// Unknown topics and malformed payloads are logged at debug and dropped.
pub fn parse_item_event(prefix: &str, topic: &str, payload: &str) -> Option<ItemEvent> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix("/items/")?;
    let (item, kind) = rest.split_once('/')?;
    if item.is_empty() || kind.contains('/') {
        debug!(topic = %topic, "unrecognised_topic");
        return None;
    }

    match kind {
        "added" => parse_item_def(item, payload).map(ItemEvent::Added),
        "updated" => parse_item_def(item, payload).map(ItemEvent::Updated),
        "removed" => Some(ItemEvent::Removed { name: item.to_string() }),
        "statechanged" => {
            let parsed: ValuePayload = parse_json(topic, payload)?;
            Some(ItemEvent::StateChanged {
                item: item.to_string(),
                state: value_to_string(&parsed.value),
                old_state: parsed.old_value.as_ref().map(value_to_string),
            })
        }
        "command" => {
            let parsed: ValuePayload = parse_json(topic, payload)?;
            Some(ItemEvent::Command { item: item.to_string(), command: value_to_string(&parsed.value) })
        }
        other => {
            debug!(topic = %topic, event = %other, "unhandled_item_event");
            None
        }
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(topic: &str, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(topic = %topic, error = %e, "malformed_payload");
            None
        }
    }
}

/// Item definitions arrive either as an object or, for updates, as `[new, old]`
fn parse_item_def(item: &str, payload: &str) -> Option<ItemDef> {
    let value: Value = parse_json(item, payload)?;
    let mut value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        obj @ Value::Object(_) => obj,
        _ => {
            debug!(item = %item, "item_definition_not_an_object");
            return None;
        }
    };

    if let Value::Object(map) = &mut value {
        if !map.contains_key("kind") {
            let kind = infer_kind(map);
            map.insert("kind".to_string(), Value::String(kind.to_string()));
        }
    }

    match serde_json::from_value::<ItemDef>(value) {
        Ok(mut def) => {
            if def.name.is_empty() {
                def.name = item.to_string();
            }
            Some(def)
        }
        Err(e) => {
            debug!(item = %item, error = %e, "malformed_item_definition");
            None
        }
    }
}

/// Event bus payloads carry the semantic class as a tag rather than a field
fn infer_kind(map: &serde_json::Map<String, Value>) -> &'static str {
    let has_tag = |tag: &str| {
        map.get("tags")
            .and_then(Value::as_array)
            .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some(tag)))
    };
    if has_tag("Location") {
        "location"
    } else if has_tag("Equipment") {
        "equipment"
    } else if map.get("type").and_then(Value::as_str) == Some("Group") {
        "group"
    } else {
        "point"
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}
