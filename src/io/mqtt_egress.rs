//! MQTT publisher for registry writes
//!
//! Publishes engine output to topics built from the configured templates:
//! - state topic - status mirror updates (QoS 0)
//! - command topic - device commands issued by location actions (QoS 1)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Substitute the item name into a topic template
pub fn render_topic(template: &str, item: &str) -> String {
    template.replace("{item}", item)
}

/// Publishes egress messages until shutdown, then drains what is queued
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    state_topic: String,
    command_topic: String,
}

impl MqttPublisher {
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let mut options =
            MqttOptions::new(format!("occupancy-egress-{}", std::process::id()), config.mqtt_host(), config.mqtt_port());
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            options.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(options, 100);
        tokio::spawn(drive(eventloop));

        Self {
            client,
            rx,
            state_topic: config.egress_state_topic().to_string(),
            command_topic: config.egress_command_topic().to_string(),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(state = %self.state_topic, command = %self.command_topic, "mqtt_egress_started");

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(msg) => self.publish(msg).await,
                    None => {
                        info!("mqtt_egress_channel_closed");
                        return;
                    }
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let mut drained = 0usize;
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish(msg).await;
                            drained += 1;
                        }
                        info!(drained = drained, "mqtt_egress_shutdown");
                        return;
                    }
                }
            }
        }
    }

    /// Topic and QoS for a message
    fn route(&self, msg: &EgressMessage) -> (String, QoS) {
        match msg {
            EgressMessage::StateUpdate { item, .. } => (render_topic(&self.state_topic, item), QoS::AtMostOnce),
            EgressMessage::Command { item, .. } => (render_topic(&self.command_topic, item), QoS::AtLeastOnce),
        }
    }

    async fn publish(&self, msg: EgressMessage) {
        let (topic, qos) = self.route(&msg);
        let payload = msg.value().as_bytes().to_vec();
        if let Err(e) = self.client.publish(topic.as_str(), qos, false, payload).await {
            warn!(error = %e, item = %msg.item(), topic = %topic, "mqtt_egress_publish_failed");
        }
    }
}

/// Poll the connection; rumqttc reconnects on the next poll after an error
async fn drive(mut eventloop: EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
            Ok(Event::Incoming(Packet::PubAck(ack))) => debug!(pkid = ack.pkid, "mqtt_egress_puback"),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "mqtt_egress_connection_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}
