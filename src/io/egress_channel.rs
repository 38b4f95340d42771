//! Typed channel for outbound registry writes
//!
//! Provides a non-blocking way to hand status updates and device commands to
//! the MQTT publisher. Uses a bounded mpsc channel to prevent unbounded memory
//! growth; the engine never waits on it.

use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages that can be sent to the MQTT publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EgressMessage {
    /// Status mirror update, never re-enters command handling
    StateUpdate { item: String, state: String },
    /// Device actuation
    Command { item: String, command: String },
}

impl EgressMessage {
    pub fn item(&self) -> &str {
        match self {
            EgressMessage::StateUpdate { item, .. } | EgressMessage::Command { item, .. } => item,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            EgressMessage::StateUpdate { state, .. } => state,
            EgressMessage::Command { command, .. } => command,
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    pub fn post_update(&self, item: &str, state: &str) {
        self.send(EgressMessage::StateUpdate { item: item.to_string(), state: state.to_string() });
    }

    pub fn send_command(&self, item: &str, command: &str) {
        self.send(EgressMessage::Command { item: item.to_string(), command: command.to_string() });
    }

    fn send(&self, msg: EgressMessage) {
        if self.tx.try_send(msg).is_err() {
            self.metrics.record_egress_dropped();
        }
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
/// Buffer size determines how many messages can be queued.
pub fn create_egress_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, metrics), rx)
}
