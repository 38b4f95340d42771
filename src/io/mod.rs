//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for receiving item events from the event bus
//! - `mqtt_egress` - MQTT publisher for status updates and device commands
//! - `egress_channel` - Typed channel for outbound registry writes
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

// Re-export commonly used types
pub use egress_channel::{create_egress_channel, EgressMessage, EgressSender};
pub use mqtt_egress::MqttPublisher;
