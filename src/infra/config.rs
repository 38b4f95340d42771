//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Event bus prefix, subscriptions go to `<prefix>/items/+/+`
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_topic_prefix() -> String {
    "openhab".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// Topic template for status mirror updates (QoS 0), `{item}` is replaced
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
    /// Topic template for device commands (QoS 1), `{item}` is replaced
    #[serde(default = "default_command_topic")]
    pub command_topic: String,
    #[serde(default = "default_egress_queue_size")]
    pub queue_size: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_egress_enabled(),
            state_topic: default_state_topic(),
            command_topic: default_command_topic(),
            queue_size: default_egress_queue_size(),
        }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_state_topic() -> String {
    "openhab/out/{item}/state".to_string()
}

fn default_command_topic() -> String {
    "openhab/out/{item}/command".to_string()
}

fn default_egress_queue_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OccupancyConfig {
    /// TOML item model used to seed the registry mirror
    #[serde(default = "default_model_file")]
    pub model_file: String,
    /// chrono format string for the Occupancy-Time item
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Item whose state is ON during daylight (IfDark actions)
    #[serde(default = "default_daylight_item")]
    pub daylight_item: String,
    /// Write an empty OccupancySettings block on locations without one
    #[serde(default)]
    pub create_location_metadata: bool,
    /// Write an empty OccupancyEvent block on points without one
    #[serde(default)]
    pub create_event_metadata: bool,
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            model_file: default_model_file(),
            time_format: default_time_format(),
            daylight_item: default_daylight_item(),
            create_location_metadata: false,
            create_event_metadata: false,
            event_queue_size: default_event_queue_size(),
        }
    }
}

fn default_model_file() -> String {
    "config/model.toml".to_string()
}

fn default_time_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

fn default_daylight_item() -> String {
    "DayLight_Switch".to_string()
}

fn default_event_queue_size() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: 60, prometheus_port: default_prometheus_port() }
    }
}

fn default_prometheus_port() -> u16 {
    9091
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "home", "cabin")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "occupancy".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub occupancy: OccupancyConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic_prefix: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    egress_enabled: bool,
    egress_state_topic: String,
    egress_command_topic: String,
    egress_queue_size: usize,
    model_file: String,
    time_format: String,
    daylight_item: String,
    create_location_metadata: bool,
    create_event_metadata: bool,
    event_queue_size: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_topic_prefix: default_topic_prefix(),
            mqtt_username: None,
            mqtt_password: None,
            egress_enabled: default_egress_enabled(),
            egress_state_topic: default_state_topic(),
            egress_command_topic: default_command_topic(),
            egress_queue_size: default_egress_queue_size(),
            model_file: default_model_file(),
            time_format: default_time_format(),
            daylight_item: default_daylight_item(),
            create_location_metadata: false,
            create_event_metadata: false,
            event_queue_size: default_event_queue_size(),
            metrics_interval_secs: 60,
            prometheus_port: default_prometheus_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path: explicit argument, then CONFIG_FILE, then config/dev.toml
    pub fn resolve_config_path(explicit: Option<&str>) -> String {
        if let Some(path) = explicit {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic_prefix: toml_config.mqtt.topic_prefix,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            egress_enabled: toml_config.egress.enabled,
            egress_state_topic: toml_config.egress.state_topic,
            egress_command_topic: toml_config.egress.command_topic,
            egress_queue_size: toml_config.egress.queue_size,
            model_file: toml_config.occupancy.model_file,
            time_format: toml_config.occupancy.time_format,
            daylight_item: toml_config.occupancy.daylight_item,
            create_location_metadata: toml_config.occupancy.create_location_metadata,
            create_event_metadata: toml_config.occupancy.create_event_metadata,
            event_queue_size: toml_config.occupancy.event_queue_size,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration from a path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic_prefix(&self) -> &str {
        &self.mqtt_topic_prefix
    }

    /// Subscription filter for the item event bus
    pub fn mqtt_subscription(&self) -> String {
        format!("{}/items/+/+", self.mqtt_topic_prefix)
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_state_topic(&self) -> &str {
        &self.egress_state_topic
    }

    pub fn egress_command_topic(&self) -> &str {
        &self.egress_command_topic
    }

    pub fn egress_queue_size(&self) -> usize {
        self.egress_queue_size
    }

    pub fn model_file(&self) -> &str {
        &self.model_file
    }

    pub fn time_format(&self) -> &str {
        &self.time_format
    }

    pub fn daylight_item(&self) -> &str {
        &self.daylight_item
    }

    pub fn create_location_metadata(&self) -> bool {
        self.create_location_metadata
    }

    pub fn create_event_metadata(&self) -> bool {
        self.create_event_metadata
    }

    pub fn event_queue_size(&self) -> usize {
        self.event_queue_size
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to enable placeholder location metadata
    #[cfg(test)]
    pub fn with_create_location_metadata(mut self, enabled: bool) -> Self {
        self.create_location_metadata = enabled;
        self
    }

    /// Builder method for tests to enable placeholder sensor metadata
    #[cfg(test)]
    pub fn with_create_event_metadata(mut self, enabled: bool) -> Self {
        self.create_event_metadata = enabled;
        self
    }

    /// Builder method for tests to set the daylight item
    #[cfg(test)]
    pub fn with_daylight_item(mut self, item: &str) -> Self {
        self.daylight_item = item.to_string();
        self
    }
}
