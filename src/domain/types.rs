//! Shared types for the occupancy manager
//!
//! The item model mirrors the external home-automation registry: every location,
//! equipment, sensor point and status mirror is an item addressed by name.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Metadata namespace read from sensor points
pub const EVENT_NAMESPACE: &str = "OccupancyEvent";

/// Metadata namespace read from location items
pub const SETTINGS_NAMESPACE: &str = "OccupancySettings";

/// Semantic class of an item in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Location,
    Equipment,
    Point,
    #[default]
    Group,
}

/// Per-namespace metadata block attached to an item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Main value (for sensors: the occupancy role)
    #[serde(default)]
    pub value: String,
    /// Key/value configuration, values normalised to strings
    #[serde(default, alias = "config", deserialize_with = "deserialize_configuration")]
    pub configuration: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new(value: &str) -> Self {
        Self { value: value.to_string(), configuration: BTreeMap::new() }
    }

    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.configuration.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Configuration values may be written as strings, numbers or booleans in the
/// model file or in event payloads; the registry stores them as strings.
fn deserialize_configuration<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawValue {
        Text(String),
        Integer(i64),
        Float(f64),
        Flag(bool),
    }

    let raw: BTreeMap<String, RawValue> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let text = match value {
                RawValue::Text(s) => s,
                RawValue::Integer(i) => i.to_string(),
                RawValue::Float(f) => f.to_string(),
                RawValue::Flag(b) => b.to_string(),
            };
            (key, text)
        })
        .collect())
}

/// A single registry item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemDef {
    /// Filled in from the event topic when a payload omits it
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: ItemKind,
    /// Registry item type (Switch, Contact, Dimmer, String, ...)
    #[serde(default, rename = "type")]
    pub item_type: String,
    #[serde(default)]
    pub label: String,
    /// Current state as reported by the registry ("NULL" until first update)
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Names of the groups this item is a member of
    #[serde(default, alias = "groupNames")]
    pub groups: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Metadata>,
}

fn default_state() -> String {
    "NULL".to_string()
}

impl ItemDef {
    pub fn new(name: &str, kind: ItemKind) -> Self {
        Self { name: name.to_string(), kind, state: default_state(), ..Default::default() }
    }

    pub fn in_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }

    pub fn tagged(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn with_type(mut self, item_type: &str) -> Self {
        self.item_type = item_type.to_string();
        self
    }

    pub fn with_state(mut self, state: &str) -> Self {
        self.state = state.to_string();
        self
    }

    pub fn with_metadata(mut self, namespace: &str, metadata: Metadata) -> Self {
        self.metadata.insert(namespace.to_string(), metadata);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_location(&self) -> bool {
        self.kind == ItemKind::Location
    }
}

/// Inbound event delivered by the registry/event bus
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEvent {
    /// A new item was added to the registry
    Added(ItemDef),
    /// An existing item's definition (tags, groups, metadata) changed
    Updated(ItemDef),
    /// An item was removed from the registry
    Removed { name: String },
    /// An item's state changed
    StateChanged { item: String, state: String, old_state: Option<String> },
    /// A command was sent to an item
    Command { item: String, command: String },
}

impl ItemEvent {
    pub fn state_changed(item: &str, state: &str) -> Self {
        ItemEvent::StateChanged { item: item.to_string(), state: state.to_string(), old_state: None }
    }

    pub fn command(item: &str, command: &str) -> Self {
        ItemEvent::Command { item: item.to_string(), command: command.to_string() }
    }

    /// Name of the item the event refers to
    pub fn item_name(&self) -> &str {
        match self {
            ItemEvent::Added(def) | ItemEvent::Updated(def) => &def.name,
            ItemEvent::Removed { name } => name,
            ItemEvent::StateChanged { item, .. } | ItemEvent::Command { item, .. } => item,
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            ItemEvent::Added(_) => "added",
            ItemEvent::Updated(_) => "updated",
            ItemEvent::Removed { .. } => "removed",
            ItemEvent::StateChanged { .. } => "statechanged",
            ItemEvent::Command { .. } => "command",
        }
    }
}

/// The four status/control items every location owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusItem {
    /// Occupancy-State: ON occupied, OFF vacant; also accepts direct commands
    State,
    /// Occupancy-Control: LOCK / LOCK,<secs> / UNLOCK / CLEARLOCKS commands
    Control,
    /// Occupancy-Lock: ON while locked
    Lock,
    /// Occupancy-Time: expiry timestamp, "Locked" or "Vacant"
    Time,
}

impl StatusItem {
    pub const ALL: [StatusItem; 4] =
        [StatusItem::State, StatusItem::Control, StatusItem::Lock, StatusItem::Time];

    pub fn tag(&self) -> &'static str {
        match self {
            StatusItem::State => "OccupancyState",
            StatusItem::Control => "OccupancyControl",
            StatusItem::Lock => "OccupancyLock",
            StatusItem::Time => "OccupancyTime",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            StatusItem::State => "_Occupancy_State",
            StatusItem::Control => "_Occupancy_Control",
            StatusItem::Lock => "_Occupancy_Lock",
            StatusItem::Time => "_Occupancy_Time",
        }
    }

    fn item_type(&self) -> &'static str {
        match self {
            StatusItem::State | StatusItem::Lock => "Switch",
            StatusItem::Control | StatusItem::Time => "String",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            StatusItem::State => " Occupied",
            StatusItem::Control => " Occupancy Control",
            StatusItem::Lock => " Occupancy Locking",
            StatusItem::Time => " Occupied Until",
        }
    }

    /// Registry name of this status item for a location
    pub fn item_name(&self, location: &str) -> String {
        format!("{}{}", location, self.suffix())
    }

    /// Definition used when the item does not exist yet
    pub fn definition(&self, location: &str) -> ItemDef {
        let mut def = ItemDef::new(&self.item_name(location), ItemKind::Point)
            .with_type(self.item_type())
            .in_group(location)
            .tagged(self.tag())
            .tagged("OccupancyManager");
        def.label = format!("{}{}", location, self.label());
        def
    }

    /// Which status item an item is, judging by its tags
    pub fn from_tags(tags: &[String]) -> Option<StatusItem> {
        Self::ALL.into_iter().find(|s| tags.iter().any(|t| t == s.tag()))
    }
}

/// Status values written to the Occupancy-Time item besides timestamps
pub const TIME_LOCKED: &str = "Locked";
pub const TIME_VACANT: &str = "Vacant";
