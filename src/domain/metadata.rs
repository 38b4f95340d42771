//! Occupancy metadata classification
//!
//! Two namespaces are read from the registry:
//! - `OccupancyEvent` on sensor points: the sensor role, behavior flags and
//!   optional begin/end duration overrides
//! - `OccupancySettings` on locations: default duration and action lists
//!
//! Validation is fail-open. Anything unrecognised produces a warning and is
//! dropped; whatever can be understood is still used. Resolution is pure and
//! returns its warnings so the caller decides how to log them.

use crate::domain::action::{ActionPhase, ActionToken};
use crate::domain::types::Metadata;
use smallvec::SmallVec;
use std::fmt;
use std::time::Duration;

/// Result of resolving a metadata block, with the warnings raised on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub warnings: Vec<String>,
}

/// Sensor classification, governs how raw states map to begin/end events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorRole {
    /// Switches and dimmers: ON or percent > 0 begins, OFF or 0 ends
    OnOff,
    /// Door/window contacts: OPEN begins, CLOSED ends
    Contact,
    /// Motion sensors reporting as contacts
    ContactMotion,
    /// Presence contacts that hold a lock on the location while open
    ContactPresence,
    /// Any state change is a begin pulse
    AnyChange,
}

impl SensorRole {
    /// Parse a role value, accepting the historical aliases
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "OnOff" | "Switch" => Some(SensorRole::OnOff),
            "Contact" | "ContactDoor" => Some(SensorRole::Contact),
            "ContactMotion" => Some(SensorRole::ContactMotion),
            "ContactPresence" | "Presence" => Some(SensorRole::ContactPresence),
            "AnyChange" => Some(SensorRole::AnyChange),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorRole::OnOff => "OnOff",
            SensorRole::Contact => "Contact",
            SensorRole::ContactMotion => "ContactMotion",
            SensorRole::ContactPresence => "ContactPresence",
            SensorRole::AnyChange => "AnyChange",
        }
    }
}

/// Flags from `ModifyBehavior`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Behavior {
    /// Only generate a begin event while the location is vacant
    OnlyIfLocationVacant,
    /// Ignore the begin override when the location is vacant
    OverrideTimesIfVacant,
    /// Lock the location until this sensor sends its end event
    OccupiedUntilEnded,
    /// Accepted, no effect
    OverrideLock,
}

impl Behavior {
    const ALL: [Behavior; 4] = [
        Behavior::OnlyIfLocationVacant,
        Behavior::OverrideTimesIfVacant,
        Behavior::OccupiedUntilEnded,
        Behavior::OverrideLock,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "OnlyIfLocationVacant" => Some(Behavior::OnlyIfLocationVacant),
            "OverrideTimesIfVacant" => Some(Behavior::OverrideTimesIfVacant),
            "OccupiedUntilEnded" => Some(Behavior::OccupiedUntilEnded),
            "OverrideLock" => Some(Behavior::OverrideLock),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::OnlyIfLocationVacant => "OnlyIfLocationVacant",
            Behavior::OverrideTimesIfVacant => "OverrideTimesIfVacant",
            Behavior::OccupiedUntilEnded => "OccupiedUntilEnded",
            Behavior::OverrideLock => "OverrideLock",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            Behavior::OnlyIfLocationVacant => 1,
            Behavior::OverrideTimesIfVacant => 1 << 1,
            Behavior::OccupiedUntilEnded => 1 << 2,
            Behavior::OverrideLock => 1 << 3,
        }
    }
}

/// Set of behavior flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BehaviorFlags(u8);

impl BehaviorFlags {
    pub fn insert(&mut self, behavior: Behavior) {
        self.0 |= behavior.bit();
    }

    pub fn contains(&self, behavior: Behavior) -> bool {
        self.0 & behavior.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Behavior> + '_ {
        Behavior::ALL.into_iter().filter(|b| self.contains(*b))
    }
}

impl FromIterator<Behavior> for BehaviorFlags {
    fn from_iter<I: IntoIterator<Item = Behavior>>(iter: I) -> Self {
        let mut flags = BehaviorFlags::default();
        for behavior in iter {
            flags.insert(behavior);
        }
        flags
    }
}

impl fmt::Display for BehaviorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|b| b.as_str()).collect();
        f.write_str(&names.join(","))
    }
}

const KEY_MODIFY_BEHAVIOR: &str = "ModifyBehavior";
const KEY_BEGIN_TIME: &str = "BeginOccupiedTime";
const KEY_END_TIME: &str = "EndOccupiedTime";

const KEY_TIME: &str = "Time";
const KEY_OCCUPIED_ACTIONS: &str = "OccupiedActions";
const KEY_VACANT_ACTIONS: &str = "VacantActions";

/// Resolved sensor configuration from the `OccupancyEvent` namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMetadata {
    pub role: SensorRole,
    pub behaviors: BehaviorFlags,
    /// Duration override (minutes) applied on begin events
    pub begin_minutes: Option<u64>,
    /// Duration override (minutes) applied on end events
    pub end_minutes: Option<u64>,
}

/// How a point item participates in occupancy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorClass {
    /// No metadata, or an empty role: not an occupancy sensor
    Unconfigured,
    /// A role value nothing understands
    UnknownRole(String),
    Sensor(EventMetadata),
}

impl EventMetadata {
    /// Classify a point from its `OccupancyEvent` metadata
    pub fn resolve(item: &str, metadata: Option<&Metadata>) -> Resolved<SensorClass> {
        let mut warnings = Vec::new();

        let Some(metadata) = metadata else {
            return Resolved { value: SensorClass::Unconfigured, warnings };
        };
        let role_value = metadata.value.trim();
        if role_value.is_empty() {
            // placeholder blocks carry an empty role until someone fills them in
            return Resolved { value: SensorClass::Unconfigured, warnings };
        }

        let role = SensorRole::parse(role_value);
        if role.is_none() {
            warnings.push(format!("invalid OccupancyEvent value '{role_value}' for item {item}"));
        }

        let mut behaviors = BehaviorFlags::default();
        let mut begin_minutes = None;
        let mut end_minutes = None;

        for (key, value) in &metadata.configuration {
            match key.as_str() {
                KEY_MODIFY_BEHAVIOR => {
                    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                        match Behavior::parse(token) {
                            Some(behavior) => behaviors.insert(behavior),
                            None => warnings
                                .push(format!("invalid ModifyBehavior '{token}' for item {item}")),
                        }
                    }
                }
                KEY_BEGIN_TIME => begin_minutes = parse_minutes(item, key, value, &mut warnings),
                KEY_END_TIME => end_minutes = parse_minutes(item, key, value, &mut warnings),
                other => warnings.push(format!("unexpected key '{other}' in metadata for item {item}")),
            }
        }

        let value = match role {
            Some(role) => SensorClass::Sensor(EventMetadata { role, behaviors, begin_minutes, end_minutes }),
            None => SensorClass::UnknownRole(role_value.to_string()),
        };
        Resolved { value, warnings }
    }

    pub fn has(&self, behavior: Behavior) -> bool {
        self.behaviors.contains(behavior)
    }
}

impl fmt::Display for EventMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "role={} behaviors=[{}]", self.role.as_str(), self.behaviors)?;
        if let Some(begin) = self.begin_minutes {
            write!(f, " begin={begin}m")?;
        }
        if let Some(end) = self.end_minutes {
            write!(f, " end={end}m")?;
        }
        Ok(())
    }
}

/// Empty values count as unset; anything else must be a non-negative integer
fn parse_minutes(item: &str, key: &str, value: &str, warnings: &mut Vec<String>) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(minutes) = value.parse::<u64>() {
        return Some(minutes);
    }
    // "5.0" is accepted as an integer, "5.5" is not
    match value.parse::<f64>() {
        Ok(f) if f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 => Some(f as u64),
        _ => {
            warnings.push(format!("{key} value '{value}' is not an integer for item {item}"));
            None
        }
    }
}

/// Resolved location configuration from the `OccupancySettings` namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSettings {
    /// Default occupancy duration in minutes
    pub time_minutes: Option<u64>,
    pub occupied_actions: SmallVec<[ActionToken; 4]>,
    pub vacant_actions: SmallVec<[ActionToken; 4]>,
}

impl LocationSettings {
    pub fn resolve(location: &str, metadata: Option<&Metadata>) -> Resolved<LocationSettings> {
        let mut warnings = Vec::new();
        let mut settings = LocationSettings::default();

        let Some(metadata) = metadata else {
            warnings.push(format!("OccupancySettings metadata missing for location {location}"));
            return Resolved { value: settings, warnings };
        };

        if metadata.get(KEY_TIME).is_none() {
            warnings.push(format!("'Time' key is missing in metadata for location {location}"));
        }

        for (key, value) in &metadata.configuration {
            match key.as_str() {
                KEY_TIME => settings.time_minutes = parse_minutes(location, key, value, &mut warnings),
                KEY_OCCUPIED_ACTIONS => {
                    settings.occupied_actions =
                        parse_actions(location, value, ActionPhase::Occupied, &mut warnings)
                }
                KEY_VACANT_ACTIONS => {
                    settings.vacant_actions =
                        parse_actions(location, value, ActionPhase::Vacant, &mut warnings)
                }
                other => {
                    warnings.push(format!("unexpected key '{other}' in metadata for location {location}"))
                }
            }
        }

        Resolved { value: settings, warnings }
    }

    /// Default occupancy duration, if configured
    pub fn default_duration(&self) -> Option<Duration> {
        self.time_minutes.map(minutes)
    }

    pub fn actions(&self, phase: ActionPhase) -> &[ActionToken] {
        match phase {
            ActionPhase::Occupied => &self.occupied_actions,
            ActionPhase::Vacant => &self.vacant_actions,
        }
    }
}

impl fmt::Display for LocationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |actions: &[ActionToken]| {
            actions.iter().map(ActionToken::as_str).collect::<Vec<_>>().join(", ")
        };
        write!(
            f,
            "occupied_actions=[{}] vacant_actions=[{}] time=",
            join(&self.occupied_actions),
            join(&self.vacant_actions)
        )?;
        match self.time_minutes {
            Some(t) => write!(f, "{t}m"),
            None => f.write_str("not set"),
        }
    }
}

fn parse_actions(
    location: &str,
    value: &str,
    phase: ActionPhase,
    warnings: &mut Vec<String>,
) -> SmallVec<[ActionToken; 4]> {
    let mut actions = SmallVec::new();
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<ActionToken>() {
            Ok(action) if action.phase() == phase => actions.push(action),
            _ => warnings.push(format!(
                "invalid {} action '{token}' for location {location}",
                phase.as_str()
            )),
        }
    }
    actions
}

/// Minutes as a Duration
pub fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}
