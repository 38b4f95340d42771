//! Sensor role strategies and the shared begin/end contract
//!
//! A sensor's raw state is classified by its role into a begin or an end
//! transition. Bindings are resolved lazily from the sensor's
//! `OccupancyEvent` metadata on the first observed event and cached on the
//! owning location.

use super::LocationGraph;
use crate::domain::metadata::{minutes, Behavior, EventMetadata, SensorClass, SensorRole};
use crate::domain::types::{Metadata, EVENT_NAMESPACE};
use tracing::{debug, info, warn};

/// Canonical transition derived from a sensor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Begin,
    End,
}

/// One variant per sensor role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorHandler {
    /// ON or a positive level begins, OFF or zero ends
    Switch(EventMetadata),
    /// OPEN begins, CLOSED ends
    Contact(EventMetadata),
    /// Like a contact, and holds a lock on the location while open
    Presence(EventMetadata),
    /// Every state change is a begin pulse
    AnyChange(EventMetadata),
    /// Not an occupancy sensor
    Ignored,
}

impl SensorHandler {
    pub fn for_metadata(metadata: EventMetadata) -> Self {
        match metadata.role {
            SensorRole::OnOff => SensorHandler::Switch(metadata),
            SensorRole::Contact | SensorRole::ContactMotion => SensorHandler::Contact(metadata),
            SensorRole::ContactPresence => SensorHandler::Presence(metadata),
            SensorRole::AnyChange => SensorHandler::AnyChange(metadata),
        }
    }

    pub fn metadata(&self) -> Option<&EventMetadata> {
        match self {
            SensorHandler::Switch(m)
            | SensorHandler::Contact(m)
            | SensorHandler::Presence(m)
            | SensorHandler::AnyChange(m) => Some(m),
            SensorHandler::Ignored => None,
        }
    }

    /// Map a raw state to a transition; `None` for states the role does not understand
    pub fn classify(&self, state: &str) -> Option<Transition> {
        match self {
            SensorHandler::Switch(_) => classify_switch(state),
            SensorHandler::Contact(_) | SensorHandler::Presence(_) => match state {
                "OPEN" => Some(Transition::Begin),
                "CLOSED" => Some(Transition::End),
                _ => None,
            },
            SensorHandler::AnyChange(_) => Some(Transition::Begin),
            SensorHandler::Ignored => None,
        }
    }

    /// Whether the role has an end state that can release a held lock
    fn can_end(&self) -> bool {
        matches!(self, SensorHandler::Switch(_) | SensorHandler::Contact(_) | SensorHandler::Presence(_))
    }
}

fn classify_switch(state: &str) -> Option<Transition> {
    match state {
        "ON" => return Some(Transition::Begin),
        "OFF" => return Some(Transition::End),
        _ => {}
    }
    // dimmers report a percentage, color items "h,s,b" where brightness decides
    let level = state.rsplit(',').next()?.trim().parse::<f64>().ok()?;
    if level > 0.0 {
        Some(Transition::Begin)
    } else if level == 0.0 {
        Some(Transition::End)
    } else {
        None
    }
}

/// Cached per-sensor binding on a location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBinding {
    pub handler: SensorHandler,
    /// This sensor took an `OccupiedUntilEnded` lock that its end event releases
    pub holds_until_ended: bool,
    /// This presence sensor holds its lock
    pub holds_presence: bool,
}

impl SensorBinding {
    pub fn new(handler: SensorHandler) -> Self {
        Self { handler, holds_until_ended: false, holds_presence: false }
    }
}

impl LocationGraph {
    /// Route a sensor state change to the location's handler for that sensor
    pub(crate) fn handle_sensor_state(&mut self, location: &str, item: &str, state: &str) {
        let Some(mut binding) = self.binding_for(location, item) else {
            return;
        };
        let Some(metadata) = binding.handler.metadata().copied() else {
            return;
        };

        let Some(transition) = binding.handler.classify(state) else {
            warn!(location = %location, item = %item, state = %state, role = metadata.role.as_str(), "sensor_state_unrecognised");
            return;
        };
        self.metrics.record_sensor_event();
        debug!(location = %location, item = %item, state = %state, transition = ?transition, "sensor_event");

        let presence = matches!(binding.handler, SensorHandler::Presence(_));
        match transition {
            Transition::Begin => {
                self.begin_event(location, item, &metadata, &mut binding);
                if presence && !binding.holds_presence {
                    info!(location = %location, item = %item, "presence_lock_engaged");
                    self.lock(location, None);
                    binding.holds_presence = true;
                }
            }
            Transition::End => {
                self.end_event(location, item, &metadata, &mut binding);
                if presence && binding.holds_presence {
                    info!(location = %location, item = %item, "presence_lock_released");
                    binding.holds_presence = false;
                    self.unlock(location);
                }
            }
        }

        if let Some(node) = self.nodes.get_mut(location) {
            node.bindings.insert(item.to_string(), binding);
        }
    }

    /// Shared begin contract
    pub(crate) fn begin_event(
        &mut self,
        location: &str,
        item: &str,
        metadata: &EventMetadata,
        binding: &mut SensorBinding,
    ) {
        let Some(node) = self.nodes.get(location) else { return };
        if node.is_locked() {
            info!(location = %location, item = %item, "begin_event_ignored_locked");
            self.metrics.record_guard_rejection();
            return;
        }
        let occupied = node.is_occupied();

        if metadata.has(Behavior::OnlyIfLocationVacant) && occupied {
            warn!(location = %location, item = %item, "begin_event_ignored_already_occupied");
            return;
        }

        let mut duration = metadata.begin_minutes.map(minutes);
        if metadata.has(Behavior::OverrideTimesIfVacant) && !occupied {
            duration = None;
        }

        self.set_occupied(location, item, duration);

        if metadata.has(Behavior::OccupiedUntilEnded) && !binding.holds_until_ended {
            info!(location = %location, item = %item, "occupied_until_ended_lock");
            self.lock(location, None);
            binding.holds_until_ended = true;
        }
    }

    /// Shared end contract
    pub(crate) fn end_event(
        &mut self,
        location: &str,
        item: &str,
        metadata: &EventMetadata,
        binding: &mut SensorBinding,
    ) {
        let Some(node) = self.nodes.get(location) else { return };
        if node.is_locked() {
            if binding.holds_until_ended {
                info!(location = %location, item = %item, "occupied_until_ended_released");
                binding.holds_until_ended = false;
                self.unlock(location);
            } else {
                info!(location = %location, item = %item, "end_event_ignored_locked");
            }
            return;
        }
        let occupied = node.is_occupied();

        match metadata.end_minutes {
            Some(0) => self.set_vacant(location, item),
            Some(end) if occupied => {
                debug!(location = %location, item = %item, minutes = end, "end_event_refresh");
                self.start_timer(location, minutes(end));
            }
            Some(_) => {
                debug!(location = %location, item = %item, "end_event_refresh_skipped_vacant");
            }
            None => {}
        }
    }

    /// Drop a sensor's cached binding on every location
    ///
    /// With `rebind` set, locks held by the old binding move to the freshly
    /// resolved one when it can still release them. Every other hold is
    /// released here, so no lock level outlives its sensor binding.
    pub(crate) fn unbind_sensor(&mut self, item: &str, rebind: bool) {
        let dropped: Vec<(String, SensorBinding)> = self
            .nodes
            .values_mut()
            .filter_map(|node| node.bindings.remove(item).map(|binding| (node.name.clone(), binding)))
            .collect();

        for (location, old) in dropped {
            debug!(location = %location, item = %item, "sensor_binding_dropped");
            let mut presence = old.holds_presence;
            let mut until_ended = old.holds_until_ended;

            let still_here = self.registry.location_of(item).as_deref() == Some(location.as_str());
            if rebind && still_here && (presence || until_ended) {
                if let Some(mut binding) = self.binding_for(&location, item) {
                    if presence && matches!(binding.handler, SensorHandler::Presence(_)) {
                        binding.holds_presence = true;
                        presence = false;
                    }
                    if until_ended && binding.handler.can_end() {
                        binding.holds_until_ended = true;
                        until_ended = false;
                    }
                    if let Some(node) = self.nodes.get_mut(&location) {
                        node.bindings.insert(item.to_string(), binding);
                    }
                }
            }

            for _ in 0..(usize::from(presence) + usize::from(until_ended)) {
                info!(location = %location, item = %item, "sensor_lock_released_on_unbind");
                self.unlock(&location);
            }
        }
    }

    /// Cached binding, resolving it from metadata on first use
    fn binding_for(&mut self, location: &str, item: &str) -> Option<SensorBinding> {
        let node = self.nodes.get(location)?;
        if let Some(binding) = node.bindings.get(item) {
            return Some(*binding);
        }

        let resolved = EventMetadata::resolve(item, self.registry.metadata(item, EVENT_NAMESPACE));
        for warning in &resolved.warnings {
            warn!(location = %location, item = %item, warning = %warning, "event_metadata_invalid");
        }
        self.metrics.record_config_warnings(resolved.warnings.len());

        let handler = match resolved.value {
            SensorClass::Sensor(metadata) => {
                info!(location = %location, item = %item, metadata = %metadata, "sensor_bound");
                SensorHandler::for_metadata(metadata)
            }
            SensorClass::UnknownRole(role) => {
                warn!(location = %location, item = %item, role = %role, "sensor_role_unknown");
                SensorHandler::Ignored
            }
            SensorClass::Unconfigured => {
                info!(location = %location, item = %item, "sensor_not_configured");
                if self.create_event_metadata && self.registry.metadata(item, EVENT_NAMESPACE).is_none() {
                    self.registry.replace_metadata(item, EVENT_NAMESPACE, Metadata::default());
                    info!(item = %item, namespace = EVENT_NAMESPACE, "metadata_placeholder_created");
                }
                SensorHandler::Ignored
            }
        };

        let binding = SensorBinding::new(handler);
        if let Some(node) = self.nodes.get_mut(location) {
            node.bindings.insert(item.to_string(), binding);
        }
        Some(binding)
    }
}
