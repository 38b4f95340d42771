//! Location lifecycle and registry event routing
//!
//! Locations appear and disappear with registry add/remove events. Every
//! structural change rebuilds the parent/child links from the registry's
//! group membership.

use super::node::LocationNode;
use super::LocationGraph;
use crate::domain::metadata::LocationSettings;
use crate::domain::types::{ItemDef, ItemEvent, ItemKind, Metadata, StatusItem, SETTINGS_NAMESPACE};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

impl LocationGraph {
    /// Apply one registry event to the mirror and the occupancy tree
    pub(crate) fn handle_item_event(&mut self, event: ItemEvent) {
        match event {
            ItemEvent::Added(def) => self.handle_definition(def, false),
            ItemEvent::Updated(def) => self.handle_definition(def, true),
            ItemEvent::Removed { name } => self.handle_removed(&name),
            ItemEvent::StateChanged { item, state, .. } => self.handle_state_changed(&item, &state),
            ItemEvent::Command { item, command } => self.handle_command(&item, &command),
        }
    }

    fn handle_definition(&mut self, def: ItemDef, updated: bool) {
        let name = def.name.clone();
        let is_location = def.is_location();
        let was_location = self.nodes.contains_key(&name);
        debug!(item = %name, kind = ?def.kind, updated = updated, "item_definition");
        self.registry.upsert(def);

        match (was_location, is_location) {
            (false, true) => self.add_location(&name),
            (true, true) => self.update_location(&name),
            (true, false) => self.remove_location(&name),
            (false, false) => {
                // the sensor's metadata or group membership may have changed
                self.unbind_sensor(&name, true);
                if updated && self.registry.get(&name).is_some_and(|i| i.kind == ItemKind::Group) {
                    self.relink();
                }
            }
        }
    }

    fn handle_removed(&mut self, name: &str) {
        if self.nodes.contains_key(name) {
            self.remove_location(name);
        } else {
            self.unbind_sensor(name, false);
        }
        self.registry.remove(name);
    }

    fn handle_state_changed(&mut self, item: &str, state: &str) {
        if !self.registry.set_state(item, state) {
            debug!(item = %item, "state_change_unknown_item");
            return;
        }
        let Some(def) = self.registry.get(item) else { return };
        if def.kind != ItemKind::Point || StatusItem::from_tags(&def.tags).is_some() {
            return;
        }
        let Some(location) = self.registry.location_of(item) else { return };
        if !self.nodes.contains_key(&location) {
            return;
        }
        self.handle_sensor_state(&location, item, state);
    }

    fn handle_command(&mut self, item: &str, command: &str) {
        let Some(def) = self.registry.get(item) else {
            debug!(item = %item, "command_unknown_item");
            return;
        };
        let Some(status) = StatusItem::from_tags(&def.tags) else {
            return;
        };
        let location = match self.registry.parent_location(item) {
            Some(location) if self.nodes.contains_key(location) => location.to_string(),
            _ => {
                warn!(item = %item, "status_item_without_location");
                return;
            }
        };
        self.handle_status_command(&location, status, command);
    }

    /// Create every location known to the registry
    pub fn load_locations(&mut self) {
        for name in self.registry.locations() {
            if !self.nodes.contains_key(&name) {
                self.insert_location(&name);
            }
        }
        self.relink();
        self.refresh_gauges();
        info!(locations = self.nodes.len(), "locations_loaded");
    }

    pub(crate) fn add_location(&mut self, name: &str) {
        self.insert_location(name);
        self.relink();
    }

    fn insert_location(&mut self, name: &str) {
        if self.create_location_metadata && self.registry.metadata(name, SETTINGS_NAMESPACE).is_none() {
            self.registry.replace_metadata(name, SETTINGS_NAMESPACE, Metadata::default());
            info!(location = %name, namespace = SETTINGS_NAMESPACE, "metadata_placeholder_created");
        }
        let settings = self.resolve_settings(name);

        for status in StatusItem::ALL {
            if self.registry.ensure_item(status.definition(name)) {
                debug!(location = %name, item = %status.item_name(name), "status_item_created");
            }
        }
        let occupied = self.registry.state(&StatusItem::State.item_name(name)) == Some("ON");

        info!(location = %name, occupied = occupied, settings = %settings, "location_added");
        self.nodes.insert(name.to_string(), LocationNode::new(name, settings, occupied));
    }

    pub(crate) fn update_location(&mut self, name: &str) {
        let settings = self.resolve_settings(name);
        if let Some(node) = self.nodes.get_mut(name) {
            info!(location = %name, settings = %settings, "location_updated");
            node.settings = settings;
        }
        self.relink();
    }

    /// Drop a location; its pending timers become stale
    pub(crate) fn remove_location(&mut self, name: &str) {
        self.cancel_timer(name);
        let Some(node) = self.nodes.remove(name) else { return };
        for status in StatusItem::ALL {
            self.registry.remove(&status.item_name(name));
        }
        info!(location = %name, occupied = node.occupied, locked = node.is_locked(), "location_removed");
        self.relink();
    }

    fn resolve_settings(&self, name: &str) -> LocationSettings {
        let resolved = LocationSettings::resolve(name, self.registry.metadata(name, SETTINGS_NAMESPACE));
        for warning in &resolved.warnings {
            warn!(location = %name, warning = %warning, "location_metadata_invalid");
        }
        self.metrics.record_config_warnings(resolved.warnings.len());
        resolved.value
    }

    /// Rebuild parent/child links from registry group membership
    pub(crate) fn relink(&mut self) {
        let mut names: Vec<String> = self.nodes.keys().cloned().collect();
        names.sort();

        let mut parents: FxHashMap<String, Option<String>> = names
            .iter()
            .map(|name| {
                let parent = self
                    .registry
                    .parent_location(name)
                    .filter(|p| *p != name.as_str() && self.nodes.contains_key(*p))
                    .map(str::to_string);
                (name.clone(), parent)
            })
            .collect();

        for name in &names {
            let mut seen: FxHashSet<String> = FxHashSet::default();
            let mut current = name.clone();
            loop {
                let Some(Some(parent)) = parents.get(&current).cloned() else { break };
                if &parent == name {
                    warn!(location = %name, parent = %parent, "location_cycle_cut");
                    parents.insert(name.clone(), None);
                    break;
                }
                if !seen.insert(parent.clone()) {
                    break;
                }
                current = parent;
            }
        }

        for node in self.nodes.values_mut() {
            node.children.clear();
        }
        for (name, parent) in &parents {
            if let Some(node) = self.nodes.get_mut(name) {
                node.parent = parent.clone();
            }
            if let Some(parent) = parent {
                if let Some(parent_node) = self.nodes.get_mut(parent) {
                    parent_node.children.insert(name.clone());
                }
            }
        }
    }
}
