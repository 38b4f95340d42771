//! In-memory mirror of the external item registry
//!
//! Seeded from a TOML model file and kept current by inbound item events.
//! Parent/child relations are derived from group membership:
//! - a location's parent is the first of its groups that is itself a location
//! - a point's location is found by walking through equipment groups

use crate::domain::types::{ItemDef, ItemKind, Metadata};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Equipment can nest; deeper chains than this are treated as malformed
const MAX_EQUIPMENT_DEPTH: usize = 8;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse model file {path}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("item {0} is defined more than once")]
    DuplicateItem(String),
    #[error("item definition has an empty name")]
    EmptyName,
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    items: Vec<ItemDef>,
}

/// Item registry mirror
#[derive(Debug, Default, Clone)]
pub struct ItemRegistry {
    items: FxHashMap<String, ItemDef>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the item model from a TOML file with `[[items]]` tables
    pub fn from_model_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ModelError::Read { path: path.display().to_string(), source })?;
        Self::from_model_str(&content)
            .map_err(|e| match e {
                ModelError::Parse { source, .. } => {
                    ModelError::Parse { path: path.display().to_string(), source }
                }
                other => other,
            })
    }

    pub fn from_model_str(content: &str) -> Result<Self, ModelError> {
        let model: ModelFile = toml::from_str(content)
            .map_err(|source| ModelError::Parse { path: "<inline>".to_string(), source })?;
        Self::from_items(model.items)
    }

    pub fn from_items(items: Vec<ItemDef>) -> Result<Self, ModelError> {
        let mut registry = Self::new();
        for item in items {
            if item.name.is_empty() {
                return Err(ModelError::EmptyName);
            }
            if registry.items.contains_key(&item.name) {
                return Err(ModelError::DuplicateItem(item.name));
            }
            registry.items.insert(item.name.clone(), item);
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ItemDef> {
        self.items.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.contains_key(name)
    }

    pub fn state(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|item| item.state.as_str())
    }

    pub fn metadata(&self, name: &str, namespace: &str) -> Option<&Metadata> {
        self.items.get(name).and_then(|item| item.metadata.get(namespace))
    }

    pub fn is_location(&self, name: &str) -> bool {
        self.items.get(name).is_some_and(ItemDef::is_location)
    }

    /// Names of all location items, sorted
    pub fn locations(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.items.values().filter(|i| i.is_location()).map(|i| i.name.clone()).collect();
        names.sort();
        names
    }

    /// Items that list `group` among their groups, sorted by name
    pub fn members(&self, group: &str) -> Vec<&ItemDef> {
        let mut members: Vec<&ItemDef> =
            self.items.values().filter(|i| i.groups.iter().any(|g| g == group)).collect();
        members.sort_by(|a, b| a.name.cmp(&b.name));
        members
    }

    /// First group of a location that is itself a location
    pub fn parent_location(&self, name: &str) -> Option<&str> {
        let item = self.items.get(name)?;
        item.groups.iter().map(String::as_str).find(|g| self.is_location(g))
    }

    /// Locations whose parent is `name`, sorted
    pub fn child_locations(&self, name: &str) -> Vec<String> {
        let mut children: Vec<String> = self
            .items
            .values()
            .filter(|i| i.is_location() && self.parent_location(&i.name) == Some(name))
            .map(|i| i.name.clone())
            .collect();
        children.sort();
        children
    }

    /// Location an item belongs to, walking through equipment groups
    pub fn location_of(&self, name: &str) -> Option<String> {
        let mut frontier: Vec<&str> = vec![name];
        let mut seen: FxHashSet<&str> = FxHashSet::default();

        for _ in 0..MAX_EQUIPMENT_DEPTH {
            let mut next = Vec::new();
            for current in frontier {
                let Some(item) = self.items.get(current) else { continue };
                for group in &item.groups {
                    let Some(group_item) = self.items.get(group) else { continue };
                    match group_item.kind {
                        ItemKind::Location => return Some(group.clone()),
                        ItemKind::Equipment if seen.insert(group.as_str()) => next.push(group.as_str()),
                        _ => {}
                    }
                }
            }
            if next.is_empty() {
                return None;
            }
            frontier = next;
        }
        None
    }

    /// Points of a location: direct member points plus points of member equipment
    pub fn point_items(&self, location: &str) -> Vec<&ItemDef> {
        let mut points = Vec::new();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        self.collect_points(location, 0, &mut seen, &mut points);
        points.sort_by(|a, b| a.name.cmp(&b.name));
        points
    }

    fn collect_points<'a>(
        &'a self,
        group: &str,
        depth: usize,
        seen: &mut FxHashSet<&'a str>,
        points: &mut Vec<&'a ItemDef>,
    ) {
        if depth > MAX_EQUIPMENT_DEPTH {
            return;
        }
        for member in self.members(group) {
            if !seen.insert(member.name.as_str()) {
                continue;
            }
            match member.kind {
                ItemKind::Point => points.push(member),
                ItemKind::Equipment => self.collect_points(&member.name, depth + 1, seen, points),
                ItemKind::Location | ItemKind::Group => {}
            }
        }
    }

    /// Equipment items an item is a direct member of
    pub fn equipment_of(&self, name: &str) -> Vec<&ItemDef> {
        let Some(item) = self.items.get(name) else { return Vec::new() };
        item.groups
            .iter()
            .filter_map(|g| self.items.get(g))
            .filter(|g| g.kind == ItemKind::Equipment)
            .collect()
    }

    /// Point items of a location carrying `tag`, sorted by name
    pub fn find_by_tag(&self, location: &str, tag: &str) -> Vec<&ItemDef> {
        self.point_items(location).into_iter().filter(|i| i.has_tag(tag)).collect()
    }

    /// Insert or replace an item
    ///
    /// Event bus definitions carry neither state nor metadata, so a
    /// replacement without them keeps what the mirror already knows.
    pub fn upsert(&mut self, mut item: ItemDef) -> Option<ItemDef> {
        if let Some(previous) = self.items.get(&item.name) {
            if item.state == "NULL" {
                item.state = previous.state.clone();
            }
            if item.metadata.is_empty() {
                item.metadata = previous.metadata.clone();
            }
        }
        self.items.insert(item.name.clone(), item)
    }

    pub fn remove(&mut self, name: &str) -> Option<ItemDef> {
        self.items.remove(name)
    }

    /// Update an item's state; returns false for unknown items
    pub fn set_state(&mut self, name: &str, state: &str) -> bool {
        match self.items.get_mut(name) {
            Some(item) => {
                item.state = state.to_string();
                true
            }
            None => false,
        }
    }

    pub fn replace_metadata(&mut self, name: &str, namespace: &str, metadata: Metadata) -> bool {
        match self.items.get_mut(name) {
            Some(item) => {
                item.metadata.insert(namespace.to_string(), metadata);
                true
            }
            None => false,
        }
    }

    /// Insert the item if no item with that name exists; returns true when created
    pub fn ensure_item(&mut self, item: ItemDef) -> bool {
        if self.items.contains_key(&item.name) {
            return false;
        }
        self.items.insert(item.name.clone(), item);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
        [[items]]
        name = "gHouse"
        kind = "location"

        [[items]]
        name = "gKitchen"
        kind = "location"
        groups = ["gHouse"]
        [items.metadata.OccupancySettings]
        configuration = { Time = 10, OccupiedActions = "LightsOn" }

        [[items]]
        name = "Kitchen_Speaker"
        kind = "equipment"
        groups = ["gKitchen"]
        tags = ["Speaker"]

        [[items]]
        name = "Kitchen_Speaker_Power"
        kind = "point"
        type = "Switch"
        groups = ["Kitchen_Speaker"]
        tags = ["Power"]

        [[items]]
        name = "Kitchen_Motion"
        kind = "point"
        type = "Contact"
        groups = ["gKitchen"]
        [items.metadata.OccupancyEvent]
        value = "ContactMotion"
    "#;

    #[test]
    fn test_model_parses_and_relates_items() {
        let registry = ItemRegistry::from_model_str(MODEL).unwrap();
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.locations(), vec!["gHouse".to_string(), "gKitchen".to_string()]);
        assert_eq!(registry.parent_location("gKitchen"), Some("gHouse"));
        assert_eq!(registry.parent_location("gHouse"), None);
        assert_eq!(registry.child_locations("gHouse"), vec!["gKitchen".to_string()]);
        assert_eq!(
            registry.metadata("gKitchen", "OccupancySettings").and_then(|m| m.get("Time")),
            Some("10")
        );
    }

    #[test]
    fn test_location_of_walks_equipment() {
        let registry = ItemRegistry::from_model_str(MODEL).unwrap();
        assert_eq!(registry.location_of("Kitchen_Motion"), Some("gKitchen".to_string()));
        assert_eq!(registry.location_of("Kitchen_Speaker_Power"), Some("gKitchen".to_string()));
        assert_eq!(registry.location_of("Unknown"), None);
    }

    #[test]
    fn test_point_items_include_equipment_points() {
        let registry = ItemRegistry::from_model_str(MODEL).unwrap();
        let names: Vec<&str> =
            registry.point_items("gKitchen").iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen_Motion", "Kitchen_Speaker_Power"]);
        assert!(registry.point_items("gHouse").is_empty());
    }

    #[test]
    fn test_find_by_tag_is_scoped_to_location() {
        let registry = ItemRegistry::from_model_str(MODEL).unwrap();
        let names: Vec<&str> =
            registry.find_by_tag("gKitchen", "Power").iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen_Speaker_Power"]);
        assert!(registry.find_by_tag("gKitchen", "Speaker").is_empty(), "equipment is not a point");
        assert!(registry.find_by_tag("gHouse", "Power").is_empty());
    }

    #[test]
    fn test_duplicate_items_rejected() {
        let model = r#"
            [[items]]
            name = "A"
            [[items]]
            name = "A"
        "#;
        assert!(matches!(ItemRegistry::from_model_str(model), Err(ModelError::DuplicateItem(n)) if n == "A"));
    }

    #[test]
    fn test_upsert_keeps_known_state_and_metadata() {
        let mut registry = ItemRegistry::from_model_str(MODEL).unwrap();
        assert!(registry.set_state("Kitchen_Motion", "OPEN"));
        let updated = ItemDef::new("Kitchen_Motion", ItemKind::Point).in_group("gKitchen");
        assert!(registry.upsert(updated).is_some());
        assert_eq!(registry.state("Kitchen_Motion"), Some("OPEN"));
        assert_eq!(registry.metadata("Kitchen_Motion", "OccupancyEvent").map(|m| m.value.as_str()), Some("ContactMotion"));
        assert!(!registry.set_state("Missing", "ON"));

        let replaced = ItemDef::new("gKitchen", ItemKind::Location)
            .in_group("gHouse")
            .with_metadata("OccupancySettings", Metadata::new("").with("Time", "20"));
        registry.upsert(replaced);
        assert_eq!(registry.metadata("gKitchen", "OccupancySettings").and_then(|m| m.get("Time")), Some("20"));
    }

    #[test]
    fn test_ensure_item_does_not_overwrite() {
        let mut registry = ItemRegistry::new();
        assert!(registry.ensure_item(ItemDef::new("X", ItemKind::Point).with_state("ON")));
        assert!(!registry.ensure_item(ItemDef::new("X", ItemKind::Point)));
        assert_eq!(registry.state("X"), Some("ON"));
    }
}
