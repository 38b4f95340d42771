//! Per-location occupancy state

use super::sensors::SensorBinding;
use super::timer::OccupancyTimer;
use crate::domain::metadata::LocationSettings;
use chrono::{DateTime, Local};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;

/// One location in the occupancy tree
///
/// Nodes live in the graph's arena and refer to each other by name; the
/// parent link is a lookup key, never ownership.
#[derive(Debug)]
pub struct LocationNode {
    pub(crate) name: String,
    pub(crate) parent: Option<String>,
    pub(crate) children: BTreeSet<String>,
    pub(crate) occupied: bool,
    pub(crate) timer: OccupancyTimer,
    pub(crate) lock_depth: u32,
    /// Token of the live auto-release timer
    pub(crate) lock_timer: Option<u64>,
    /// Countdown left when the node was locked
    pub(crate) frozen_remaining: Option<Duration>,
    pub(crate) settings: LocationSettings,
    /// Sensor bindings keyed by item name, created on first event
    pub(crate) bindings: FxHashMap<String, SensorBinding>,
}

impl LocationNode {
    pub fn new(name: &str, settings: LocationSettings, occupied: bool) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            children: BTreeSet::new(),
            occupied,
            timer: OccupancyTimer::default(),
            lock_depth: 0,
            lock_timer: None,
            frozen_remaining: None,
            settings,
            bindings: FxHashMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    pub fn is_locked(&self) -> bool {
        self.lock_depth > 0
    }

    pub fn lock_depth(&self) -> u32 {
        self.lock_depth
    }

    pub fn occupied_until(&self) -> Option<DateTime<Local>> {
        self.timer.expires_at
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(String::as_str)
    }

    pub fn settings(&self) -> &LocationSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            name: self.name.clone(),
            parent: self.parent.clone(),
            children: self.children.iter().cloned().collect(),
            occupied: self.occupied,
            occupied_until: self.timer.expires_at,
            lock_depth: self.lock_depth,
            frozen_remaining_secs: self.frozen_remaining.map(|d| d.as_secs()),
            default_minutes: self.settings.time_minutes,
        }
    }
}

/// Read-only view of a node for inspection and logging
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub parent: Option<String>,
    pub children: Vec<String>,
    pub occupied: bool,
    pub occupied_until: Option<DateTime<Local>>,
    pub lock_depth: u32,
    pub frozen_remaining_secs: Option<u64>,
    pub default_minutes: Option<u64>,
}
