//! Location occupancy engine
//!
//! The LocationGraph owns every location node and is driven by a single task:
//! - `lifecycle` - location add/update/remove, status items, parent/child links
//! - `sensors` - role strategies and the begin/end contract
//! - `transitions` - occupied/vacant transitions and the countdown
//! - `locking` - reentrant cascading locks
//! - `commands` - Occupancy-State and Occupancy-Control commands
//! - `timer` - the timer heap shared by countdowns and lock auto-release
//!
//! Registry events and timer expiries are processed one at a time on the same
//! loop, so a transition and everything it cascades to finishes before the
//! next event is looked at.

mod commands;
mod lifecycle;
mod locking;
mod node;
mod sensors;
mod timer;
mod transitions;
#[cfg(test)]
mod tests;

pub use commands::{ControlCommand, ControlCommandError, StateCommand, StateCommandError};
pub use node::{LocationNode, NodeSnapshot};
pub use sensors::{SensorHandler, Transition};
pub use timer::{TimerKind, TimerQueue};

use crate::domain::types::ItemEvent;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::registry::ItemRegistry;
use crate::io::EgressSender;
use crate::services::actions::ActionExecutor;
use rustc_hash::FxHashMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

/// Heap size below which superseded timer entries are left to expire
const MIN_COMPACT_LEN: usize = 64;

/// Occupancy state of every location, driven by registry events and timers
pub struct LocationGraph {
    /// Location nodes by item name
    pub(crate) nodes: FxHashMap<String, LocationNode>,
    /// Mirror of the external item registry
    pub(crate) registry: ItemRegistry,
    /// Pending countdowns and lock releases
    pub(crate) timers: TimerQueue,
    /// Status updates and device commands
    pub(crate) egress: EgressSender,
    pub(crate) actions: ActionExecutor,
    pub(crate) metrics: Arc<Metrics>,
    /// chrono format for the Occupancy-Time item
    pub(crate) time_format: String,
    pub(crate) create_location_metadata: bool,
    pub(crate) create_event_metadata: bool,
}

impl LocationGraph {
    pub fn new(config: &Config, registry: ItemRegistry, egress: EgressSender, metrics: Arc<Metrics>) -> Self {
        Self {
            nodes: FxHashMap::default(),
            registry,
            timers: TimerQueue::new(),
            egress,
            actions: ActionExecutor::new(config.daylight_item()),
            metrics,
            time_format: config.time_format().to_string(),
            create_location_metadata: config.create_location_metadata(),
            create_event_metadata: config.create_event_metadata(),
        }
    }

    /// Run the engine until the event channel closes or shutdown is signalled
    pub async fn run(&mut self, mut event_rx: mpsc::Receiver<ItemEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(locations = self.nodes.len(), "occupancy_engine_started");
        loop {
            let next_deadline = self.timers.next_deadline();
            tokio::select! {
                event = event_rx.recv() => {
                    match event {
                        Some(e) => self.process_event(e),
                        None => break,
                    }
                }
                _ = wait_for(next_deadline) => {
                    self.fire_due_timers(Instant::now());
                    self.refresh_gauges();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(pending_timers = self.timers.len(), "occupancy_engine_stopped");
    }

    /// Process a single registry event
    pub fn process_event(&mut self, event: ItemEvent) {
        let process_start = std::time::Instant::now();
        debug!(kind = event.kind_str(), item = %event.item_name(), "item_event");

        self.handle_item_event(event);
        self.refresh_gauges();

        let latency_us = process_start.elapsed().as_micros() as u64;
        self.metrics.record_event_processed(latency_us);
    }

    /// Fire every timer due at `now`, skipping superseded entries
    pub fn fire_due_timers(&mut self, now: Instant) {
        while let Some(entry) = self.timers.pop_due(now) {
            let Some(node) = self.nodes.get_mut(&entry.location) else {
                self.metrics.record_stale_timer();
                continue;
            };
            match entry.kind {
                TimerKind::Occupancy => {
                    if node.timer.token != Some(entry.token) {
                        self.metrics.record_stale_timer();
                        continue;
                    }
                    node.timer.clear();
                    self.metrics.record_timer_expired();
                    info!(location = %entry.location, "occupancy_timer_expired");
                    self.set_vacant(&entry.location, "Timer Expired");
                }
                TimerKind::LockRelease => {
                    if node.lock_timer != Some(entry.token) {
                        self.metrics.record_stale_timer();
                        continue;
                    }
                    node.lock_timer = None;
                    info!(location = %entry.location, "lock_timeout_expired");
                    self.unlock(&entry.location);
                }
            }
        }
    }

    /// Purge superseded timer entries once they clearly outnumber live ones
    ///
    /// A node owns at most one countdown and one lock release, so a heap
    /// holding more than four entries per node is at least half stale.
    pub(crate) fn compact_timers(&mut self) {
        let limit = (self.nodes.len() * 4).max(MIN_COMPACT_LEN);
        if self.timers.len() <= limit {
            return;
        }
        let nodes = &self.nodes;
        let purged = self.timers.retain(|entry| {
            nodes.get(&entry.location).is_some_and(|node| match entry.kind {
                TimerKind::Occupancy => node.timer.token == Some(entry.token),
                TimerKind::LockRelease => node.lock_timer == Some(entry.token),
            })
        });
        self.metrics.record_stale_timers(purged);
        debug!(purged = purged, pending = self.timers.len(), "timer_queue_compacted");
    }

    pub(crate) fn refresh_gauges(&self) {
        let occupied = self.nodes.values().filter(|n| n.is_occupied()).count();
        let locked = self.nodes.values().filter(|n| n.is_locked()).count();
        self.metrics.set_location_gauges(self.nodes.len(), occupied, locked);
    }

    pub fn snapshot(&self, location: &str) -> Option<NodeSnapshot> {
        self.nodes.get(location).map(LocationNode::snapshot)
    }

    pub fn location(&self, location: &str) -> Option<&LocationNode> {
        self.nodes.get(location)
    }

    pub fn location_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    /// Text rendering of the location tree, roots first
    pub fn render_tree(&self) -> String {
        let mut roots: Vec<&str> =
            self.nodes.values().filter(|n| n.parent.is_none()).map(|n| n.name.as_str()).collect();
        roots.sort_unstable();

        let mut out = String::new();
        for root in roots {
            self.render_node(&mut out, root, 0);
        }
        out
    }

    fn render_node(&self, out: &mut String, name: &str, depth: usize) {
        let Some(node) = self.nodes.get(name) else { return };
        let state = if node.occupied { "occupied" } else { "vacant" };
        let _ = write!(out, "{:indent$}{} [{}", "", name, state, indent = depth * 2);
        if let Some(until) = node.timer.expires_at {
            let _ = write!(out, " until {}", until.format(&self.time_format));
        }
        if node.is_locked() {
            let _ = write!(out, ", locked x{}", node.lock_depth);
        }
        let _ = writeln!(out, "]");
        for child in &node.children {
            self.render_node(out, child, depth + 1);
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
