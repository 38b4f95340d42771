//! Occupied/vacant transitions and the occupancy countdown

use super::timer::{OccupancyTimer, TimerKind};
use super::LocationGraph;
use crate::domain::action::ActionPhase;
use crate::domain::types::{StatusItem, TIME_VACANT};
use chrono::Local;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const CHILD_OCCUPIED: &str = "Child Location Occupied";
const PARENT_VACANT: &str = "Parent Vacant";

impl LocationGraph {
    pub fn is_occupied(&self, location: &str) -> bool {
        self.nodes.get(location).is_some_and(|n| n.is_occupied())
    }

    /// Mark a location occupied and propagate to its parent
    ///
    /// Occupied actions only run on the vacant to occupied edge. A resolved
    /// duration of zero vacates instead.
    pub fn set_occupied(&mut self, location: &str, reason: &str, duration: Option<Duration>) {
        let Some(node) = self.nodes.get(location) else {
            warn!(location = %location, reason = %reason, "location_unknown");
            return;
        };
        if node.is_locked() {
            warn!(location = %location, reason = %reason, "set_occupied_ignored_locked");
            self.metrics.record_guard_rejection();
            return;
        }

        let was_occupied = node.occupied;
        let actions = node.settings.actions(ActionPhase::Occupied).to_vec();
        let duration = duration.or_else(|| node.settings.default_duration());
        let parent = node.parent.clone();

        if !was_occupied {
            self.actions.execute(&self.registry, &self.egress, &self.metrics, location, &actions);
        }
        if let Some(node) = self.nodes.get_mut(location) {
            node.occupied = true;
        }
        if !was_occupied {
            self.metrics.record_occupied();
            info!(location = %location, reason = %reason, "location_occupied");
        } else {
            debug!(location = %location, reason = %reason, "location_occupancy_refreshed");
        }

        if duration == Some(Duration::ZERO) {
            debug!(location = %location, reason = %reason, "zero_duration_vacates");
            self.set_vacant(location, reason);
            return;
        }

        self.post_status(location, StatusItem::State, "ON");

        match duration {
            Some(duration) => self.start_timer(location, duration),
            None => warn!(location = %location, "occupancy_time_not_set"),
        }

        if let Some(parent) = parent {
            if self.nodes.contains_key(&parent) {
                self.set_occupied(&parent, CHILD_OCCUPIED, None);
            } else {
                warn!(location = %location, parent = %parent, "parent_location_missing");
            }
        }
    }

    /// Mark a location and its whole subtree vacant
    ///
    /// Refused while the location or any descendant is locked. Vacant
    /// actions run on every accepted call.
    pub fn set_vacant(&mut self, location: &str, reason: &str) {
        if !self.nodes.contains_key(location) {
            warn!(location = %location, reason = %reason, "location_unknown");
            return;
        }
        if self.has_locked_subtree(location) {
            warn!(location = %location, reason = %reason, "set_vacant_rejected_locked");
            self.metrics.record_guard_rejection();
            return;
        }

        let Some(node) = self.nodes.get_mut(location) else { return };
        let was_occupied = node.occupied;
        node.occupied = false;
        node.timer.clear();
        let actions = node.settings.actions(ActionPhase::Vacant).to_vec();
        let children: Vec<String> = node.children.iter().cloned().collect();

        self.actions.execute(&self.registry, &self.egress, &self.metrics, location, &actions);
        self.post_status(location, StatusItem::State, "OFF");
        self.post_status(location, StatusItem::Time, TIME_VACANT);
        if was_occupied {
            self.metrics.record_vacant();
            info!(location = %location, reason = %reason, "location_vacant");
        } else {
            debug!(location = %location, reason = %reason, "location_vacant_again");
        }

        for child in children {
            if self.nodes.contains_key(&child) {
                self.set_vacant(&child, PARENT_VACANT);
            } else {
                warn!(location = %location, child = %child, "child_location_missing");
            }
        }
    }

    /// (Re)start the countdown; any earlier scheduled expiry becomes stale
    pub(crate) fn start_timer(&mut self, location: &str, duration: Duration) {
        let Some(node) = self.nodes.get_mut(location) else { return };
        let deadline = Instant::now() + duration;
        let token = self.timers.schedule(deadline, location, TimerKind::Occupancy);
        let expires_at =
            Local::now() + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
        node.timer = OccupancyTimer { token: Some(token), deadline: Some(deadline), expires_at: Some(expires_at) };

        let until = expires_at.format(&self.time_format).to_string();
        info!(location = %location, seconds = duration.as_secs(), until = %until, "occupancy_timer_started");
        self.post_status(location, StatusItem::Time, &until);
        self.compact_timers();
    }

    /// Drop the countdown without vacating
    pub(crate) fn cancel_timer(&mut self, location: &str) {
        if let Some(node) = self.nodes.get_mut(location) {
            if node.timer.is_running() {
                debug!(location = %location, "occupancy_timer_cancelled");
            }
            node.timer.clear();
        }
    }

    /// Mirror a status value into the registry and publish it
    pub(crate) fn post_status(&mut self, location: &str, status: StatusItem, value: &str) {
        let item = status.item_name(location);
        self.registry.set_state(&item, value);
        self.egress.post_update(&item, value);
    }
}
