//! Reentrant cascading locks
//!
//! A lock freezes a location's occupancy: sensors cannot change it and it
//! cannot be vacated. Locks nest by depth and always cascade to every
//! descendant. The countdown pauses on the first lock and resumes with the
//! remaining time when the last lock is released.

use super::timer::TimerKind;
use super::LocationGraph;
use crate::domain::types::{StatusItem, TIME_LOCKED, TIME_VACANT};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

impl LocationGraph {
    pub fn is_locked(&self, location: &str) -> bool {
        self.nodes.get(location).is_some_and(|n| n.is_locked())
    }

    /// True if the location or any descendant is locked
    pub fn has_locked_subtree(&self, location: &str) -> bool {
        let Some(node) = self.nodes.get(location) else { return false };
        node.is_locked() || node.children.iter().any(|child| self.has_locked_subtree(child))
    }

    /// Add one lock level; only the addressed location honours `timeout`
    pub fn lock(&mut self, location: &str, timeout: Option<Duration>) {
        let now = Instant::now();
        let Some(node) = self.nodes.get_mut(location) else {
            warn!(location = %location, "location_unknown");
            return;
        };
        node.lock_depth += 1;
        let depth = node.lock_depth;
        if depth == 1 && node.timer.is_running() {
            node.frozen_remaining = node.timer.remaining(now);
            node.timer.clear();
        }
        let frozen = node.frozen_remaining;
        let children: Vec<String> = node.children.iter().cloned().collect();

        self.metrics.record_lock();
        info!(
            location = %location,
            depth = depth,
            frozen_secs = frozen.map(|d| d.as_secs()),
            timeout_secs = timeout.map(|d| d.as_secs()),
            "location_locked"
        );
        self.post_status(location, StatusItem::Lock, "ON");
        self.post_status(location, StatusItem::Time, TIME_LOCKED);

        if let Some(timeout) = timeout {
            let token = self.timers.schedule(now + timeout, location, TimerKind::LockRelease);
            if let Some(node) = self.nodes.get_mut(location) {
                node.lock_timer = Some(token);
            }
            self.compact_timers();
        }

        for child in children {
            self.lock(&child, None);
        }
    }

    /// Remove one lock level and cascade to every descendant
    pub fn unlock(&mut self, location: &str) {
        let Some(node) = self.nodes.get_mut(location) else {
            warn!(location = %location, "location_unknown");
            return;
        };
        let children: Vec<String> = node.children.iter().cloned().collect();
        let occupied = node.occupied;

        if node.lock_depth == 0 {
            warn!(location = %location, "unlock_below_zero");
            self.metrics.record_guard_rejection();
        } else {
            node.lock_depth -= 1;
            debug!(location = %location, depth = node.lock_depth, "location_unlock");
            self.metrics.record_unlock();

            if node.lock_depth == 0 {
                node.lock_timer = None;
                let resume = node.frozen_remaining.take().or_else(|| node.settings.default_duration());
                self.post_status(location, StatusItem::Lock, "OFF");

                if occupied {
                    match resume {
                        Some(duration) => {
                            info!(location = %location, seconds = duration.as_secs(), "location_unlocked_timer_restarted");
                            self.start_timer(location, duration);
                        }
                        None => warn!(location = %location, "location_unlocked_no_occupancy_time"),
                    }
                } else {
                    info!(location = %location, "location_unlocked_vacant");
                    self.post_status(location, StatusItem::Time, TIME_VACANT);
                }
            }
        }

        for child in children {
            self.unlock(&child);
        }
    }

    /// Release every lock level of a location in one step
    pub fn clear_lock(&mut self, location: &str) {
        let Some(node) = self.nodes.get_mut(location) else {
            warn!(location = %location, "location_unknown");
            return;
        };
        info!(location = %location, depth = node.lock_depth, "location_locks_cleared");
        node.lock_depth = 1;
        self.unlock(location);
    }

    pub fn lock_depth(&self, location: &str) -> Option<u32> {
        self.nodes.get(location).map(|n| n.lock_depth())
    }
}
