//! Timer bookkeeping for occupancy countdowns and lock auto-release
//!
//! All timers live in one min-heap owned by the engine task, so expiry runs
//! on the same loop as inbound events. Every scheduling call gets a fresh
//! token; a node remembers the token of its live timer and a popped entry
//! whose token no longer matches is stale. Stale entries are dropped when
//! popped, or all at once when the engine compacts an oversized heap.

use chrono::{DateTime, Local};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Countdown to vacant
    Occupancy,
    /// Auto-release of a `LOCK,<seconds>` lock
    LockRelease,
}

#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub deadline: Instant,
    pub token: u64,
    pub location: String,
    pub kind: TimerKind,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.token == other.token
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline.cmp(&other.deadline).then(self.token.cmp(&other.token))
    }
}

/// Min-heap of pending timers
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    next_token: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a timer and return its token
    pub fn schedule(&mut self, deadline: Instant, location: &str, kind: TimerKind) -> u64 {
        self.next_token += 1;
        let token = self.next_token;
        self.heap.push(Reverse(TimerEntry { deadline, token, location: location.to_string(), kind }));
        token
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.deadline)
    }

    /// Pop the earliest entry if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<TimerEntry> {
        if self.next_deadline()? > now {
            return None;
        }
        self.heap.pop().map(|Reverse(entry)| entry)
    }

    /// Keep only the entries `live` accepts; returns how many were dropped
    pub fn retain(&mut self, mut live: impl FnMut(&TimerEntry) -> bool) -> usize {
        let before = self.heap.len();
        self.heap.retain(|Reverse(entry)| live(entry));
        before - self.heap.len()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

/// Countdown state of one location
#[derive(Debug, Clone, Default)]
pub struct OccupancyTimer {
    /// Token of the live scheduled entry
    pub token: Option<u64>,
    /// Monotonic expiry, used to compute the remaining time
    pub deadline: Option<Instant>,
    /// Wall-clock expiry, for display
    pub expires_at: Option<DateTime<Local>>,
}

impl OccupancyTimer {
    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(now))
    }

    /// Forget the live entry; the heap copy becomes stale
    pub fn clear(&mut self) {
        *self = OccupancyTimer::default();
    }
}
