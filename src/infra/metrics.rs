//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated from the engine task, the MQTT ingress and the egress
//! sender; `report()` swaps the per-interval values out.
//!
//! All atomics use Relaxed ordering. They are statistics only and must not
//! drive engine decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Upper bounds (µs) of the finite latency buckets; one overflow bucket follows
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];

/// Finite buckets plus overflow
pub const METRICS_NUM_BUCKETS: usize = METRICS_BUCKET_BOUNDS.len() + 1;

/// Value reported for percentiles that land in the overflow bucket
const OVERFLOW_BOUND: u64 = 102_400;

/// Per-interval event latency histogram
struct LatencyHistogram {
    count: AtomicU64,
    sum_us: AtomicU64,
    max_us: AtomicU64,
    buckets: [AtomicU64; METRICS_NUM_BUCKETS],
}

/// Drained histogram contents
struct LatencyWindow {
    count: u64,
    sum_us: u64,
    max_us: u64,
    buckets: [u64; METRICS_NUM_BUCKETS],
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_us: AtomicU64::new(0),
            max_us: AtomicU64::new(0),
            buckets: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn record(&self, latency_us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.max_us.fetch_max(latency_us, Ordering::Relaxed);
    }

    fn drain(&self) -> LatencyWindow {
        LatencyWindow {
            count: self.count.swap(0, Ordering::Relaxed),
            sum_us: self.sum_us.swap(0, Ordering::Relaxed),
            max_us: self.max_us.swap(0, Ordering::Relaxed),
            buckets: std::array::from_fn(|i| self.buckets[i].swap(0, Ordering::Relaxed)),
        }
    }
}

impl LatencyWindow {
    fn average(&self) -> u64 {
        self.sum_us.checked_div(self.count).unwrap_or(0)
    }

    /// Upper bound of the bucket holding the given quantile
    fn quantile(&self, q: f64) -> u64 {
        let total: u64 = self.buckets.iter().sum();
        if total == 0 {
            return 0;
        }
        let target = (total as f64 * q) as u64;
        let mut seen = 0u64;
        for (i, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= target {
                return METRICS_BUCKET_BOUNDS.get(i).copied().unwrap_or(OVERFLOW_BOUND);
            }
        }
        OVERFLOW_BOUND
    }
}

fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Counters and gauges shared by every task of the service
pub struct Metrics {
    events_total: AtomicU64,
    latency: LatencyHistogram,
    sensor_events_total: AtomicU64,
    command_events_total: AtomicU64,
    occupied_transitions_total: AtomicU64,
    vacant_transitions_total: AtomicU64,
    timer_expiries_total: AtomicU64,
    /// Superseded timer entries discarded on pop or compaction
    stale_timers_total: AtomicU64,
    /// lock()/unlock() calls, cascades included
    locks_total: AtomicU64,
    unlocks_total: AtomicU64,
    /// Transitions refused by lock or vacancy guards
    guard_rejections_total: AtomicU64,
    config_warnings_total: AtomicU64,
    action_commands_total: AtomicU64,
    egress_dropped: AtomicU64,
    ingress_dropped: AtomicU64,
    /// Gauges, overwritten by the engine after each event
    locations: AtomicU64,
    locations_occupied: AtomicU64,
    locations_locked: AtomicU64,
    /// Sampled by the reporter from the event channel
    event_queue_depth: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn read(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            latency: LatencyHistogram::new(),
            sensor_events_total: AtomicU64::new(0),
            command_events_total: AtomicU64::new(0),
            occupied_transitions_total: AtomicU64::new(0),
            vacant_transitions_total: AtomicU64::new(0),
            timer_expiries_total: AtomicU64::new(0),
            stale_timers_total: AtomicU64::new(0),
            locks_total: AtomicU64::new(0),
            unlocks_total: AtomicU64::new(0),
            guard_rejections_total: AtomicU64::new(0),
            config_warnings_total: AtomicU64::new(0),
            action_commands_total: AtomicU64::new(0),
            egress_dropped: AtomicU64::new(0),
            ingress_dropped: AtomicU64::new(0),
            locations: AtomicU64::new(0),
            locations_occupied: AtomicU64::new(0),
            locations_locked: AtomicU64::new(0),
            event_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// One registry event fully processed by the engine
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        bump(&self.events_total);
        self.latency.record(latency_us);
    }

    #[inline]
    pub fn record_sensor_event(&self) {
        bump(&self.sensor_events_total);
    }

    #[inline]
    pub fn record_command_event(&self) {
        bump(&self.command_events_total);
    }

    #[inline]
    pub fn record_occupied(&self) {
        bump(&self.occupied_transitions_total);
    }

    #[inline]
    pub fn record_vacant(&self) {
        bump(&self.vacant_transitions_total);
    }

    #[inline]
    pub fn record_timer_expired(&self) {
        bump(&self.timer_expiries_total);
    }

    #[inline]
    pub fn record_stale_timer(&self) {
        bump(&self.stale_timers_total);
    }

    pub fn record_stale_timers(&self, count: usize) {
        self.stale_timers_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_lock(&self) {
        bump(&self.locks_total);
    }

    #[inline]
    pub fn record_unlock(&self) {
        bump(&self.unlocks_total);
    }

    #[inline]
    pub fn record_guard_rejection(&self) {
        bump(&self.guard_rejections_total);
    }

    pub fn record_config_warnings(&self, count: usize) {
        self.config_warnings_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_action_command(&self) {
        bump(&self.action_commands_total);
    }

    #[inline]
    pub fn record_egress_dropped(&self) {
        bump(&self.egress_dropped);
    }

    #[inline]
    pub fn record_ingress_dropped(&self) {
        bump(&self.ingress_dropped);
    }

    pub fn set_location_gauges(&self, total: usize, occupied: usize, locked: usize) {
        self.locations.store(total as u64, Ordering::Relaxed);
        self.locations_occupied.store(occupied as u64, Ordering::Relaxed);
        self.locations_locked.store(locked as u64, Ordering::Relaxed);
    }

    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    pub fn events_total(&self) -> u64 {
        read(&self.events_total)
    }

    pub fn occupied_transitions_total(&self) -> u64 {
        read(&self.occupied_transitions_total)
    }

    pub fn vacant_transitions_total(&self) -> u64 {
        read(&self.vacant_transitions_total)
    }

    pub fn stale_timers_total(&self) -> u64 {
        read(&self.stale_timers_total)
    }

    pub fn guard_rejections_total(&self) -> u64 {
        read(&self.guard_rejections_total)
    }

    pub fn config_warnings_total(&self) -> u64 {
        read(&self.config_warnings_total)
    }

    pub fn egress_dropped(&self) -> u64 {
        read(&self.egress_dropped)
    }

    pub fn ingress_dropped(&self) -> u64 {
        read(&self.ingress_dropped)
    }

    /// Snapshot everything and start a new latency window
    ///
    /// Monotonic counters and gauges are only read; the latency histogram
    /// and the rate window are reset.
    pub fn report(&self) -> MetricsSummary {
        let window = self.latency.drain();
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };
        let events_per_sec = if elapsed > 0.0 { window.count as f64 / elapsed } else { 0.0 };

        MetricsSummary {
            events_total: read(&self.events_total),
            events_per_sec,
            avg_process_latency_us: window.average(),
            max_process_latency_us: window.max_us,
            lat_p50_us: window.quantile(0.50),
            lat_p95_us: window.quantile(0.95),
            lat_p99_us: window.quantile(0.99),
            lat_buckets: window.buckets,
            sensor_events_total: read(&self.sensor_events_total),
            command_events_total: read(&self.command_events_total),
            occupied_transitions_total: read(&self.occupied_transitions_total),
            vacant_transitions_total: read(&self.vacant_transitions_total),
            timer_expiries_total: read(&self.timer_expiries_total),
            stale_timers_total: read(&self.stale_timers_total),
            locks_total: read(&self.locks_total),
            unlocks_total: read(&self.unlocks_total),
            guard_rejections_total: read(&self.guard_rejections_total),
            config_warnings_total: read(&self.config_warnings_total),
            action_commands_total: read(&self.action_commands_total),
            egress_dropped: read(&self.egress_dropped),
            ingress_dropped: read(&self.ingress_dropped),
            locations: read(&self.locations),
            locations_occupied: read(&self.locations_occupied),
            locations_locked: read(&self.locations_locked),
            event_queue_depth: read(&self.event_queue_depth),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Per-bucket counts for the window, bounds in `METRICS_BUCKET_BOUNDS`
    pub lat_buckets: [u64; METRICS_NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub sensor_events_total: u64,
    pub command_events_total: u64,
    pub occupied_transitions_total: u64,
    pub vacant_transitions_total: u64,
    pub timer_expiries_total: u64,
    pub stale_timers_total: u64,
    pub locks_total: u64,
    pub unlocks_total: u64,
    pub guard_rejections_total: u64,
    pub config_warnings_total: u64,
    pub action_commands_total: u64,
    pub egress_dropped: u64,
    pub ingress_dropped: u64,
    pub locations: u64,
    pub locations_occupied: u64,
    pub locations_locked: u64,
    pub event_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = self.avg_process_latency_us,
            p99_us = self.lat_p99_us,
            queue_depth = self.event_queue_depth,
            locations = self.locations,
            occupied = self.locations_occupied,
            locked = self.locations_locked,
            timer_expiries = self.timer_expiries_total,
            guard_rejections = self.guard_rejections_total,
            config_warnings = self.config_warnings_total,
            egress_dropped = self.egress_dropped,
            ingress_dropped = self.ingress_dropped,
            "metrics"
        );
    }
}
