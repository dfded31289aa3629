//! Metrics instrumentation for the synchronization engine.
//!
//! Uses the `metrics` facade; nothing is recorded unless the embedding
//! binary installs a recorder.

use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const EVENTS_TOTAL: &str = "pollsync_events_total";
    pub const CACHE_WRITES_TOTAL: &str = "pollsync_cache_writes_total";
    pub const JOINS_TOTAL: &str = "pollsync_joins_total";
    pub const LEAVES_TOTAL: &str = "pollsync_leaves_total";
    pub const RECONNECTS_TOTAL: &str = "pollsync_reconnects_total";
    pub const ACTIVE_ROOMS: &str = "pollsync_active_rooms";
    pub const MOUNTED_VIEWS: &str = "pollsync_mounted_views";
}

/// Describe all metrics to the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::EVENTS_TOTAL,
        "Inbound events by event name and reconciliation outcome"
    );
    metrics::describe_counter!(
        names::CACHE_WRITES_TOTAL,
        "Cache writes and removals performed by reconcilers"
    );
    metrics::describe_counter!(names::JOINS_TOTAL, "join_poll events emitted");
    metrics::describe_counter!(names::LEAVES_TOTAL, "leave_poll events emitted");
    metrics::describe_counter!(
        names::RECONNECTS_TOTAL,
        "Sessions re-established after a drop"
    );
    metrics::describe_gauge!(names::ACTIVE_ROOMS, "Poll rooms currently joined");
    metrics::describe_gauge!(names::MOUNTED_VIEWS, "Views currently mounted");
}

/// Record an inbound event and what the engine did with it.
pub fn record_event(event: &'static str, outcome: &'static str) {
    counter!(names::EVENTS_TOTAL, "event" => event, "outcome" => outcome).increment(1);
}

/// Record a cache write.
pub fn record_cache_write(kind: &'static str) {
    counter!(names::CACHE_WRITES_TOTAL, "kind" => kind).increment(1);
}

/// Record an emitted join.
pub fn record_join() {
    counter!(names::JOINS_TOTAL).increment(1);
}

/// Record an emitted leave.
pub fn record_leave() {
    counter!(names::LEAVES_TOTAL).increment(1);
}

/// Record a reconnection.
pub fn record_reconnect() {
    counter!(names::RECONNECTS_TOTAL).increment(1);
}

/// Update the active room count.
pub fn set_active_rooms(count: usize) {
    gauge!(names::ACTIVE_ROOMS).set(count as f64);
}

/// Update the mounted view count.
pub fn set_mounted_views(count: usize) {
    gauge!(names::MOUNTED_VIEWS).set(count as f64);
}
