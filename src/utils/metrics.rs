//! Observability and Metrics
//!
//! Counters for the topology manager, router and overlay worker.
//!
//! Uses atomic counters so the worker can record while other threads read
//! snapshots. Each network owns its own collector, shared through an `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

/// Metrics collector for overlay operations
#[derive(Debug)]
pub struct Metrics {
    /// Maintenance ticks run
    pub ticks: AtomicU64,
    /// Ticks skipped because the network lock was contended
    pub ticks_skipped: AtomicU64,
    /// Outbound connection attempts started
    pub connect_attempts: AtomicU64,
    /// Connections dropped to enforce a role quota
    pub evictions: AtomicU64,
    /// Connections added (outbound or accepted)
    pub nodes_added: AtomicU64,
    /// Connections reaped or removed
    pub nodes_removed: AtomicU64,
    /// Packets handed to a persistent connection
    pub forwarded_connection: AtomicU64,
    /// Packets handed to the datagram transport
    pub forwarded_datagram: AtomicU64,
    /// Addressed packets dropped by forwarding policy
    pub packets_dropped: AtomicU64,
    /// Lookups that found no route
    pub no_route: AtomicU64,
    /// Malformed packets seen
    pub format_errors: AtomicU64,
    /// Known-hub-list broadcasts
    pub khl_broadcasts: AtomicU64,
    /// Local node info broadcasts
    pub lni_broadcasts: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            connect_attempts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            nodes_added: AtomicU64::new(0),
            nodes_removed: AtomicU64::new(0),
            forwarded_connection: AtomicU64::new(0),
            forwarded_datagram: AtomicU64::new(0),
            packets_dropped: AtomicU64::new(0),
            no_route: AtomicU64::new(0),
            format_errors: AtomicU64::new(0),
            khl_broadcasts: AtomicU64::new(0),
            lni_broadcasts: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_added(&self) {
        self.nodes_added.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_removed(&self) {
        self.nodes_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forwarded_over_connection(&self) {
        self.forwarded_connection.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forwarded_over_datagram(&self) {
        self.forwarded_datagram.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packet_dropped(&self) {
        self.packets_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn route_missing(&self) {
        self.no_route.fetch_add(1, Ordering::Relaxed);
    }

    pub fn format_error(&self) {
        self.format_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn khl_broadcast(&self) {
        self.khl_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn lni_broadcast(&self) {
        self.lni_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            nodes_added: self.nodes_added.load(Ordering::Relaxed),
            nodes_removed: self.nodes_removed.load(Ordering::Relaxed),
            forwarded_connection: self.forwarded_connection.load(Ordering::Relaxed),
            forwarded_datagram: self.forwarded_datagram.load(Ordering::Relaxed),
            packets_dropped: self.packets_dropped.load(Ordering::Relaxed),
            no_route: self.no_route.load(Ordering::Relaxed),
            format_errors: self.format_errors.load(Ordering::Relaxed),
            khl_broadcasts: self.khl_broadcasts.load(Ordering::Relaxed),
            lni_broadcasts: self.lni_broadcasts.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            ticks = snapshot.ticks,
            ticks_skipped = snapshot.ticks_skipped,
            connect_attempts = snapshot.connect_attempts,
            evictions = snapshot.evictions,
            nodes_added = snapshot.nodes_added,
            nodes_removed = snapshot.nodes_removed,
            forwarded_connection = snapshot.forwarded_connection,
            forwarded_datagram = snapshot.forwarded_datagram,
            packets_dropped = snapshot.packets_dropped,
            no_route = snapshot.no_route,
            format_errors = snapshot.format_errors,
            khl_broadcasts = snapshot.khl_broadcasts,
            lni_broadcasts = snapshot.lni_broadcasts,
            uptime_seconds = snapshot.uptime_seconds,
            "Overlay metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub ticks_skipped: u64,
    pub connect_attempts: u64,
    pub evictions: u64,
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub forwarded_connection: u64,
    pub forwarded_datagram: u64,
    pub packets_dropped: u64,
    pub no_route: u64,
    pub format_errors: u64,
    pub khl_broadcasts: u64,
    pub lni_broadcasts: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
