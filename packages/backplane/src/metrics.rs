//! Backplane metrics for observability
//!
//! Plain atomic counters; hosts expose them through [`BackplaneMetrics::snapshot`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide routing metrics
#[derive(Debug, Default)]
pub struct BackplaneMetrics {
    // Connection metrics
    /// Connections currently held by this process
    pub active_connections: AtomicU64,
    /// Connections accepted since start
    pub total_connections: AtomicU64,

    // Routing metrics
    /// Messages written straight to a locally held connection
    pub local_deliveries: AtomicU64,
    /// Sends that missed the local registry and went through a client actor
    pub remote_routes: AtomicU64,
    /// Sends dropped because the target connection had no owner
    pub dropped_sends: AtomicU64,
    /// Envelopes published on a hub broadcast topic
    pub broadcasts_published: AtomicU64,
    /// Envelopes received from the broadcast or inbox topics
    pub envelopes_received: AtomicU64,

    // Error metrics
    /// Failed writes to locally held connections
    pub write_failures: AtomicU64,
    /// Heartbeat ticks that failed to reach the directory
    pub heartbeat_failures: AtomicU64,

    start_time: Option<Instant>,
}

impl BackplaneMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn local_delivery(&self) {
        self.local_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_route(&self) {
        self.remote_routes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_dropped(&self) {
        self.dropped_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn broadcast_published(&self) {
        self.broadcasts_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn envelope_received(&self) {
        self.envelopes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn write_failure(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_failure(&self) {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            routing: RoutingMetrics {
                local_deliveries: self.local_deliveries.load(Ordering::Relaxed),
                remote_routes: self.remote_routes.load(Ordering::Relaxed),
                dropped_sends: self.dropped_sends.load(Ordering::Relaxed),
                broadcasts_published: self.broadcasts_published.load(Ordering::Relaxed),
                envelopes_received: self.envelopes_received.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                write_failures: self.write_failures.load(Ordering::Relaxed),
                heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub routing: RoutingMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingMetrics {
    pub local_deliveries: u64,
    pub remote_routes: u64,
    pub dropped_sends: u64,
    pub broadcasts_published: u64,
    pub envelopes_received: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub write_failures: u64,
    pub heartbeat_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_tracking() {
        let metrics = BackplaneMetrics::new();

        metrics.connection_opened();
        metrics.connection_opened();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 2);

        metrics.connection_closed();
        assert_eq!(metrics.active_connections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.total_connections.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_snapshot() {
        let metrics = BackplaneMetrics::new();
        metrics.local_delivery();
        metrics.remote_route();
        metrics.send_dropped();
        metrics.heartbeat_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.routing.local_deliveries, 1);
        assert_eq!(snapshot.routing.remote_routes, 1);
        assert_eq!(snapshot.routing.dropped_sends, 1);
        assert_eq!(snapshot.errors.heartbeat_failures, 1);
        assert_eq!(snapshot.errors.write_failures, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let json = serde_json::to_value(BackplaneMetrics::new().snapshot()).unwrap();
        assert_eq!(json["routing"]["broadcasts_published"], 0);
        assert_eq!(json["connections"]["active"], 0);
    }
}
