//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! operational statistics across the MQTT session, node lifecycle, command
//! handling and retained-state sweeping.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // MQTT session
    mqtt_connected: AtomicBool,
    connections_established: AtomicU64,
    disconnections: AtomicU64,
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    connection_start_time: AtomicU64,

    // Node lifecycle and commands
    node_state: Mutex<String>,
    state_transitions: AtomicU64,
    births_published: AtomicU64,
    samples_published: AtomicU64,
    commands_applied: AtomicU64,
    commands_rejected: AtomicU64,
    unhandled_topics: AtomicU64,
    handler_failures: AtomicU64,
    command_counts: Mutex<HashMap<String, u64>>,

    // Retained-state sweeper
    retained_seen: AtomicU64,
    overwrites_published: AtomicU64,
    overwrites_confirmed: AtomicU64,
    idle_timeouts: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connections_established: AtomicU64::new(0),
            disconnections: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            node_state: Mutex::new("offline".to_string()),
            state_transitions: AtomicU64::new(0),
            births_published: AtomicU64::new(0),
            samples_published: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            commands_rejected: AtomicU64::new(0),
            unhandled_topics: AtomicU64::new(0),
            handler_failures: AtomicU64::new(0),
            command_counts: Mutex::new(HashMap::new()),
            retained_seen: AtomicU64::new(0),
            overwrites_published: AtomicU64::new(0),
            overwrites_confirmed: AtomicU64::new(0),
            idle_timeouts: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // MQTT session metrics
    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.disconnections.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn mqtt_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Node lifecycle metrics
    pub fn set_node_state(&self, state: &str) {
        if let Ok(mut current) = self.node_state.lock() {
            if current.as_str() != state {
                *current = state.to_string();
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn birth_published(&self) {
        self.births_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples_published(&self, count: u64) {
        self.samples_published.fetch_add(count, Ordering::Relaxed);
    }

    /// Count an accepted command, keyed by its topic suffix
    pub fn command_applied(&self, command: &str) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut counts) = self.command_counts.lock() {
            *counts.entry(command.to_string()).or_insert(0) += 1;
        }
    }

    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unhandled_topic(&self) {
        self.unhandled_topics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Sweeper metrics
    pub fn retained_seen(&self) {
        self.retained_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overwrite_published(&self) {
        self.overwrites_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn overwrite_confirmed(&self) {
        self.overwrites_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweep_idle_timeout(&self) {
        self.idle_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.connections_established,
            &self.disconnections,
            &self.messages_received,
            &self.messages_published,
            &self.publish_failures,
            &self.connection_start_time,
            &self.state_transitions,
            &self.births_published,
            &self.samples_published,
            &self.commands_applied,
            &self.commands_rejected,
            &self.unhandled_topics,
            &self.handler_failures,
            &self.retained_seen,
            &self.overwrites_published,
            &self.overwrites_confirmed,
            &self.idle_timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut state) = self.node_state.lock() {
            *state = "offline".to_string();
        }
        if let Ok(mut counts) = self.command_counts.lock() {
            counts.clear();
        }
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        let current_state = self
            .node_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());
        let command_counts = self
            .command_counts
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default();

        MetricsSnapshot {
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                disconnections: self.disconnections.load(Ordering::Relaxed),
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            node: NodeMetrics {
                current_state,
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                births_published: self.births_published.load(Ordering::Relaxed),
                samples_published: self.samples_published.load(Ordering::Relaxed),
                commands_applied: self.commands_applied.load(Ordering::Relaxed),
                commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
                unhandled_topics: self.unhandled_topics.load(Ordering::Relaxed),
                handler_failures: self.handler_failures.load(Ordering::Relaxed),
                command_counts,
            },
            sweeper: SweeperMetrics {
                retained_seen: self.retained_seen.load(Ordering::Relaxed),
                overwrites_published: self.overwrites_published.load(Ordering::Relaxed),
                overwrites_confirmed: self.overwrites_confirmed.load(Ordering::Relaxed),
                idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub mqtt: MqttMetrics,
    pub node: NodeMetrics,
    pub sweeper: SweeperMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connections_established: u64,
    pub disconnections: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub current_state: String,
    pub state_transitions: u64,
    pub births_published: u64,
    pub samples_published: u64,
    pub commands_applied: u64,
    pub commands_rejected: u64,
    pub unhandled_topics: u64,
    pub handler_failures: u64,
    pub command_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweeperMetrics {
    pub retained_seen: u64,
    pub overwrites_published: u64,
    pub overwrites_confirmed: u64,
    pub idle_timeouts: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_established();
        collector.mqtt_message_published();
        collector.mqtt_message_received();

        let snapshot = collector.snapshot();
        assert!(snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connections_established, 1);
        assert_eq!(snapshot.mqtt.messages_published, 1);
        assert_eq!(snapshot.mqtt.messages_received, 1);

        collector.mqtt_connection_lost();
        let snapshot = collector.snapshot();
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.disconnections, 1);
        assert_eq!(snapshot.mqtt.connection_duration_seconds, 0);
    }

    #[test]
    fn test_command_metrics() {
        let collector = MetricsCollector::new();

        collector.command_applied("command/rebirth");
        collector.command_applied("command/rebirth");
        collector.command_applied("property/scan_rate/set");
        collector.command_rejected();
        collector.unhandled_topic();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.node.commands_applied, 3);
        assert_eq!(snapshot.node.commands_rejected, 1);
        assert_eq!(snapshot.node.unhandled_topics, 1);
        assert_eq!(snapshot.node.command_counts["command/rebirth"], 2);
        assert_eq!(snapshot.node.command_counts["property/scan_rate/set"], 1);
    }

    #[test]
    fn test_state_transitions_only_count_changes() {
        let collector = MetricsCollector::new();

        collector.set_node_state("connecting");
        collector.set_node_state("online");
        collector.set_node_state("online");

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.node.current_state, "online");
        assert_eq!(snapshot.node.state_transitions, 2);
    }

    #[test]
    fn test_sweeper_metrics() {
        let collector = MetricsCollector::new();

        collector.retained_seen();
        collector.overwrite_published();
        collector.overwrite_confirmed();
        collector.sweep_idle_timeout();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.sweeper.retained_seen, 1);
        assert_eq!(snapshot.sweeper.overwrites_published, 1);
        assert_eq!(snapshot.sweeper.overwrites_confirmed, 1);
        assert_eq!(snapshot.sweeper.idle_timeouts, 1);
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.mqtt_message_received();
                        collector.samples_published(2);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.mqtt.messages_received, 1000);
        assert_eq!(snapshot.node.samples_published, 2000);
    }

    #[test]
    fn test_reset_functionality() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_established();
        collector.command_applied("command/shutdown");
        collector.set_node_state("online");

        collector.reset();

        let snapshot = collector.snapshot();
        assert!(!snapshot.mqtt.connected);
        assert_eq!(snapshot.mqtt.connections_established, 0);
        assert_eq!(snapshot.node.commands_applied, 0);
        assert_eq!(snapshot.node.current_state, "offline");
        assert!(snapshot.node.command_counts.is_empty());
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        collector.birth_published();

        let json = serde_json::to_value(collector.snapshot()).unwrap();
        assert_eq!(json["node"]["births_published"], 1);
        assert!(json["sweeper"].is_object());
    }
}
