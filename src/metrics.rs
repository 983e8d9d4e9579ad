//! Session metrics accounting.
//!
//! Every bridge-mediated operation bumps the call counter on entry and the
//! error counter on failure; publish and receive paths additionally track
//! message and byte counts using the exact encoded payload length. Counters
//! are monotonic and scoped to one client session.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// Exported metric names, as consumed by the reporting pipeline.
pub const MQTT_CALLS: &str = "mqtt_calls";
pub const MQTT_ERRORS: &str = "mqtt_errors";
pub const MQTT_MESSAGE_SENT: &str = "mqtt_message_sent";
pub const MQTT_MESSAGE_RECEIVED: &str = "mqtt_message_received";
pub const MQTT_DATA_SENT: &str = "mqtt_data_sent";
pub const MQTT_DATA_RECEIVED: &str = "mqtt_data_received";

/// Atomic counter for thread-safe metric updates.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

/// Operation counters for one client session.
#[derive(Debug, Clone, Default)]
pub struct SessionMetrics {
    calls: Counter,
    errors: Counter,
    messages_sent: Counter,
    messages_received: Counter,
    data_sent: Counter,
    data_received: Counter,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_call(&self, method: &'static str) {
        tracing::debug!(method, "session call");
        self.calls.inc();
    }

    pub(crate) fn record_error(&self, method: &'static str, error: &SessionError) {
        tracing::debug!(method, error = %error, "session call failed");
        self.errors.inc();
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.inc();
        self.data_sent.add(bytes as u64);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.messages_received.inc();
        self.data_received.add(bytes as u64);
    }

    /// Point-in-time export of the counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            calls: self.calls.get(),
            errors: self.errors.get(),
            messages_sent: self.messages_sent.get(),
            messages_received: self.messages_received.get(),
            data_sent: self.data_sent.get(),
            data_received: self.data_received.get(),
        }
    }
}

/// Counter values frozen for export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub data_sent: u64,
    pub data_received: u64,
}

impl MetricsSnapshot {
    /// Counter values keyed by their exported metric names.
    pub fn export(&self) -> Vec<(&'static str, u64)> {
        vec![
            (MQTT_CALLS, self.calls),
            (MQTT_ERRORS, self.errors),
            (MQTT_MESSAGE_SENT, self.messages_sent),
            (MQTT_MESSAGE_RECEIVED, self.messages_received),
            (MQTT_DATA_SENT, self.data_sent),
            (MQTT_DATA_RECEIVED, self.data_received),
        ]
    }
}
