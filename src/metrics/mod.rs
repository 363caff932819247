//! Run metrics: the plain accumulator, its shared server-side wrapper, the
//! derived report and the file sink.

mod report;
mod sink;

pub use report::{LatencyStats, MetricsReporter, Report};
pub use sink::{JsonFileSink, MetricsSink, PersistedMetrics};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => write!(f, "server"),
            Role::Client => write!(f, "client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Seconds since the unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Counters and samples for one run.
///
/// `total_messages` counts successful messages only: received payloads on
/// the server, acknowledged sends on the client. Latencies are only recorded
/// by the client, one per acknowledged send. `timestamps` holds receive times
/// on the server and send times on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub role: Role,
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub failed_messages: u64,
    pub latencies: Vec<f64>,
    pub timestamps: Vec<f64>,
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

impl MetricsSnapshot {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            total_connections: 0,
            total_messages: 0,
            total_bytes: 0,
            failed_messages: 0,
            latencies: Vec::new(),
            timestamps: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn mark_started(&mut self, at: f64) {
        self.start_time.get_or_insert(at);
    }

    pub fn mark_finished(&mut self, at: f64) {
        self.end_time = Some(at);
    }

    pub fn record_connection(&mut self) -> ConnectionId {
        self.total_connections += 1;
        ConnectionId(self.total_connections)
    }

    /// Server side: one payload read off a session.
    pub fn record_received(&mut self, bytes: usize, at: f64) {
        self.total_messages += 1;
        self.total_bytes += bytes as u64;
        self.timestamps.push(at);
    }

    /// Client side: one send that came back acknowledged.
    pub fn record_acknowledged(&mut self, bytes: usize, sent_at: f64, latency: Duration) {
        self.total_messages += 1;
        self.total_bytes += bytes as u64;
        self.latencies.push(latency.as_secs_f64());
        self.timestamps.push(sent_at);
    }

    pub fn record_failure(&mut self) {
        self.failed_messages += 1;
    }

    pub fn attempted(&self) -> u64 {
        self.total_messages + self.failed_messages
    }

    /// Wall-clock span of the run, once both ends are known.
    pub fn duration(&self) -> Option<f64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Server-side collector shared by every connection handler.
///
/// One lock guards every counter and sequence so an increment and its
/// matching append are never observed apart.
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn new(role: Role) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::new(role))),
        }
    }

    pub async fn mark_started(&self) {
        self.inner.lock().await.mark_started(unix_now());
    }

    pub async fn mark_finished(&self) {
        self.inner.lock().await.mark_finished(unix_now());
    }

    pub async fn register_connection(&self) -> ConnectionId {
        self.inner.lock().await.record_connection()
    }

    pub async fn record_received(&self, bytes: usize) {
        // Stamp under the lock so the sequence stays in arrival order.
        let mut inner = self.inner.lock().await;
        inner.record_received(bytes, unix_now());
    }

    pub async fn record_failure(&self) {
        self.inner.lock().await.record_failure();
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().await.clone()
    }
}
