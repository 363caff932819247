use super::{MetricsSink, MetricsSnapshot, Role, unix_now};
use crate::error::Result;
use std::fmt;
use tracing::info;

const RULE_WIDTH: usize = 60;

/// Latency summary in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let min = sorted[0];
        let max = sorted[sorted.len() - 1];
        let avg = sorted.iter().sum::<f64>() / sorted.len() as f64;

        Some(Self {
            // summation error can push the mean a hair outside [min, max]
            avg: avg.clamp(min, max),
            min,
            max,
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        })
    }
}

/// Nearest-rank style lookup at `floor(len * p)` into an ascending slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let idx = (sorted.len() as f64 * p).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub role: Role,
    pub duration: Option<f64>,
    pub total_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub failed_messages: u64,
    pub latency: Option<LatencyStats>,
    pub messages_per_sec: Option<f64>,
    pub throughput_mbps: Option<f64>,
    pub avg_message_size: Option<f64>,
}

impl Report {
    pub fn from_snapshot(snapshot: &MetricsSnapshot) -> Self {
        let duration = snapshot.duration();
        let rated = duration.filter(|d| *d > 0.0 && snapshot.total_messages > 0);

        Self {
            role: snapshot.role,
            duration,
            total_connections: snapshot.total_connections,
            total_messages: snapshot.total_messages,
            total_bytes: snapshot.total_bytes,
            failed_messages: snapshot.failed_messages,
            latency: LatencyStats::from_samples(&snapshot.latencies),
            messages_per_sec: rated.map(|d| snapshot.total_messages as f64 / d),
            throughput_mbps: rated.map(|d| (snapshot.total_bytes * 8) as f64 / d / 1_000_000.0),
            avg_message_size: (snapshot.total_messages > 0)
                .then(|| snapshot.total_bytes as f64 / snapshot.total_messages as f64),
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        writeln!(f, "{}", rule)?;
        writeln!(f, "TCP {} PERFORMANCE METRICS", self.role.to_string().to_uppercase())?;
        writeln!(f, "{}", rule)?;

        if let Some(duration) = self.duration {
            writeln!(f, "Duration: {:.2} seconds", duration)?;
        }

        match self.role {
            Role::Server => {
                writeln!(f, "Total Connections: {}", self.total_connections)?;
                writeln!(f, "Total Messages Received: {}", self.total_messages)?;
                writeln!(f, "Total Bytes Received: {} bytes", self.total_bytes)?;
                writeln!(f, "Failed Connections: {}", self.failed_messages)?;
            }
            Role::Client => {
                writeln!(f, "Total Messages Sent: {}", self.total_messages)?;
                writeln!(f, "Total Bytes Sent: {} bytes", self.total_bytes)?;
                writeln!(f, "Failed Messages: {}", self.failed_messages)?;
            }
        }

        if let Some(latency) = &self.latency {
            writeln!(f)?;
            writeln!(f, "Latency Statistics:")?;
            writeln!(f, "  Average: {:.2} ms", latency.avg * 1000.0)?;
            writeln!(f, "  Min: {:.2} ms", latency.min * 1000.0)?;
            writeln!(f, "  Max: {:.2} ms", latency.max * 1000.0)?;
            writeln!(f, "  P50: {:.2} ms", latency.p50 * 1000.0)?;
            writeln!(f, "  P95: {:.2} ms", latency.p95 * 1000.0)?;
            writeln!(f, "  P99: {:.2} ms", latency.p99 * 1000.0)?;
        }

        if let (Some(rate), Some(mbps)) = (self.messages_per_sec, self.throughput_mbps) {
            writeln!(f)?;
            writeln!(f, "Throughput:")?;
            writeln!(f, "  Messages per Second: {:.2}", rate)?;
            writeln!(f, "  Throughput: {:.2} Mbps", mbps)?;
            if let Some(size) = self.avg_message_size {
                writeln!(f, "  Average Message Size: {:.2} bytes", size)?;
            }
        }

        write!(f, "{}", rule)
    }
}

/// Turns a finished snapshot into a printed summary and a persisted record.
pub struct MetricsReporter {
    sink: Option<Box<dyn MetricsSink + Send + Sync>>,
}

impl MetricsReporter {
    pub fn new(sink: impl MetricsSink + Send + Sync + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
        }
    }

    pub fn without_sink() -> Self {
        Self { sink: None }
    }

    pub fn report(&self, snapshot: &MetricsSnapshot) -> Result<Report> {
        let report = Report::from_snapshot(snapshot);
        println!("{}", report);

        if let Some(sink) = &self.sink {
            let path = sink.persist(snapshot, unix_now())?;
            info!("Metrics saved to {}", path.display());
        }

        Ok(report)
    }
}
