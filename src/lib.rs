//! TCP acknowledgment benchmark.
//!
//! The server answers every payload it reads with `ACK:<n>`; the client drives
//! bulk or rate-limited load over one connection and measures round-trip
//! latency. Both sides finish by printing a summary and writing a JSON record.

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod net;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use client::{LoadGenerator, LoadProfile};
pub use config::Config;
pub use error::{BenchError, Result};
pub use metrics::{MetricsCollector, MetricsReporter, MetricsSnapshot, Report};
pub use server::Server;
