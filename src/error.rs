use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BenchError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize metrics: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl BenchError {
    /// Errors that end a single send/ack cycle but leave the run going.
    pub fn is_cycle_failure(&self) -> bool {
        matches!(
            self,
            BenchError::Send(_)
                | BenchError::Receive(_)
                | BenchError::PeerClosed
                | BenchError::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
