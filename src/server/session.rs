use crate::error::{BenchError, Result};
use crate::metrics::{ConnectionId, MetricsCollector};
use crate::net::read_some;
use crate::protocol::{Ack, Payload};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

/// Per-connection state. Ack numbers come from here, not from the shared
/// collector, so every connection counts from 1.
#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    message_count: u64,
}

impl Session {
    pub fn new(id: ConnectionId, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            message_count: 0,
        }
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    fn next_ack(&mut self) -> Ack {
        self.message_count += 1;
        Ack(self.message_count)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent EOF.
    Graceful,
    /// Read or write failed.
    Abrupt,
}

enum Step {
    Acked,
    Closed,
}

/// Drives one session: read a chunk, count it, answer with the next ack,
/// until the peer closes or the socket errors.
pub struct ConnectionHandler<S> {
    stream: S,
    session: Session,
    collector: MetricsCollector,
    recv_buffer_size: usize,
    read_timeout: Option<Duration>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        session: Session,
        collector: MetricsCollector,
        recv_buffer_size: usize,
        read_timeout: Option<Duration>,
    ) -> Self {
        Self {
            stream,
            session,
            collector,
            recv_buffer_size,
            read_timeout,
        }
    }

    pub async fn run(mut self) -> (Session, CloseReason) {
        let mut buf = vec![0u8; self.recv_buffer_size];

        let reason = loop {
            match self.step(&mut buf).await {
                Ok(Step::Acked) => continue,
                Ok(Step::Closed) => break CloseReason::Graceful,
                Err(e) => {
                    error!(
                        "Connection {} from {} failed: {}",
                        self.session.id, self.session.peer, e
                    );
                    self.collector.record_failure().await;
                    break CloseReason::Abrupt;
                }
            }
        };

        let _ = self.stream.shutdown().await;
        info!(
            "Connection from {} closed after {} messages",
            self.session.peer,
            self.session.message_count()
        );
        (self.session, reason)
    }

    async fn step(&mut self, buf: &mut [u8]) -> Result<Step> {
        let n = read_some(&mut self.stream, buf, self.read_timeout).await?;
        if n == 0 {
            return Ok(Step::Closed);
        }

        self.collector.record_received(n).await;
        match Payload::decode(&buf[..n]) {
            Payload::Text(preview) => debug!("Received: {}... ({} bytes)", preview, n),
            Payload::Binary(len) => debug!("Received binary data ({} bytes)", len),
        }

        let ack = self.session.next_ack();
        self.stream
            .write_all(&ack.to_bytes())
            .await
            .map_err(BenchError::Send)?;
        Ok(Step::Acked)
    }
}
