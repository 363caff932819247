mod profile;

pub use profile::LoadProfile;

use crate::config::ClientConfig;
use crate::error::{BenchError, Result};
use crate::metrics::{MetricsSnapshot, Role, unix_now};
use crate::net::{self, read_some};
use crate::protocol::Ack;
use crate::shutdown::stop_requested;
use profile::{run_length, send_interval};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const BULK_PROGRESS_EVERY: u64 = 10;

/// How a single send/ack cycle ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Cycle {
    Acked(Duration),
    Failed,
    /// A stop arrived while the cycle was in flight.
    Interrupted,
}

/// Sequential load driver over one open connection. A send is never issued
/// before the previous one has been acknowledged or has failed.
pub struct LoadGenerator<S> {
    stream: S,
    metrics: MetricsSnapshot,
    ack_buf: Vec<u8>,
    read_timeout: Option<Duration>,
    last_ack: Option<Ack>,
    stop: watch::Receiver<bool>,
}

impl<S> LoadGenerator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ack_buffer_size: usize, stop: watch::Receiver<bool>) -> Self {
        let mut metrics = MetricsSnapshot::new(Role::Client);
        metrics.record_connection();

        Self {
            stream,
            metrics,
            ack_buf: vec![0u8; ack_buffer_size],
            read_timeout: None,
            last_ack: None,
            stop,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn metrics(&self) -> &MetricsSnapshot {
        &self.metrics
    }

    pub fn last_ack(&self) -> Option<Ack> {
        self.last_ack
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Runs one profile. An invalid profile is rejected before anything is
    /// sent or recorded.
    pub async fn run(&mut self, profile: &LoadProfile) -> Result<()> {
        profile.validate()?;
        self.metrics.mark_started(unix_now());
        info!("Starting {}", profile);

        let payload = profile.payload();
        match *profile {
            LoadProfile::Bulk { message_count, .. } => {
                self.run_bulk(message_count, &payload).await;
            }
            LoadProfile::RateLimited {
                duration_secs,
                rate,
                ..
            } => {
                let duration = run_length(duration_secs)?;
                self.run_rate_limited(duration, rate, &payload).await;
            }
        }

        self.metrics.mark_finished(unix_now());
        Ok(())
    }

    async fn run_bulk(&mut self, count: u64, payload: &[u8]) {
        for i in 1..=count {
            if self.is_stopped() {
                warn!("Stopping bulk send after {} of {} messages", i - 1, count);
                return;
            }

            match self.cycle(payload).await {
                Cycle::Acked(latency) if i % BULK_PROGRESS_EVERY == 0 => info!(
                    "Sent {}/{} messages, last latency: {:.2} ms",
                    i,
                    count,
                    latency.as_secs_f64() * 1000.0
                ),
                Cycle::Acked(_) => {}
                Cycle::Failed => warn!("Failed to send message {}", i),
                Cycle::Interrupted => return,
            }
        }
        info!("Bulk send complete");
    }

    /// Holds `rate` sends per second for `duration`. A slow cycle delays the
    /// next slot; missed slots are not made up.
    async fn run_rate_limited(&mut self, duration: Duration, rate: u32, payload: &[u8]) {
        let delay = send_interval(rate);
        let started = Instant::now();
        let mut attempts: u64 = 0;

        while started.elapsed() < duration {
            if self.is_stopped() {
                warn!("Stopping rate-limited send after {} messages", attempts);
                return;
            }

            let cycle_started = Instant::now();
            let outcome = self.cycle(payload).await;
            attempts += 1;

            match outcome {
                Cycle::Acked(latency) if attempts % u64::from(rate.max(1)) == 0 => info!(
                    "{} messages sent in {:.1}s, last latency: {:.2} ms",
                    attempts,
                    started.elapsed().as_secs_f64(),
                    latency.as_secs_f64() * 1000.0
                ),
                Cycle::Acked(_) => {}
                Cycle::Failed => warn!("Failed to send message {}", attempts),
                Cycle::Interrupted => return,
            }

            if let Some(remaining) = delay.checked_sub(cycle_started.elapsed()) {
                tokio::select! {
                    _ = time::sleep(remaining) => {}
                    _ = stop_requested(&mut self.stop) => return,
                }
            }
        }
        info!("Rate-limited send complete: {} messages", attempts);
    }

    /// One send followed by one ack read, recorded either way.
    pub async fn cycle(&mut self, payload: &[u8]) -> Cycle {
        let sent_at = unix_now();
        let t0 = Instant::now();

        let exchanged = tokio::select! {
            exchanged = exchange(
                &mut self.stream,
                &mut self.ack_buf,
                payload,
                self.read_timeout,
            ) => Some(exchanged),
            _ = stop_requested(&mut self.stop) => None,
        };

        match exchanged {
            Some(Ok(ack)) => {
                let latency = t0.elapsed();
                self.metrics
                    .record_acknowledged(payload.len(), sent_at, latency);
                if ack.is_some() {
                    self.last_ack = ack;
                }
                Cycle::Acked(latency)
            }
            Some(Err(e)) => {
                debug!("Cycle failed: {}", e);
                self.metrics.record_failure();
                Cycle::Failed
            }
            None => {
                self.metrics.record_failure();
                Cycle::Interrupted
            }
        }
    }

    /// Closes the write side and hands back the run's metrics.
    pub async fn finish(mut self) -> MetricsSnapshot {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown of client stream failed: {}", e);
        }
        self.metrics
    }
}

async fn exchange<S>(
    stream: &mut S,
    ack_buf: &mut [u8],
    payload: &[u8],
    read_timeout: Option<Duration>,
) -> Result<Option<Ack>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(payload).await.map_err(BenchError::Send)?;

    // One read is taken as the whole ack; the stream carries no framing.
    let n = read_some(stream, ack_buf, read_timeout).await?;
    if n == 0 {
        return Err(BenchError::PeerClosed);
    }

    let ack = Ack::parse(&ack_buf[..n]);
    if ack.is_none() {
        debug!("Reply is not an ack ({} bytes), counting it anyway", n);
    }
    Ok(ack)
}

/// Connects and runs every configured profile in order on that one
/// connection. Invalid profiles and a failed connect are fatal; past that the
/// returned metrics are complete even when the run was interrupted. A stop
/// during the connect yields an empty snapshot.
pub async fn run(config: &ClientConfig, stop: watch::Receiver<bool>) -> Result<MetricsSnapshot> {
    for profile in &config.profiles {
        profile.validate()?;
    }
    let mut stop = stop;

    info!("Connecting to {}...", config.server_addr);
    let stream = tokio::select! {
        biased;
        _ = stop_requested(&mut stop) => {
            warn!("Interrupted while connecting to {}", config.server_addr);
            let mut metrics = MetricsSnapshot::new(Role::Client);
            let now = unix_now();
            metrics.mark_started(now);
            metrics.mark_finished(now);
            return Ok(metrics);
        }
        connected = net::connect(config.server_addr, config.connect_timeout()) => connected?,
    };
    info!("Connected to {}", config.server_addr);

    let mut generator = LoadGenerator::new(stream, config.ack_buffer_size, stop.clone())
        .with_read_timeout(config.read_timeout());

    for (i, profile) in config.profiles.iter().enumerate() {
        if i > 0 {
            tokio::select! {
                _ = time::sleep(config.pause_between_profiles()) => {}
                _ = stop_requested(&mut stop) => {}
            }
        }
        if generator.is_stopped() {
            warn!("Run interrupted, skipping remaining profiles");
            break;
        }
        generator.run(profile).await?;
    }

    let metrics = generator.finish().await;
    info!("Disconnected from {}", config.server_addr);
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio_test::io::Builder;

    fn idle_stop() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    /// In-memory peer that answers every read with the next ack, after an
    /// optional delay.
    fn ack_peer(delay: Duration) -> DuplexStream {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut seq = 0u64;
            loop {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if !delay.is_zero() {
                            time::sleep(delay).await;
                        }
                        seq += 1;
                        if server.write_all(&Ack(seq).to_bytes()).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        client
    }

    #[tokio::test]
    async fn bulk_records_one_latency_per_ack() {
        let stream = Builder::new()
            .write(b"XXXX")
            .read(b"ACK:1")
            .write(b"XXXX")
            .read(b"ACK:2")
            .write(b"XXXX")
            .read(b"ACK:3")
            .build();
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(stream, 1024, stop);

        generator
            .run(&LoadProfile::Bulk {
                message_count: 3,
                message_size: 4,
            })
            .await
            .unwrap();

        assert_eq!(generator.last_ack(), Some(Ack(3)));
        let metrics = generator.metrics();
        assert_eq!(metrics.total_messages, 3);
        assert_eq!(metrics.total_bytes, 12);
        assert_eq!(metrics.failed_messages, 0);
        assert_eq!(metrics.latencies.len(), 3);
        assert_eq!(metrics.timestamps.len(), 3);
        assert!(metrics.duration().is_some());
    }

    #[tokio::test]
    async fn failures_are_counted_and_the_loop_continues() {
        let stream = Builder::new()
            .write(b"XX")
            .read(b"ACK:1")
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .write(b"XX")
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .write(b"XX")
            .read(b"ACK:2")
            .build();
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(stream, 1024, stop);

        generator
            .run(&LoadProfile::Bulk {
                message_count: 4,
                message_size: 2,
            })
            .await
            .unwrap();

        let metrics = generator.metrics();
        assert_eq!(metrics.total_messages, 2);
        assert_eq!(metrics.failed_messages, 2);
        assert_eq!(metrics.attempted(), 4);
        assert_eq!(metrics.latencies.len() as u64, metrics.total_messages);
        assert_eq!(metrics.total_bytes, 4);
    }

    #[tokio::test]
    async fn closed_peer_fails_each_attempt_once() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(client, 1024, stop);

        for _ in 0..3 {
            assert_eq!(generator.cycle(b"data").await, Cycle::Failed);
        }
        assert_eq!(generator.metrics().failed_messages, 3);
        assert_eq!(generator.metrics().total_messages, 0);
    }

    #[tokio::test]
    async fn read_timeout_fails_the_cycle() {
        let (client, _server) = tokio::io::duplex(1024);
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(client, 1024, stop)
            .with_read_timeout(Some(Duration::from_millis(20)));

        assert_eq!(generator.cycle(b"hello").await, Cycle::Failed);
        assert_eq!(generator.metrics().failed_messages, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_holds_the_target_rate() {
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(ack_peer(Duration::ZERO), 1024, stop);

        generator
            .run(&LoadProfile::RateLimited {
                duration_secs: 0.5,
                rate: 50,
                message_size: 16,
            })
            .await
            .unwrap();

        let sent = generator.metrics().total_messages as i64;
        assert!((sent - 25).abs() <= 1, "sent {} messages", sent);
        assert_eq!(generator.metrics().failed_messages, 0);
        assert_eq!(generator.last_ack(), Some(Ack(sent as u64)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_acks_lower_the_rate_without_catch_up() {
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(ack_peer(Duration::from_millis(50)), 1024, stop);

        generator
            .run(&LoadProfile::RateLimited {
                duration_secs: 0.5,
                rate: 100,
                message_size: 16,
            })
            .await
            .unwrap();

        let sent = generator.metrics().total_messages as i64;
        assert!((sent - 10).abs() <= 1, "sent {} messages", sent);
        assert!(generator.metrics().latencies.iter().all(|l| *l >= 0.05));
    }

    #[tokio::test]
    async fn stop_interrupts_an_in_flight_cycle() {
        let (client, _server) = tokio::io::duplex(1024);
        let (stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(client, 1024, stop);

        tokio::spawn(async move {
            time::sleep(Duration::from_millis(20)).await;
            let _ = stop_tx.send(true);
        });

        generator
            .run(&LoadProfile::Bulk {
                message_count: 5,
                message_size: 8,
            })
            .await
            .unwrap();

        let metrics = generator.metrics();
        assert_eq!(metrics.total_messages, 0);
        assert_eq!(metrics.failed_messages, 1);
        assert!(metrics.end_time.is_some());
    }

    #[tokio::test]
    async fn invalid_profiles_are_rejected_without_sending() {
        let (client, mut server) = tokio::io::duplex(1024);
        let (_stop_tx, stop) = idle_stop();
        let mut generator = LoadGenerator::new(client, 1024, stop);

        let unrepresentable = LoadProfile::RateLimited {
            duration_secs: 1e20,
            rate: 10,
            message_size: 8,
        };
        let zero_rate = LoadProfile::RateLimited {
            duration_secs: 1.0,
            rate: 0,
            message_size: 8,
        };
        for profile in [unrepresentable, zero_rate] {
            assert!(matches!(
                generator.run(&profile).await,
                Err(BenchError::Config(_))
            ));
        }

        let metrics = generator.finish().await;
        assert_eq!(metrics.attempted(), 0);
        assert!(metrics.start_time.is_none());

        let mut sent = Vec::new();
        server.read_to_end(&mut sent).await.unwrap();
        assert!(sent.is_empty());
    }
}
