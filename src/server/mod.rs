mod session;

pub use session::{CloseReason, ConnectionHandler, Session};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::metrics::{MetricsCollector, MetricsSnapshot, Role};
use crate::net::bind_listener;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing::{debug, error, info, warn};

/// Accept loop. Spawns one handler task per connection, all feeding a shared
/// collector.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    collector: MetricsCollector,
    limiter: Option<Arc<Semaphore>>,
}

impl Server {
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let listener = bind_listener(config.listen_addr, config.backlog)?;
        let local_addr = listener.local_addr()?;
        let limiter = config
            .max_connections
            .map(|limit| Arc::new(Semaphore::new(limit)));

        Ok(Self {
            listener,
            local_addr,
            config,
            collector: MetricsCollector::new(Role::Server),
            limiter,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn collector(&self) -> MetricsCollector {
        self.collector.clone()
    }

    /// Serves until `shutdown` resolves, then drains open connections for up
    /// to the configured grace period and returns the final metrics.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> MetricsSnapshot {
        info!("Listening on {}", self.local_addr);
        match self.config.max_connections {
            Some(limit) => info!("Serving at most {} connections at once", limit),
            None => debug!("Connection count is unbounded"),
        }
        self.collector.mark_started().await;

        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            let permit = match &self.limiter {
                Some(limiter) => tokio::select! {
                    _ = &mut shutdown => break,
                    permit = limiter.clone().acquire_owned() => permit.ok(),
                },
                None => None,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let id = self.collector.register_connection().await;
                        info!("Connection {} from {}", id, peer);

                        let handler = ConnectionHandler::new(
                            socket,
                            Session::new(id, peer),
                            self.collector.clone(),
                            self.config.recv_buffer_size,
                            self.config.read_timeout(),
                        );
                        handlers.spawn(async move {
                            let outcome = handler.run().await;
                            drop(permit);
                            outcome
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }

            while let Some(finished) = handlers.try_join_next() {
                log_handler_exit(finished);
            }
        }

        info!("Shutting down...");
        drop(self.listener);

        if !handlers.is_empty() {
            let grace = self.config.shutdown_grace();
            info!(
                "Waiting up to {:?} for {} open connections",
                grace,
                handlers.len()
            );
            let drained = time::timeout(grace, async {
                while let Some(finished) = handlers.join_next().await {
                    log_handler_exit(finished);
                }
            })
            .await;

            if drained.is_err() {
                warn!("Closing {} connections still open", handlers.len());
                handlers.shutdown().await;
            }
        }

        self.collector.mark_finished().await;
        self.collector.snapshot().await
    }
}

fn log_handler_exit(finished: std::result::Result<(Session, CloseReason), JoinError>) {
    match finished {
        Ok((session, reason)) => debug!(
            "Handler for connection {} exited: {:?}",
            session.id, reason
        ),
        Err(e) if e.is_cancelled() => {}
        Err(e) => error!("Connection handler panicked: {}", e),
    }
}
