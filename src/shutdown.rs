use std::future;
use tokio::sync::watch;
use tracing::{error, warn};

/// Flips the returned receiver to `true` on the first Ctrl-C.
pub fn listen_for_ctrl_c() -> watch::Receiver<bool> {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            // keep the sender alive so receivers don't read this as a stop
            future::pending::<()>().await;
        }
        warn!("Received Ctrl+C, initiating graceful shutdown...");
        let _ = stop_tx.send(true);
    });
    stop_rx
}

/// Resolves once a stop has been signalled. Never resolves if the sender is
/// gone without signalling.
pub async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let signalled = stop.wait_for(|stopped| *stopped).await.is_ok();
    if !signalled {
        future::pending::<()>().await;
    }
}
