//! Graceful shutdown utilities
//!
//! Provides unified shutdown signal handling for all services.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Wait for shutdown signal (Ctrl+C or SIGTERM on Unix)
///
/// This function blocks until a shutdown signal is received:
/// - On Unix: Ctrl+C (SIGINT) or SIGTERM
/// - On Windows: Ctrl+C only
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term_signal = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Gateway will only respond to Ctrl+C",
                    e
                );
                None
            },
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(mut sig) = term_signal {
                    sig.recv().await;
                } else {
                    std::future::pending::<()>().await
                }
            } => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Cancel `token` once a shutdown signal arrives
///
/// The listener task also ends quietly if the token is cancelled by someone else first.
///
/// # Example
///
/// ```ignore
/// let shutdown = CancellationToken::new();
/// common::shutdown::spawn_signal_listener(shutdown.clone());
/// gateway.run(shutdown).await?;
/// ```
pub fn spawn_signal_listener(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                token.cancel();
            },
            _ = token.cancelled() => {},
        }
    })
}

/// Cancel `token` and wait for the listener task to finish
///
/// Returns `false` when the task panicked or was aborted.
pub async fn stop_signal_listener(
    token: &CancellationToken,
    handle: tokio::task::JoinHandle<()>,
) -> bool {
    token.cancel();
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Signal listener ended abnormally: {}", e);
            false
        },
    }
}
