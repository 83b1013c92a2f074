use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Setup shutdown signal handler (Ctrl+C / SIGTERM)
pub async fn shutdown_signal(shutdown_token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(err), _) | (_, Err(err)) => {
                    error!(error = %err, "Failed to register shutdown signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Shutdown signal received (SIGTERM)");
            }
            _ = sigint.recv() => {
                info!("Shutdown signal received (SIGINT/Ctrl+C)");
            }
            _ = shutdown_token.cancelled() => return,
        }

        shutdown_token.cancel();
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    info!("Shutdown signal received (Ctrl+C)");
                    shutdown_token.cancel();
                }
                Err(err) => {
                    error!(error = %err, "Failed to listen for shutdown signal");
                }
            },
            _ = shutdown_token.cancelled() => {}
        }
    }
}
