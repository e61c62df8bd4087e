use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Returns a `CancellationToken` cancelled on SIGTERM or ctrl-c.
///
/// The lease supervisor, health monitor, and dashboard watch this token
/// and drain cleanly; benches held by running jobs are reclaimed on the
/// next startup from the inventory file.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Failed to listen for ctrl-c");
                }
                tracing::info!("Received interrupt, shutting down");
            }
        }

        handler_token.cancel();
    });

    token
}
