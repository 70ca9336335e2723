use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Install a handler that turns SIGINT or SIGTERM into an abort.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. The process multiplexer watches it and tears down every running
/// command before returning.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}
