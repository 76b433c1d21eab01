//! SIGINT/SIGTERM handling for graceful worker shutdown.

use tokio_util::sync::CancellationToken;

#[cfg(target_family = "unix")]
use tokio::signal::unix::SignalKind;

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(target_family = "unix")]
    let terminate = async {
        match tokio::signal::unix::signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                tracing::error!(%error, "Failed to install the SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(target_family = "unix"))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => (),
        () = terminate => (),
    }
}

/// Returns a token that is cancelled once SIGINT or SIGTERM arrives.
#[must_use]
pub fn shutdown() -> CancellationToken {
    let token = CancellationToken::new();

    {
        let token = token.clone();

        tokio::spawn(async move {
            shutdown_signal().await;
            token.cancel();
        });
    }

    token
}
