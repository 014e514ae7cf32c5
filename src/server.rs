// server.rs - serve loop with bounded graceful shutdown

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::app::{router, AppState};

/// Exit code used when shutdown overruns its bound
const FORCED_EXIT_CODE: i32 = 1;

/// Serve until `shutdown` completes, then close storage connections.
///
/// Once the signal fires a watchdog is armed; if draining requests and
/// closing connections takes longer than the configured shutdown timeout
/// the process exits with status 1.
pub async fn run<F>(state: AppState, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let timeout = state.config.lifecycle.shutdown_timeout();
    let (armed_tx, armed_rx) = oneshot::channel::<()>();

    let watchdog = tokio::spawn(async move {
        if armed_rx.await.is_ok() {
            force_exit_after(timeout).await;
        }
    });

    let signal = async move {
        shutdown.await;
        tracing::info!("Shutdown requested, draining in-flight requests");
        let _ = armed_tx.send(());
    };

    let app = router(state.clone());
    let served = axum::serve(listener, app).with_graceful_shutdown(signal).await;

    state.shutdown().await;
    watchdog.abort();

    served?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn force_exit_after(timeout: Duration) {
    tokio::time::sleep(timeout).await;
    tracing::error!(
        "Graceful shutdown did not finish within {}s, forcing exit",
        timeout.as_secs()
    );
    std::process::exit(FORCED_EXIT_CODE);
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT (Ctrl+C)"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}
