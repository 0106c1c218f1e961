//! 信号处理 - SIGINT/SIGTERM 触发 CancellationToken

use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancel `cancel` on the first SIGINT or SIGTERM
pub fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Signal received, shutting down");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = wait_or_hold(tokio::signal::ctrl_c(), "Ctrl-C") => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM, only Ctrl-C will stop the monitor");
            wait_or_hold(tokio::signal::ctrl_c(), "Ctrl-C").await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_or_hold(tokio::signal::ctrl_c(), "Ctrl-C").await;
}

/// Resolve when `signal` fires; if listening fails, log and never resolve
pub async fn wait_or_hold<F>(signal: F, name: &str)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(signal = %name, error = %e, "Cannot listen for signal, it will not stop the monitor");
        std::future::pending::<()>().await;
    }
}
