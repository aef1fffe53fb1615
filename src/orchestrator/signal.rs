use tracing::{info, warn};

/// Resolve on the first operator interrupt: Ctrl-C, or SIGTERM on Unix.
///
/// If no handler can be installed this never resolves and the fleet runs until its
/// subscribers exit on their own.
pub(crate) async fn interrupted() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => on_ctrl_c(res).await,
                    _ = term.recv() => info!("SIGTERM received"),
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                on_ctrl_c(tokio::signal::ctrl_c().await).await;
            }
        }
    }
    #[cfg(not(unix))]
    on_ctrl_c(tokio::signal::ctrl_c().await).await;
}

async fn on_ctrl_c(res: std::io::Result<()>) {
    match res {
        Ok(()) => info!("interrupted by user"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C: {e}");
            futures::future::pending::<()>().await;
        }
    }
}
