//! Signal handling for graceful shutdown.
//!
//! Waits for SIGINT/SIGTERM on unix and Ctrl+C on windows.

use tokio::signal;
use tracing::info;

/// Returns once a termination signal has been received.
pub async fn wait_for_shutdown_signal() -> Result<(), Box<dyn std::error::Error>> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    info!("📡 Received shutdown signal - unloading plugins");
    Ok(())
}
