//! Signal handling for graceful agent shutdown.
//!
//! The agent never exits on its own once it is online; a termination signal
//! is the only way to ask it to disconnect and stop.

use tokio::signal;
use tracing::info;

/// Resolves once a termination signal arrives.
///
/// The caller turns this into a stop request; the supervisor then finishes
/// any in-flight attempt, disconnects and returns.
///
/// # Platform Support
///
/// * **Unix**: SIGINT and SIGTERM
/// * **Windows**: Ctrl+C
///
/// # Returns
///
/// `Ok(())` when a signal is received, or the I/O error raised while
/// installing the handlers.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
