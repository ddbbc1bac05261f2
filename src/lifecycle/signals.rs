//! OS signal handling.
//!
//! SIGTERM and SIGINT (Ctrl-C elsewhere) trigger graceful shutdown. A second
//! signal while draining exits the process immediately.

use std::io;

use crate::lifecycle::shutdown::Shutdown;

/// Spawn a task that turns OS signals into `shutdown.trigger()`.
pub fn install(shutdown: Shutdown) -> io::Result<tokio::task::JoinHandle<()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
                _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
            }
            shutdown.trigger();

            tokio::select! {
                _ = sigterm.recv() => {}
                _ = sigint.recv() => {}
            }
            tracing::warn!("Second signal received, exiting immediately");
            std::process::exit(130);
        }))
    }

    #[cfg(not(unix))]
    {
        Ok(tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::error!("Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown.trigger();

            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Second signal received, exiting immediately");
                std::process::exit(130);
            }
        }))
    }
}
