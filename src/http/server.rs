//! Connection dispatcher.
//!
//! # Responsibilities
//! - Accept connections until shutdown
//! - Run each connection's handler on a blocking thread
//! - Enforce the execution mode (per-connection or sequential)
//! - Wait, bounded, for open connections once shutdown begins

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::{ExecutionMode, ServerConfig};
use crate::gateway::{Application, GatewayAdapter};
use crate::http::handler::{ConnectionHandler, HandlerConfig};
use crate::lifecycle::{startup, Shutdown};
use crate::net::connection::{ConnectionInfo, ConnectionTracker, Scheme};
use crate::net::listener::{Accepted, ListenError, Listener};
use crate::observability::{EventSink, TracingSink};

/// Back-off after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Listen(#[from] ListenError),
}

/// Serves one application over a bound listener.
pub struct HttpServer {
    adapter: GatewayAdapter,
    config: ServerConfig,
    events: Arc<dyn EventSink>,
    tracker: ConnectionTracker,
}

impl HttpServer {
    pub fn new(app: Arc<dyn Application>, config: ServerConfig) -> Self {
        Self {
            adapter: GatewayAdapter::new(app),
            config,
            events: Arc::new(TracingSink),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Replace the default tracing sink.
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Handle for observing open connections.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Bind the configured listener, then `run`.
    pub async fn serve(self, shutdown: Shutdown) -> Result<(), ServerError> {
        let listener = Listener::bind(&self.config.listener).await?;
        startup::log_startup(listener.local_addr(), listener.is_tls());
        self.run(listener, shutdown).await
    }

    /// Accept and serve connections until `shutdown` is triggered.
    ///
    /// The listener is closed as soon as shutdown begins; open connections
    /// get up to the configured shutdown timeout to finish.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ServerError> {
        let local = listener.local_addr();
        let scheme = if listener.is_tls() { Scheme::Https } else { Scheme::Http };
        let mode = self.config.server.execution;
        let handler_config = Arc::new(HandlerConfig::from_config(
            &self.config,
            mode == ExecutionMode::PerConnection,
        ));

        tracing::info!(address = %local, scheme = %scheme, mode = ?mode, "Gateway server starting");

        let period = self.config.timeouts.poll_interval().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = shutdown.wait() => break,
                _ = ticker.tick() => {
                    if shutdown.is_triggered() {
                        break;
                    }
                    continue;
                }
            };

            let Accepted { stream, peer } = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let guard = self.tracker.track();
            let mut info = ConnectionInfo::new(guard.id(), peer, local, scheme);
            if let Some(name) = &self.config.server.server_name {
                info = info.with_server_name(name.clone());
            }
            tracing::debug!(connection_id = %info.id, peer_addr = %peer, "Connection accepted");

            let handler = ConnectionHandler::new(
                stream,
                info,
                self.adapter.clone(),
                Arc::clone(&handler_config),
                Arc::clone(&self.events),
                shutdown.clone(),
            );
            let task = tokio::task::spawn_blocking(move || {
                let _guard = guard;
                handler.run()
            });

            let watch = async move {
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Connection task failed");
                }
            };
            match mode {
                ExecutionMode::Sequential => watch.await,
                ExecutionMode::PerConnection => {
                    tokio::spawn(watch);
                }
            }
        }

        drop(listener);
        tracing::info!(
            active = self.tracker.active_count(),
            "Listener closed, waiting for open connections"
        );

        let timeout = self.config.timeouts.shutdown();
        if self.tracker.wait_for_idle(timeout).await {
            tracing::info!("Gateway server stopped");
        } else {
            tracing::warn!(
                remaining = self.tracker.active_count(),
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout reached with connections still open"
            );
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpServer")
            .field("execution", &self.config.server.execution)
            .field("active", &self.tracker.active_count())
            .finish_non_exhaustive()
    }
}
