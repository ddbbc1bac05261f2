//! Server events and the sink that receives them.
//!
//! Handlers never format log lines themselves; they `report` an event and the
//! installed sink decides what to do with it.

use std::net::SocketAddr;
use std::time::Duration;

use crate::net::connection::ConnectionId;
use crate::observability::metrics;

/// Something worth recording about a connection or request.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// One completed request/response cycle.
    Access {
        connection_id: ConnectionId,
        peer: SocketAddr,
        method: String,
        target: String,
        version: String,
        status: u16,
        bytes: u64,
        elapsed: Duration,
    },
    /// A request head was rejected.
    ParseFailure {
        connection_id: ConnectionId,
        peer: SocketAddr,
        status: u16,
        detail: String,
    },
    /// The application failed or panicked.
    ApplicationError {
        connection_id: ConnectionId,
        peer: SocketAddr,
        detail: String,
        headers_sent: bool,
    },
    /// The application's output did not match its own framing.
    ProtocolViolation {
        connection_id: ConnectionId,
        peer: SocketAddr,
        detail: String,
    },
    /// The connection failed at the transport level.
    ConnectionDropped {
        connection_id: ConnectionId,
        peer: SocketAddr,
        detail: String,
    },
}

/// Receiver of server events.
pub trait EventSink: Send + Sync {
    fn report(&self, event: &ServerEvent);
}

/// Default sink: structured `tracing` events plus metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn report(&self, event: &ServerEvent) {
        match event {
            ServerEvent::Access {
                connection_id,
                peer,
                method,
                target,
                version,
                status,
                bytes,
                elapsed,
            } => {
                metrics::record_request(method, *status, *elapsed);
                tracing::info!(
                    target: "gateway_server::access",
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    method = %method,
                    path = %target,
                    status = status,
                    bytes = bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "\"{method} {target} {version}\" {status} {bytes}"
                );
            }
            ServerEvent::ParseFailure {
                connection_id,
                peer,
                status,
                detail,
            } => {
                metrics::record_parse_error(*status);
                tracing::warn!(
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    status = status,
                    error = %detail,
                    "Rejected request"
                );
            }
            ServerEvent::ApplicationError {
                connection_id,
                peer,
                detail,
                headers_sent,
            } => {
                metrics::record_app_error(*headers_sent);
                tracing::error!(
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    headers_sent = headers_sent,
                    error = %detail,
                    "Application error"
                );
            }
            ServerEvent::ProtocolViolation {
                connection_id,
                peer,
                detail,
            } => {
                tracing::warn!(
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    error = %detail,
                    "Response framing violation"
                );
            }
            ServerEvent::ConnectionDropped {
                connection_id,
                peer,
                detail,
            } => {
                tracing::debug!(
                    connection_id = %connection_id,
                    peer_addr = %peer,
                    error = %detail,
                    "Connection dropped"
                );
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_sink_accepts_every_event() {
        let sink = TracingSink;
        let connection_id = ConnectionId::new();
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();

        sink.report(&ServerEvent::Access {
            connection_id,
            peer,
            method: "GET".into(),
            target: "/".into(),
            version: "HTTP/1.1".into(),
            status: 200,
            bytes: 2,
            elapsed: Duration::from_millis(1),
        });
        sink.report(&ServerEvent::ParseFailure {
            connection_id,
            peer,
            status: 400,
            detail: "bad".into(),
        });
        sink.report(&ServerEvent::ApplicationError {
            connection_id,
            peer,
            detail: "boom".into(),
            headers_sent: false,
        });
    }
}
