//! TCP listener implementation.
//!
//! # Responsibilities
//! - Resolve the configured host and pick an address family
//! - Bind with the configured reuse-address policy and backlog
//! - Accept incoming TCP connections
//! - Wrap accepted sockets in TLS when configured

use std::io;
use std::net::{Ipv6Addr, SocketAddr};
use std::path::Path;

use tokio::net::{TcpListener, TcpSocket};

use crate::config::{AddressFamily, ListenerConfig};
use crate::net::stream::ServerStream;
use crate::net::tls::{load_tls_config, AdhocCertificate, TlsAcceptor, TlsError};

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenError {
    /// The host did not resolve to a usable address.
    #[error("Invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },
    /// Another socket already owns the address.
    #[error("Address {addr} is already in use")]
    AddrInUse { addr: SocketAddr },
    /// The process may not bind the address (e.g., privileged port).
    #[error("Permission denied binding {addr}")]
    PermissionDenied { addr: SocketAddr },
    /// Any other bind failure.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// TLS material could not be loaded.
    #[error(transparent)]
    Tls(#[from] TlsError),
    /// Failed to accept or prepare a connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] io::Error),
}

/// A connection returned by [`Listener::accept`].
#[derive(Debug)]
pub struct Accepted {
    pub stream: ServerStream,
    pub peer: SocketAddr,
}

/// The listening socket, optionally upgrading accepted connections to TLS.
pub struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to the configured address.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenError> {
        let tls = match &config.tls {
            Some(tls) => {
                let server_config =
                    load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path))?;
                Some(TlsAcceptor::new(server_config))
            }
            None if config.adhoc_tls => {
                let cert = AdhocCertificate::generate(adhoc_common_name(&config.host))?;
                Some(TlsAcceptor::new(cert.server_config()?))
            }
            None => None,
        };

        let addr = resolve(config).await?;
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|source| ListenError::Bind { addr, source })?;

        socket
            .set_reuseaddr(config.reuse_address)
            .map_err(|source| ListenError::Bind { addr, source })?;
        socket.bind(addr).map_err(|e| bind_error(addr, e))?;
        let inner = socket
            .listen(config.backlog)
            .map_err(|e| bind_error(addr, e))?;

        let local_addr = inner
            .local_addr()
            .map_err(|source| ListenError::Bind { addr, source })?;

        tracing::info!(
            address = %local_addr,
            tls = tls.is_some(),
            backlog = config.backlog,
            "Listener bound"
        );

        Ok(Self {
            inner,
            tls,
            local_addr,
        })
    }

    /// Wait for the next peer and hand back a blocking stream for it.
    pub async fn accept(&self) -> Result<Accepted, ListenError> {
        let (socket, peer) = self.inner.accept().await.map_err(ListenError::Accept)?;

        let socket = socket.into_std().map_err(ListenError::Accept)?;
        socket.set_nonblocking(false).map_err(ListenError::Accept)?;
        socket.set_nodelay(true).map_err(ListenError::Accept)?;

        let stream = match &self.tls {
            Some(acceptor) => ServerStream::Tls(Box::new(acceptor.wrap(socket).map_err(|e| {
                ListenError::Accept(io::Error::new(io::ErrorKind::Other, e))
            })?)),
            None => ServerStream::Plain(socket),
        };

        tracing::debug!(peer_addr = %peer, tls = stream.is_tls(), "Connection accepted");
        Ok(Accepted { stream, peer })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Whether accepted connections are wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Wildcard binds have no meaningful name; fall back to `localhost`.
fn adhoc_common_name(host: &str) -> &str {
    match host.trim_start_matches('[').trim_end_matches(']') {
        "" | "0.0.0.0" | "::" => "localhost",
        host => host,
    }
}

fn bind_error(addr: SocketAddr, source: io::Error) -> ListenError {
    match source.kind() {
        io::ErrorKind::AddrInUse => ListenError::AddrInUse { addr },
        io::ErrorKind::PermissionDenied => ListenError::PermissionDenied { addr },
        _ => ListenError::Bind { addr, source },
    }
}

/// Resolve the configured host to the one address we bind, honoring the
/// family policy.
async fn resolve(config: &ListenerConfig) -> Result<SocketAddr, ListenError> {
    let host = config.host.trim_start_matches('[').trim_end_matches(']');

    if config.address_family == AddressFamily::Dual && (host == "0.0.0.0" || host == "::") {
        return Ok(SocketAddr::from((Ipv6Addr::UNSPECIFIED, config.port)));
    }

    let address = config.bind_address();
    let invalid = |reason: String| ListenError::InvalidAddress {
        address: address.clone(),
        reason,
    };

    let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address.as_str())
        .await
        .map_err(|e| invalid(e.to_string()))?
        .collect();

    let wants_v6 = match config.address_family {
        AddressFamily::Auto => host.contains(':'),
        AddressFamily::Ipv4 => false,
        AddressFamily::Ipv6 | AddressFamily::Dual => true,
    };

    let preferred = candidates.iter().find(|a| a.is_ipv6() == wants_v6).copied();
    match (preferred, config.address_family) {
        (Some(addr), _) => Ok(addr),
        (None, AddressFamily::Auto) => candidates
            .first()
            .copied()
            .ok_or_else(|| invalid("host resolved to no addresses".into())),
        (None, family) => Err(invalid(format!(
            "host has no {} address",
            if family == AddressFamily::Ipv4 { "IPv4" } else { "IPv6" }
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(port: u16) -> ListenerConfig {
        ListenerConfig {
            host: "127.0.0.1".into(),
            port,
            ..ListenerConfig::default()
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let listener = Listener::bind(&loopback(0)).await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
        assert!(listener.local_addr().is_ipv4());
        assert!(!listener.is_tls());
    }

    #[tokio::test]
    async fn address_in_use_is_fatal() {
        let mut config = loopback(0);
        config.reuse_address = false;
        let first = Listener::bind(&config).await.unwrap();

        config.port = first.local_addr().port();
        let err = Listener::bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenError::AddrInUse { .. }), "got {err}");
    }

    #[tokio::test]
    async fn ipv4_policy_rejects_ipv6_literal() {
        let config = ListenerConfig {
            host: "::1".into(),
            port: 0,
            address_family: AddressFamily::Ipv4,
            ..ListenerConfig::default()
        };
        let err = Listener::bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn missing_tls_material_fails_before_binding() {
        let config = ListenerConfig {
            tls: Some(crate::config::TlsConfig {
                cert_path: "/no/such/cert.pem".into(),
                key_path: "/no/such/key.pem".into(),
            }),
            ..loopback(0)
        };
        let err = Listener::bind(&config).await.unwrap_err();
        assert!(matches!(err, ListenError::Tls(TlsError::CertificateNotFound(_))));
    }

    #[tokio::test]
    async fn adhoc_tls_wraps_accepted_connections() {
        let config = ListenerConfig {
            adhoc_tls: true,
            ..loopback(0)
        };
        let listener = Listener::bind(&config).await.unwrap();
        assert!(listener.is_tls());

        let addr = listener.local_addr();
        let client = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await });
        let accepted = listener.accept().await.unwrap();
        client.await.unwrap().unwrap();
        assert!(accepted.stream.is_tls());
    }

    #[test]
    fn adhoc_name_for_wildcard_hosts() {
        assert_eq!(adhoc_common_name("0.0.0.0"), "localhost");
        assert_eq!(adhoc_common_name("[::]"), "localhost");
        assert_eq!(adhoc_common_name("example.test"), "example.test");
    }

    #[tokio::test]
    async fn accept_returns_blocking_plain_stream() {
        let listener = Listener::bind(&loopback(0)).await.unwrap();
        let addr = listener.local_addr();

        let client = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await });
        let accepted = listener.accept().await.unwrap();
        let client = client.await.unwrap().unwrap();

        assert!(!accepted.stream.is_tls());
        assert_eq!(accepted.peer, client.local_addr().unwrap());
    }
}
