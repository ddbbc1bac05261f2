//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept, blocking hand-off)
//!     → tls.rs (optional TLS session, handshake on first I/O)
//!     → stream.rs (Transport seen by the connection handler)
//!     → connection.rs (identity, lifecycle tracking)
//!     → Hand off to HTTP layer
//! ```

pub mod connection;
pub mod listener;
pub mod stream;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionInfo, ConnectionTracker, Scheme};
pub use listener::{Accepted, ListenError, Listener};
pub use stream::{ServerStream, Transport};
pub use tls::{AdhocCertificate, TlsAcceptor, TlsError};
