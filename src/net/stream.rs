//! Blocking byte streams handed to connection handlers.
//!
//! The dispatcher accepts on a tokio listener, then converts each socket into
//! a blocking `std::net::TcpStream` so the handler can drive plain `Read` and
//! `Write` calls from its own execution context. TLS sits transparently on top.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use rustls::{ServerConnection, StreamOwned};

/// What a connection handler needs from its stream beyond `Read + Write`.
pub trait Transport: Read + Write + Send {
    /// Bound the next blocking read; `None` waits forever.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Flush and close the write side so the peer sees end-of-stream.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// An accepted connection, plain or TLS.
pub enum ServerStream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl ServerStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, ServerStream::Tls(_))
    }

    fn socket(&self) -> &TcpStream {
        match self {
            ServerStream::Plain(sock) => sock,
            ServerStream::Tls(tls) => &tls.sock,
        }
    }
}

impl Read for ServerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ServerStream::Plain(sock) => sock.read(buf),
            ServerStream::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for ServerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ServerStream::Plain(sock) => sock.write(buf),
            ServerStream::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ServerStream::Plain(sock) => sock.flush(),
            ServerStream::Tls(tls) => tls.flush(),
        }
    }
}

impl Transport for ServerStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket().set_read_timeout(timeout)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        if let ServerStream::Tls(tls) = self {
            let tls = &mut **tls;
            tls.conn.send_close_notify();
            // Best effort: the peer may already be gone.
            let _ = tls.conn.complete_io(&mut tls.sock);
        }
        self.flush()?;
        self.socket().shutdown(Shutdown::Write)
    }
}

impl std::fmt::Debug for ServerStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = if self.is_tls() { "tls" } else { "plain" };
        f.debug_struct("ServerStream")
            .field("kind", &kind)
            .field("peer", &self.socket().peer_addr().ok())
            .finish()
    }
}

/// Whether an I/O error is a read timeout rather than a real failure.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// Whether an I/O error means the peer went away.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
    )
}
