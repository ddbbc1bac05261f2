//! Per-connection request loop.
//!
//! # Responsibilities
//! - Wait for the next request on an idle connection
//! - Parse the head, hand the body to the application, write the response
//! - Drain unread request body bytes so the next request starts clean
//! - Decide whether the connection survives the exchange
//! - Report what happened to the event sink
//!
//! # Design Decisions
//! - Runs synchronously on a blocking thread; the application contract is
//!   a plain call with a blocking body reader
//! - Idle waits poll with a short read timeout so shutdown is noticed promptly
//! - Any head that fails to parse closes the connection after a minimal reply

use std::io::{self, BufRead, BufReader, BufWriter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ServerConfig;
use crate::gateway::{Environ, EnvironConfig, GatewayAdapter};
use crate::http::body::BodyReader;
use crate::http::method::Method;
use crate::http::request::{Limits, ParseError, RequestHead, RequestParser, Version};
use crate::http::response::{write_continue, ResponseContext, ResponseWriter, Status};
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionInfo;
use crate::net::stream::{is_disconnect, is_timeout, Transport};
use crate::observability::{EventSink, ServerEvent};

/// A connection failed below the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Connection timed out")]
    Timeout,

    #[error("Peer closed the connection")]
    Disconnected,

    #[error("Connection I/O failed: {0}")]
    Io(io::Error),
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        if is_timeout(&err) {
            TransportError::Timeout
        } else if is_disconnect(&err) {
            TransportError::Disconnected
        } else {
            TransportError::Io(err)
        }
    }
}

/// Settings shared by every connection of one server.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    pub limits: Limits,
    pub max_drain_bytes: u64,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub environ: EnvironConfig,
}

impl HandlerConfig {
    pub fn from_config(config: &ServerConfig, multithread: bool) -> Self {
        Self {
            limits: Limits::from(&config.limits),
            max_drain_bytes: config.limits.max_drain_bytes,
            idle_timeout: config.timeouts.idle(),
            poll_interval: config.timeouts.poll_interval(),
            environ: EnvironConfig {
                server_software: config.server.server_software.clone(),
                multithread,
            },
        }
    }
}

/// Serves requests on one connection until it closes.
pub struct ConnectionHandler<S: Transport> {
    reader: BufReader<S>,
    info: ConnectionInfo,
    parser: RequestParser,
    adapter: GatewayAdapter,
    config: Arc<HandlerConfig>,
    events: Arc<dyn EventSink>,
    shutdown: Shutdown,
    served: u64,
}

impl<S: Transport> ConnectionHandler<S> {
    pub fn new(
        stream: S,
        info: ConnectionInfo,
        adapter: GatewayAdapter,
        config: Arc<HandlerConfig>,
        events: Arc<dyn EventSink>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            reader: BufReader::new(stream),
            parser: RequestParser::new(config.limits),
            info,
            adapter,
            config,
            events,
            shutdown,
            served: 0,
        }
    }

    /// Serve until the connection closes. Returns the number of responses sent.
    pub fn run(mut self) -> Result<u64, TransportError> {
        let result = self.serve();
        if let Err(e) = &result {
            self.events.report(&ServerEvent::ConnectionDropped {
                connection_id: self.info.id,
                peer: self.info.peer,
                detail: e.to_string(),
            });
        }
        if let Err(e) = self.reader.get_mut().shutdown() {
            tracing::trace!(connection_id = %self.info.id, error = %e, "Shutdown after close failed");
        }
        tracing::debug!(
            connection_id = %self.info.id,
            peer_addr = %self.info.peer,
            requests = self.served,
            "Connection finished"
        );
        result.map(|()| self.served)
    }

    fn serve(&mut self) -> Result<(), TransportError> {
        loop {
            if !self.wait_for_request()? {
                return Ok(());
            }
            if !self.handle_request()? {
                return Ok(());
            }
            self.parser.reset();
        }
    }

    /// Block until the first byte of a request arrives.
    ///
    /// Returns `false` when the connection should close instead: the peer
    /// hung up, the idle timeout passed, or shutdown began.
    fn wait_for_request(&mut self) -> Result<bool, TransportError> {
        if !self.reader.buffer().is_empty() {
            return Ok(true);
        }

        let deadline = Instant::now() + self.config.idle_timeout;
        self.reader
            .get_mut()
            .set_read_timeout(Some(self.config.poll_interval))?;

        loop {
            match self.reader.fill_buf() {
                Ok([]) => return Ok(false),
                Ok(_) => break,
                Err(e) if is_timeout(&e) => {
                    if self.shutdown.is_triggered() {
                        tracing::debug!(connection_id = %self.info.id, "Closing idle connection for shutdown");
                        return Ok(false);
                    }
                    if Instant::now() >= deadline {
                        tracing::debug!(connection_id = %self.info.id, "Idle timeout");
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if is_disconnect(&e) && self.served > 0 => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }

        self.reader
            .get_mut()
            .set_read_timeout(Some(self.config.idle_timeout))?;
        Ok(true)
    }

    /// One request/response exchange. Returns whether to keep the connection.
    fn handle_request(&mut self) -> Result<bool, TransportError> {
        let started = Instant::now();
        let head = match self.parser.parse(&mut self.reader) {
            Ok(Some(head)) => head,
            Ok(None) => return Ok(false),
            Err(ParseError::Io(e)) => return Err(e.into()),
            Err(e) => {
                self.reject(&e)?;
                return Ok(false);
            }
        };

        tracing::trace!(
            connection_id = %self.info.id,
            method = %head.method,
            target = %head.target,
            "Request head parsed"
        );

        if head.expect_continue {
            write_continue(self.reader.get_mut())?;
        }

        let (invocation, drained) = {
            let mut body = BodyReader::new(&mut self.reader, head.framing);
            let chunked = body.is_chunked();
            let environ = Environ::new(&head, &self.info, &self.config.environ, &mut body, chunked);
            let invocation = self.adapter.call(environ);
            let drained = match body.drain(self.config.max_drain_bytes) {
                Ok(complete) => complete,
                Err(e) => {
                    tracing::debug!(connection_id = %self.info.id, error = %e, "Request body unreadable");
                    false
                }
            };
            (invocation, drained)
        };
        self.parser.body_consumed();
        if !drained {
            tracing::debug!(connection_id = %self.info.id, "Request body not drained; closing after response");
        }

        let ctx = ResponseContext {
            version: head.version,
            method: head.method,
            keep_alive: head.keep_alive && drained,
            server_software: &self.config.environ.server_software,
        };
        let outcome = {
            let mut out = BufWriter::new(self.reader.get_mut());
            let mut writer = ResponseWriter::new(&mut out, ctx);
            let outcome = self.adapter.respond(invocation, &mut writer)?;
            io::Write::flush(&mut out)?;
            outcome
        };
        self.served += 1;

        if let Some(failure) = &outcome.failure {
            self.events.report(&ServerEvent::ApplicationError {
                connection_id: self.info.id,
                peer: self.info.peer,
                detail: failure.detail.clone(),
                headers_sent: failure.headers_sent,
            });
        }
        for violation in &outcome.violations {
            self.events.report(&ServerEvent::ProtocolViolation {
                connection_id: self.info.id,
                peer: self.info.peer,
                detail: violation.clone(),
            });
        }
        self.report_access(&head, outcome.status.unwrap_or(500), outcome.bytes, started);

        Ok(outcome.keep_alive)
    }

    /// Answer an unparseable head with a minimal response.
    fn reject(&mut self, err: &ParseError) -> Result<(), TransportError> {
        let status = Status::from_code(err.status());
        self.events.report(&ServerEvent::ParseFailure {
            connection_id: self.info.id,
            peer: self.info.peer,
            status: status.code(),
            detail: err.to_string(),
        });

        let ctx = ResponseContext {
            version: Version::Http11,
            method: Method::Get,
            keep_alive: false,
            server_software: &self.config.environ.server_software,
        };
        let body = format!("{}\n", status.reason());
        let mut out = BufWriter::new(self.reader.get_mut());
        ResponseWriter::new(&mut out, ctx).write_simple(&status, body.as_bytes())?;
        io::Write::flush(&mut out)?;
        Ok(())
    }

    fn report_access(&self, head: &RequestHead, status: u16, bytes: u64, started: Instant) {
        self.events.report(&ServerEvent::Access {
            connection_id: self.info.id,
            peer: self.info.peer,
            method: head.method.as_str().to_string(),
            target: head.target.clone(),
            version: head.version.as_str().to_string(),
            status,
            bytes,
            elapsed: started.elapsed(),
        });
    }
}
