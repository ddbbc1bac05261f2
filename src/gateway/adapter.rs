//! Drives one application invocation and streams its output.
//!
//! # Responsibilities
//! - Call the application with a fresh environ and `start_response`
//! - Commit the response head at the first non-empty chunk
//! - Pull body chunks lazily and hand them to the response writer
//! - Turn application failures into a generic 500 or a truncated response
//!
//! # Design Decisions
//! - Invocation and response are two steps so the handler can drain the
//!   request body in between (the environ borrows it)
//! - Panics in application code are caught and treated as errors

use std::any::Any;
use std::io::{self, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::gateway::application::{AppError, Application, Body};
use crate::gateway::environ::Environ;
use crate::gateway::start_response::{GatewayError, StartResponse};
use crate::http::response::{ResponseWriter, Status};

const INTERNAL_ERROR_BODY: &[u8] = b"Internal Server Error\n";

/// The result of calling the application, before anything is written.
pub struct Invocation {
    start_response: StartResponse,
    result: Result<Body, AppError>,
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("ok", &self.result.is_ok())
            .finish_non_exhaustive()
    }
}

/// An application failure, with full detail for the logs only.
#[derive(Debug, Clone)]
pub struct AppFailure {
    pub detail: String,
    /// The response head was already on the wire.
    pub headers_sent: bool,
    /// The application broke the invocation contract.
    pub protocol: bool,
}

/// What happened while writing a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseOutcome {
    pub status: Option<u16>,
    pub bytes: u64,
    pub keep_alive: bool,
    pub failure: Option<AppFailure>,
    /// Framing problems the writer worked around (excess or missing bytes).
    pub violations: Vec<String>,
}

/// Bridges the server to one hosted application.
#[derive(Clone)]
pub struct GatewayAdapter {
    app: Arc<dyn Application>,
}

impl GatewayAdapter {
    pub fn new(app: Arc<dyn Application>) -> Self {
        Self { app }
    }

    /// Call the application. Nothing is written yet.
    pub fn call(&self, environ: Environ<'_>) -> Invocation {
        let start_response = StartResponse::new();
        let handle = start_response.clone();
        let result = match catch_unwind(AssertUnwindSafe(|| self.app.call(environ, handle))) {
            Ok(result) => result,
            Err(panic) => Err(panic_error(panic)),
        };
        Invocation {
            start_response,
            result,
        }
    }

    /// Write the application's response through `writer`.
    ///
    /// Only I/O errors on the connection are returned; application failures
    /// are recorded in the outcome.
    pub fn respond<W: Write>(
        &self,
        invocation: Invocation,
        writer: &mut ResponseWriter<'_, W>,
    ) -> io::Result<ResponseOutcome> {
        let Invocation {
            start_response,
            result,
        } = invocation;
        let mut outcome = ResponseOutcome::default();

        let body = match result {
            Ok(body) => body,
            Err(error) => {
                fail_before_commit(writer, error, &mut outcome)?;
                return Ok(finish_outcome(writer, outcome));
            }
        };

        match body {
            Body::Empty => {
                let known = start_response.queued_len();
                if let Err(e) = commit(&start_response, writer, Some(known))? {
                    fail_before_commit(writer, Box::new(e), &mut outcome)?;
                    return Ok(finish_outcome(writer, outcome));
                }
                flush_writes(&start_response, writer)?;
                writer.finish()?;
            }
            Body::Full(bytes) => {
                let known = start_response.queued_len() + bytes.len() as u64;
                if let Err(e) = commit(&start_response, writer, Some(known))? {
                    fail_before_commit(writer, Box::new(e), &mut outcome)?;
                    return Ok(finish_outcome(writer, outcome));
                }
                flush_writes(&start_response, writer)?;
                writer.write_chunk(&bytes)?;
                writer.finish()?;
            }
            Body::Stream(mut chunks) => loop {
                let next = match catch_unwind(AssertUnwindSafe(|| chunks.next())) {
                    Ok(next) => next,
                    Err(panic) => Some(Err(panic_error(panic))),
                };
                match next {
                    Some(Ok(chunk)) => {
                        if chunk.is_empty() && !writer.is_started() {
                            continue;
                        }
                        if !writer.is_started() {
                            if let Err(e) = commit(&start_response, writer, None)? {
                                drop(chunks);
                                fail_before_commit(writer, Box::new(e), &mut outcome)?;
                                return Ok(finish_outcome(writer, outcome));
                            }
                        }
                        flush_writes(&start_response, writer)?;
                        writer.write_chunk(&chunk)?;
                    }
                    Some(Err(error)) => {
                        drop(chunks);
                        if writer.is_started() {
                            outcome.failure = Some(AppFailure {
                                detail: error.to_string(),
                                headers_sent: true,
                                protocol: is_protocol_error(&error),
                            });
                            writer.abort()?;
                        } else {
                            fail_before_commit(writer, error, &mut outcome)?;
                        }
                        return Ok(finish_outcome(writer, outcome));
                    }
                    None => {
                        drop(chunks);
                        if !writer.is_started() {
                            let known = start_response.queued_len();
                            if let Err(e) = commit(&start_response, writer, Some(known))? {
                                fail_before_commit(writer, Box::new(e), &mut outcome)?;
                                return Ok(finish_outcome(writer, outcome));
                            }
                        }
                        flush_writes(&start_response, writer)?;
                        writer.finish()?;
                        break;
                    }
                }
            },
        }

        if writer.excess_bytes() > 0 {
            outcome.violations.push(format!(
                "application produced {} bytes beyond its Content-Length",
                writer.excess_bytes()
            ));
        }
        if writer.is_short() {
            outcome.violations.push(format!(
                "application produced {} bytes, less than its Content-Length",
                writer.bytes_written()
            ));
        }
        Ok(finish_outcome(writer, outcome))
    }
}

impl std::fmt::Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayAdapter").finish_non_exhaustive()
    }
}

/// Write the registered head. The outer error is the connection failing; the
/// inner one is the application never having called `start_response`.
fn commit<W: Write>(
    start_response: &StartResponse,
    writer: &mut ResponseWriter<'_, W>,
    known_length: Option<u64>,
) -> io::Result<Result<(), GatewayError>> {
    let head = match start_response.commit() {
        Ok(head) => head,
        Err(e) => return Ok(Err(e)),
    };
    writer.start(&head.status, &head.headers, known_length)?;
    Ok(Ok(()))
}

fn flush_writes<W: Write>(
    start_response: &StartResponse,
    writer: &mut ResponseWriter<'_, W>,
) -> io::Result<()> {
    for queued in start_response.take_writes() {
        writer.write_chunk(&queued)?;
    }
    Ok(())
}

/// Replace whatever the application intended with a generic 500.
fn fail_before_commit<W: Write>(
    writer: &mut ResponseWriter<'_, W>,
    error: AppError,
    outcome: &mut ResponseOutcome,
) -> io::Result<()> {
    let protocol = is_protocol_error(&error);
    outcome.failure = Some(AppFailure {
        detail: error.to_string(),
        headers_sent: false,
        protocol,
    });
    if protocol {
        writer.force_close();
    }
    writer.write_simple(&Status::from_code(500), INTERNAL_ERROR_BODY)
}

fn finish_outcome<W: Write>(writer: &ResponseWriter<'_, W>, mut outcome: ResponseOutcome) -> ResponseOutcome {
    outcome.status = writer.status();
    outcome.bytes = writer.bytes_written();
    outcome.keep_alive = writer.keep_alive();
    outcome
}

fn is_protocol_error(error: &AppError) -> bool {
    error.downcast_ref::<GatewayError>().is_some()
}

fn panic_error(panic: Box<dyn Any + Send>) -> AppError {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("application panicked: {message}").into()
}
