//! The `start_response` handle given to applications.
//!
//! # Design Decisions
//! - The handle is shared between the application and the adapter; the
//!   adapter decides when the pending head is committed to the wire
//! - Validation happens at call time so a bad header never reaches the writer

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;

use crate::gateway::application::AppError;
use crate::gateway::util::is_hop_by_hop;
use crate::http::method::is_token;
use crate::http::response::Status;

/// Violations of the invocation contract.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid status line: {0:?}")]
    InvalidStatus(String),
    #[error("Hop-by-hop header not allowed: {0}")]
    HopByHopHeader(String),
    #[error("Invalid header: {0:?}")]
    InvalidHeader(String),
    #[error("Invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    #[error("start_response called again after headers were sent")]
    HeadersAlreadySent,
    #[error("Body produced before start_response was called")]
    NoStartResponse,
}

/// Status and headers registered by the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: Status,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct ResponseState {
    pending: Option<ResponseHead>,
    committed: bool,
    writes: Vec<Bytes>,
}

/// Cloneable `start_response` callable.
#[derive(Debug, Clone, Default)]
pub struct StartResponse {
    state: Arc<Mutex<ResponseState>>,
}

impl StartResponse {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ResponseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register (or replace) the response status and headers.
    ///
    /// With `exc_info` set after the headers went out, `exc_info` itself is
    /// returned: the response cannot be changed any more. Without it, a call
    /// after commit fails with [`GatewayError::HeadersAlreadySent`]. Before
    /// commit, any call replaces the pending head.
    pub fn call<I, K, V>(&self, status: &str, headers: I, exc_info: Option<AppError>) -> Result<(), AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.lock();
        if state.committed {
            return Err(match exc_info {
                Some(original) => original,
                None => GatewayError::HeadersAlreadySent.into(),
            });
        }
        if state.pending.is_some() && exc_info.is_none() {
            tracing::debug!("start_response called twice; replacing pending response");
        }

        let status =
            Status::parse(status).ok_or_else(|| GatewayError::InvalidStatus(status.to_string()))?;
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Vec<(String, String)>>();
        for (name, value) in &headers {
            validate_header(name, value)?;
        }

        state.pending = Some(ResponseHead { status, headers });
        Ok(())
    }

    /// `call` without exception info.
    pub fn start<I, K, V>(&self, status: &str, headers: I) -> Result<(), AppError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.call(status, headers, None)
    }

    /// Legacy imperative write: bytes go out ahead of the next body chunk.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<(), AppError> {
        let mut state = self.lock();
        if state.pending.is_none() {
            return Err(GatewayError::NoStartResponse.into());
        }
        state.writes.push(data.into());
        Ok(())
    }

    /// Whether the response head has been committed to the wire.
    pub fn headers_sent(&self) -> bool {
        self.lock().committed
    }

    /// Freeze the pending head for writing.
    pub(crate) fn commit(&self) -> Result<ResponseHead, GatewayError> {
        let mut state = self.lock();
        if state.committed {
            return Err(GatewayError::HeadersAlreadySent);
        }
        let head = state.pending.clone().ok_or(GatewayError::NoStartResponse)?;
        state.committed = true;
        Ok(head)
    }

    pub(crate) fn take_writes(&self) -> Vec<Bytes> {
        std::mem::take(&mut self.lock().writes)
    }

    pub(crate) fn queued_len(&self) -> u64 {
        self.lock().writes.iter().map(|b| b.len() as u64).sum()
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), GatewayError> {
    if !is_token(name) {
        return Err(GatewayError::InvalidHeader(name.to_string()));
    }
    if value.contains(['\r', '\n']) {
        return Err(GatewayError::InvalidHeader(format!("{name}: {value}")));
    }
    if is_hop_by_hop(name) {
        return Err(GatewayError::HopByHopHeader(name.to_string()));
    }
    if name.eq_ignore_ascii_case("content-length") {
        let trimmed = value.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GatewayError::InvalidContentLength(value.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_error(err: AppError) -> GatewayError {
        *err.downcast::<GatewayError>().expect("gateway error")
    }

    #[test]
    fn registers_pending_head_without_committing() {
        let sr = StartResponse::new();
        sr.start("200 OK", [("Content-Type", "text/plain")]).unwrap();
        assert!(!sr.headers_sent());

        let head = sr.commit().unwrap();
        assert_eq!(head.status.code(), 200);
        assert_eq!(head.headers, vec![("Content-Type".into(), "text/plain".into())]);
        assert!(sr.headers_sent());
    }

    #[test]
    fn second_call_before_commit_replaces() {
        let sr = StartResponse::new();
        sr.start("200 OK", [("X-First", "1")]).unwrap();
        sr.start("404 Not Found", Vec::<(String, String)>::new()).unwrap();

        let head = sr.commit().unwrap();
        assert_eq!(head.status.code(), 404);
        assert!(head.headers.is_empty());
    }

    #[test]
    fn call_after_commit_without_exc_info_fails() {
        let sr = StartResponse::new();
        sr.start("200 OK", [("A", "b")]).unwrap();
        sr.commit().unwrap();

        let err = sr.start("500 Internal Server Error", [("A", "b")]).unwrap_err();
        assert!(matches!(gateway_error(err), GatewayError::HeadersAlreadySent));
    }

    #[test]
    fn call_after_commit_with_exc_info_reraises() {
        let sr = StartResponse::new();
        sr.start("200 OK", [("A", "b")]).unwrap();
        sr.commit().unwrap();

        let original: AppError = "database exploded".into();
        let err = sr
            .call("500 Internal Server Error", [("A", "b")], Some(original))
            .unwrap_err();
        assert_eq!(err.to_string(), "database exploded");
    }

    #[test]
    fn exc_info_before_commit_replaces() {
        let sr = StartResponse::new();
        sr.start("200 OK", [("A", "b")]).unwrap();
        sr.call("503 Service Unavailable", [("A", "c")], Some("oops".into()))
            .unwrap();
        assert_eq!(sr.commit().unwrap().status.code(), 503);
    }

    #[test]
    fn validates_status_and_headers() {
        let sr = StartResponse::new();
        let none = Vec::<(String, String)>::new;

        assert!(matches!(
            gateway_error(sr.start("OK", none()).unwrap_err()),
            GatewayError::InvalidStatus(_)
        ));
        assert!(matches!(
            gateway_error(sr.start("200 OK", [("Connection", "close")]).unwrap_err()),
            GatewayError::HopByHopHeader(_)
        ));
        assert!(matches!(
            gateway_error(sr.start("200 OK", [("Transfer-Encoding", "chunked")]).unwrap_err()),
            GatewayError::HopByHopHeader(_)
        ));
        assert!(matches!(
            gateway_error(sr.start("200 OK", [("X-Evil", "a\r\nb")]).unwrap_err()),
            GatewayError::InvalidHeader(_)
        ));
        assert!(matches!(
            gateway_error(sr.start("200 OK", [("Bad Name", "v")]).unwrap_err()),
            GatewayError::InvalidHeader(_)
        ));
        assert!(matches!(
            gateway_error(sr.start("200 OK", [("Content-Length", "ten")]).unwrap_err()),
            GatewayError::InvalidContentLength(_)
        ));
        // Nothing was registered by the failed calls.
        assert!(matches!(sr.commit(), Err(GatewayError::NoStartResponse)));
    }

    #[test]
    fn writes_require_start_and_queue_in_order() {
        let sr = StartResponse::new();
        assert!(sr.write("early").is_err());

        sr.start("200 OK", [("A", "b")]).unwrap();
        sr.write("one").unwrap();
        sr.write(Bytes::from_static(b"two")).unwrap();
        assert_eq!(sr.queued_len(), 6);
        assert_eq!(sr.take_writes(), vec![Bytes::from("one"), Bytes::from("two")]);
        assert!(sr.take_writes().is_empty());
    }

    #[test]
    fn clones_share_state() {
        let sr = StartResponse::new();
        let captured = sr.clone();
        captured.start("201 Created", [("A", "b")]).unwrap();
        assert_eq!(sr.commit().unwrap().status.code(), 201);
        assert!(captured.headers_sent());
    }
}
