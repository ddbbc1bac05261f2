//! The per-request environ handed to applications.
//!
//! # Responsibilities
//! - Derive CGI-style variables from the parsed request and connection
//! - Map headers to `HTTP_*` keys, merging duplicates
//! - Expose the request body and an error stream
//!
//! # Design Decisions
//! - A fresh environ per request; it borrows the body reader, so it cannot
//!   outlive the request it was built for
//! - Variables are kept sorted for reproducible iteration

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use crate::http::request::RequestHead;
use crate::net::connection::{ConnectionId, ConnectionInfo};

/// Headers whose repeated values are combined rather than overwritten.
const LIST_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-encoding",
    "accept-language",
    "accept-ranges",
    "allow",
    "cache-control",
    "connection",
    "content-encoding",
    "content-language",
    "expect",
    "forwarded",
    "if-match",
    "if-none-match",
    "pragma",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "vary",
    "via",
    "warning",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
];

/// Server-wide values copied into every environ.
#[derive(Debug, Clone)]
pub struct EnvironConfig {
    pub server_software: String,
    /// Whether requests may be served concurrently.
    pub multithread: bool,
}

/// The request body as seen by the application (`wsgi.input`).
pub struct Input<'a> {
    inner: &'a mut dyn Read,
}

impl<'a> Input<'a> {
    pub fn new(inner: &'a mut dyn Read) -> Self {
        Self { inner }
    }

    /// Read the whole remaining body.
    pub fn read_all(&mut self) -> io::Result<Vec<u8>> {
        let mut body = Vec::new();
        self.inner.read_to_end(&mut body)?;
        Ok(body)
    }
}

impl Read for Input<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl std::fmt::Debug for Input<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input").finish_non_exhaustive()
    }
}

/// `wsgi.errors`: a text sink whose complete lines go to the log.
#[derive(Debug)]
pub struct ErrorStream {
    connection_id: ConnectionId,
    pending: Vec<u8>,
}

impl ErrorStream {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            pending: Vec::new(),
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        tracing::error!(
            target: "gateway_server::app",
            connection_id = %self.connection_id,
            "{}",
            line.trim_end_matches('\r')
        );
    }
}

impl Write for ErrorStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.emit(&line);
        }
        Ok(())
    }
}

impl Drop for ErrorStream {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Application-facing view of one request.
#[derive(Debug)]
pub struct Environ<'a> {
    vars: BTreeMap<String, String>,
    input: Input<'a>,
    errors: ErrorStream,
    multithread: bool,
    input_terminated: bool,
}

impl<'a> Environ<'a> {
    /// Build the environ for `head`, reading the body through `input`.
    pub fn new(
        head: &RequestHead,
        conn: &ConnectionInfo,
        config: &EnvironConfig,
        input: &'a mut dyn Read,
        input_terminated: bool,
    ) -> Self {
        let mut vars = BTreeMap::new();
        let mut set = |k: &str, v: String| {
            vars.insert(k.to_string(), v);
        };

        let (path, query, absolute_host) = split_target(&head.target, head.path(), head.query());

        set("REQUEST_METHOD", head.method.as_str().to_string());
        set("SCRIPT_NAME", String::new());
        set("PATH_INFO", decode_path(&path));
        set("QUERY_STRING", query);
        set("REQUEST_URI", head.target.clone());
        set("RAW_URI", head.target.clone());
        set("SERVER_PROTOCOL", head.version.as_str().to_string());
        set("SERVER_NAME", conn.server_name.clone());
        set("SERVER_PORT", conn.local.port().to_string());
        set("SERVER_SOFTWARE", config.server_software.clone());
        set("REMOTE_ADDR", conn.peer.ip().to_string());
        set("REMOTE_PORT", conn.peer.port().to_string());
        set(
            "CONTENT_TYPE",
            head.headers.get("content-type").unwrap_or("").to_string(),
        );
        set(
            "CONTENT_LENGTH",
            head.headers.get("content-length").unwrap_or("").trim().to_string(),
        );
        set("wsgi.url_scheme", conn.scheme.as_str().to_string());
        set("wsgi.input_terminated", input_terminated.to_string());

        for (name, value) in head.headers.iter() {
            if name.contains('_')
                || name.eq_ignore_ascii_case("content-type")
                || name.eq_ignore_ascii_case("content-length")
            {
                continue;
            }
            let key = format!("HTTP_{}", name.to_ascii_uppercase().replace('-', "_"));
            let lower = name.to_ascii_lowercase();
            match vars.get_mut(&key) {
                Some(existing) if lower == "cookie" => {
                    existing.push_str("; ");
                    existing.push_str(value);
                }
                Some(existing) if LIST_HEADERS.contains(&lower.as_str()) => {
                    existing.push_str(", ");
                    existing.push_str(value);
                }
                _ => {
                    vars.insert(key, value.to_string());
                }
            }
        }

        if let Some(host) = absolute_host {
            vars.insert("HTTP_HOST".to_string(), host);
        }

        Self {
            vars,
            input: Input::new(input),
            errors: ErrorStream::new(conn.id),
            multithread: config.multithread,
            input_terminated,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or overwrite a variable (used by middleware-style helpers).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn method(&self) -> &str {
        self.get("REQUEST_METHOD").unwrap_or("")
    }

    pub fn path_info(&self) -> &str {
        self.get("PATH_INFO").unwrap_or("")
    }

    pub fn query_string(&self) -> &str {
        self.get("QUERY_STRING").unwrap_or("")
    }

    pub fn url_scheme(&self) -> &str {
        self.get("wsgi.url_scheme").unwrap_or("http")
    }

    /// `wsgi.input`.
    pub fn input(&mut self) -> &mut Input<'a> {
        &mut self.input
    }

    /// `wsgi.errors`.
    pub fn errors(&mut self) -> &mut ErrorStream {
        &mut self.errors
    }

    /// The body ends at an explicit terminator rather than `CONTENT_LENGTH`.
    pub fn input_terminated(&self) -> bool {
        self.input_terminated
    }

    pub fn multithread(&self) -> bool {
        self.multithread
    }

    pub fn multiprocess(&self) -> bool {
        false
    }

    pub fn run_once(&self) -> bool {
        false
    }
}

/// Path, query and (for absolute-form targets) authority of a request target.
fn split_target(target: &str, path: &str, query: &str) -> (String, String, Option<String>) {
    if target.starts_with("http://") || target.starts_with("https://") {
        if let Ok(url) = url::Url::parse(target) {
            let host = url.host_str().map(|h| match url.port() {
                Some(port) => format!("{h}:{port}"),
                None => h.to_string(),
            });
            return (
                url.path().to_string(),
                url.query().unwrap_or("").to_string(),
                host,
            );
        }
    }
    (path.to_string(), query.to_string(), None)
}

/// Invalid UTF-8 after unescaping is replaced, never rejected.
fn decode_path(path: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(path.as_bytes())).into_owned()
}
