//! Request head parsing.
//!
//! # Responsibilities
//! - Read the request line and header block off a buffered stream
//! - Enforce line-length and header-count limits
//! - Decide body framing and keep-alive for the request
//!
//! # Design Decisions
//! - The parser never reads past the blank line ending the head; the body is
//!   left in the connection buffer for `BodyReader`, so pipelined requests
//!   start exactly where the previous body ended
//! - One parser per connection, reset between requests

use std::io::{self, BufRead};

use crate::config::LimitsConfig;
use crate::http::headers::Headers;
use crate::http::method::{is_token, Method};

/// Blank lines tolerated before a request line.
const MAX_LEADING_EMPTY_LINES: usize = 4;

/// Parser limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_line_length: usize,
    pub max_headers: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

impl From<&LimitsConfig> for Limits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_line_length: config.max_line_length,
            max_headers: config.max_headers,
        }
    }
}

/// Protocol version of a request, after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }

    fn default_keep_alive(&self) -> bool {
        matches!(self, Version::Http11)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the request body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Fixed(u64),
    Chunked,
}

/// Where the parser is in the current request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitRequestLine,
    ReadingHeaders,
    BodyReady,
    Done,
    Error,
}

/// A parsed request line and header block.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    /// The raw request target, as sent.
    pub target: String,
    pub version: Version,
    pub headers: Headers,
    pub framing: BodyFraming,
    /// Whether the client wants the connection kept open after this request.
    pub keep_alive: bool,
    pub expect_continue: bool,
}

impl RequestHead {
    /// Target up to the query component.
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// Query component without the `?`; empty when absent.
    pub fn query(&self) -> &str {
        self.target.split_once('?').map_or("", |(_, q)| q)
    }

    pub fn content_length(&self) -> Option<u64> {
        match self.framing {
            BodyFraming::Fixed(n) => Some(n),
            _ => None,
        }
    }
}

/// Why a request head was rejected.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed request line: {0:?}")]
    BadRequestLine(String),
    #[error("Invalid request target: {0:?}")]
    InvalidTarget(String),
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),
    #[error("Unsupported HTTP version: {0}")]
    UnsupportedVersion(String),
    #[error("Request line exceeds {0} bytes")]
    RequestLineTooLong(usize),
    #[error("Header line exceeds {0} bytes")]
    HeaderLineTooLong(usize),
    #[error("More than {0} header lines")]
    TooManyHeaders(usize),
    #[error("Malformed header line: {0:?}")]
    InvalidHeader(String),
    #[error("Invalid Content-Length: {0:?}")]
    InvalidContentLength(String),
    #[error("Unsupported Transfer-Encoding: {0:?}")]
    UnsupportedTransferEncoding(String),
    #[error("Both Content-Length and Transfer-Encoding present")]
    ConflictingFraming,
    #[error("Connection closed in the middle of the request head")]
    Incomplete,
    #[error("Parser not ready for a new request (state {0:?})")]
    NotReady(ParseState),
    #[error("I/O error while reading request: {0}")]
    Io(#[from] io::Error),
}

impl ParseError {
    /// Status code of the error response for this failure.
    pub fn status(&self) -> u16 {
        match self {
            ParseError::UnsupportedMethod(_) => 501,
            ParseError::UnsupportedVersion(_) => 505,
            ParseError::RequestLineTooLong(_) => 414,
            ParseError::HeaderLineTooLong(_) | ParseError::TooManyHeaders(_) => 431,
            ParseError::NotReady(_) => 500,
            _ => 400,
        }
    }
}

/// Incremental request-head parser for one connection.
#[derive(Debug)]
pub struct RequestParser {
    limits: Limits,
    state: ParseState,
}

impl RequestParser {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            state: ParseState::AwaitRequestLine,
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Read the next request head.
    ///
    /// Returns `Ok(None)` when the peer closed the connection before sending
    /// any byte of a new request.
    pub fn parse<R: BufRead>(&mut self, reader: &mut R) -> Result<Option<RequestHead>, ParseError> {
        if self.state != ParseState::AwaitRequestLine {
            return Err(ParseError::NotReady(self.state));
        }
        match self.parse_head(reader) {
            Ok(Some(head)) => {
                self.state = ParseState::BodyReady;
                Ok(Some(head))
            }
            Ok(None) => {
                self.state = ParseState::Done;
                Ok(None)
            }
            Err(e) => {
                self.state = ParseState::Error;
                Err(e)
            }
        }
    }

    /// The handler has consumed (or discarded) the body.
    pub fn body_consumed(&mut self) {
        if self.state == ParseState::BodyReady {
            self.state = ParseState::Done;
        }
    }

    /// Prepare for the next pipelined request.
    pub fn reset(&mut self) {
        self.state = ParseState::AwaitRequestLine;
    }

    fn parse_head<R: BufRead>(&mut self, reader: &mut R) -> Result<Option<RequestHead>, ParseError> {
        let max = self.limits.max_line_length;
        let mut line = Vec::with_capacity(256);

        let mut empty_lines = 0;
        loop {
            line.clear();
            match read_line(reader, max, &mut line)? {
                Line::Eof => return Ok(None),
                Line::Partial => return Err(ParseError::Incomplete),
                Line::TooLong => return Err(ParseError::RequestLineTooLong(max)),
                Line::Complete if line.is_empty() => {
                    empty_lines += 1;
                    if empty_lines > MAX_LEADING_EMPTY_LINES {
                        return Err(ParseError::BadRequestLine(String::new()));
                    }
                }
                Line::Complete => break,
            }
        }

        let (method, target, version) = parse_request_line(&line)?;
        self.state = ParseState::ReadingHeaders;

        let mut headers = Headers::new();
        loop {
            line.clear();
            match read_line(reader, max, &mut line)? {
                Line::Eof | Line::Partial => return Err(ParseError::Incomplete),
                Line::TooLong => return Err(ParseError::HeaderLineTooLong(max)),
                Line::Complete if line.is_empty() => break,
                Line::Complete => {}
            }

            if line[0] == b' ' || line[0] == b'\t' {
                let continuation = latin1(&line);
                if !headers.extend_last(continuation.trim()) {
                    return Err(ParseError::InvalidHeader(continuation));
                }
                continue;
            }

            if headers.len() >= self.limits.max_headers {
                return Err(ParseError::TooManyHeaders(self.limits.max_headers));
            }
            let (name, value) = parse_header_line(&line)?;
            headers.append(name, value);
        }

        let framing = body_framing(&headers)?;
        let keep_alive = if headers.has_token("connection", "close") {
            false
        } else if headers.has_token("connection", "keep-alive") {
            true
        } else {
            version.default_keep_alive()
        };
        let expect_continue = version == Version::Http11
            && headers
                .get("expect")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"));

        Ok(Some(RequestHead {
            method,
            target,
            version,
            headers,
            framing,
            keep_alive,
            expect_continue,
        }))
    }
}

pub(crate) enum Line {
    Complete,
    Partial,
    Eof,
    TooLong,
}

/// Read one line into `line` without its terminator (CRLF or bare LF).
/// Never consumes more than `limit` + 2 bytes.
pub(crate) fn read_line<R: BufRead>(reader: &mut R, limit: usize, line: &mut Vec<u8>) -> io::Result<Line> {
    loop {
        let available = match reader.fill_buf() {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(if line.is_empty() { Line::Eof } else { Line::Partial });
        }

        let budget = (limit + 2).saturating_sub(line.len());
        let window = &available[..available.len().min(budget)];
        match window.iter().position(|&b| b == b'\n') {
            Some(i) => {
                line.extend_from_slice(&window[..i]);
                reader.consume(i + 1);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.len() > limit {
                    return Ok(Line::TooLong);
                }
                return Ok(Line::Complete);
            }
            None => {
                let n = window.len();
                line.extend_from_slice(window);
                reader.consume(n);
                if line.len() >= limit + 2 {
                    return Ok(Line::TooLong);
                }
            }
        }
    }
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Version), ParseError> {
    let text = latin1(line);
    let parts: Vec<&str> = text.split_ascii_whitespace().collect();
    let [method, target, version] = parts[..] else {
        return Err(ParseError::BadRequestLine(text));
    };

    let version = parse_version(version)?;

    if !is_token(method) {
        return Err(ParseError::BadRequestLine(text));
    }
    let method = Method::from_token(method)
        .ok_or_else(|| ParseError::UnsupportedMethod(method.to_string()))?;

    let valid_form = target.starts_with('/')
        || target == "*"
        || target.starts_with("http://")
        || target.starts_with("https://");
    if !valid_form || target.bytes().any(|b| b.is_ascii_control()) {
        return Err(ParseError::InvalidTarget(target.to_string()));
    }

    // Non-ASCII bytes were widened by `latin1`; hand the application UTF-8.
    let target = String::from_utf8_lossy(
        &target.chars().map(|c| c as u32 as u8).collect::<Vec<u8>>(),
    )
    .into_owned();

    Ok((method, target, version))
}

fn parse_version(token: &str) -> Result<Version, ParseError> {
    let bad = || ParseError::BadRequestLine(token.to_string());

    let numbers = token.strip_prefix("HTTP/").ok_or_else(bad)?;
    let (major, minor) = numbers.split_once('.').ok_or_else(bad)?;
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(major) || !all_digits(minor) {
        return Err(bad());
    }
    let major: u32 = major.parse().map_err(|_| bad())?;
    let minor: u32 = minor.parse().map_err(|_| bad())?;

    match (major, minor) {
        (1, 0) => Ok(Version::Http10),
        (1, _) => Ok(Version::Http11),
        (m, _) if m >= 2 => Err(ParseError::UnsupportedVersion(token.to_string())),
        _ => Err(bad()),
    }
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), ParseError> {
    let text = latin1(line);
    let Some((name, value)) = text.split_once(':') else {
        return Err(ParseError::InvalidHeader(text));
    };
    if !is_token(name) {
        return Err(ParseError::InvalidHeader(text));
    }
    let value = value.trim_matches(|c| c == ' ' || c == '\t');
    Ok((name.to_string(), value.to_string()))
}

fn body_framing(headers: &Headers) -> Result<BodyFraming, ParseError> {
    if headers.contains("transfer-encoding") {
        if headers.contains("content-length") {
            return Err(ParseError::ConflictingFraming);
        }
        let codings: Vec<&str> = headers
            .get_all("transfer-encoding")
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();
        return match codings.last() {
            Some(last) if last.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
            _ => Err(ParseError::UnsupportedTransferEncoding(codings.join(", "))),
        };
    }

    let mut length = None;
    for value in headers.get_all("content-length") {
        let value = value.trim();
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::InvalidContentLength(value.to_string()));
        }
        let n: u64 = value
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(value.to_string()))?;
        match length {
            Some(previous) if previous != n => {
                return Err(ParseError::InvalidContentLength(value.to_string()))
            }
            _ => length = Some(n),
        }
    }

    Ok(match length {
        Some(n) => BodyFraming::Fixed(n),
        None => BodyFraming::Empty,
    })
}
