//! Response serialization and body framing.
//!
//! # Responsibilities
//! - Pick the body framing once the status and headers are final
//! - Add server-owned headers (Date, Server, Content-Length, Transfer-Encoding, Connection)
//! - Stream body chunks through the chosen framing
//! - Decide whether the connection survives the response
//!
//! # Design Decisions
//! - Applications never see or set hop-by-hop headers; framing is the
//!   writer's job alone
//! - A framing with no reliable terminator forces close-after-response

use std::io::{self, Write};
use std::time::SystemTime;

use crate::http::method::Method;
use crate::http::request::Version;

/// A response status: three-digit code plus reason phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: u16,
    reason: String,
}

impl Status {
    /// Parse an application status line such as `"200 OK"`.
    pub fn parse(status: &str) -> Option<Self> {
        let bytes = status.as_bytes();
        if bytes.len() < 4 || bytes[3] != b' ' || !bytes[..3].iter().all(u8::is_ascii_digit) {
            return None;
        }
        let code: u16 = status[..3].parse().ok()?;
        if !(100..=599).contains(&code) || status.contains(['\r', '\n']) {
            return None;
        }
        Some(Self {
            code,
            reason: status[4..].to_string(),
        })
    }

    /// Status with the canonical reason phrase.
    pub fn from_code(code: u16) -> Self {
        let reason = http::StatusCode::from_u16(code)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        Self {
            code,
            reason: reason.to_string(),
        }
    }

    pub fn code(&self) -> u16 {
        self.code
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Responses with this status never carry a body.
    pub fn forbids_body(&self) -> bool {
        (100..200).contains(&self.code) || self.code == 204 || self.code == 304
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// How the response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Exactly this many bytes, announced by `Content-Length`.
    Length(u64),
    /// `Transfer-Encoding: chunked`, added by the server.
    Chunked,
    /// Raw bytes terminated by closing the connection.
    CloseDelimited,
    /// Headers only.
    Bodiless,
}

/// Per-request context the writer needs to frame a response.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub version: Version,
    pub method: Method,
    /// Whether the request asked for a persistent connection.
    pub keep_alive: bool,
    pub server_software: &'a str,
}

/// Writes one response onto the connection.
pub struct ResponseWriter<'a, W: Write> {
    out: &'a mut W,
    ctx: ResponseContext<'a>,
    framing: Option<Framing>,
    status: Option<u16>,
    written: u64,
    excess: u64,
    close: bool,
}

impl<'a, W: Write> ResponseWriter<'a, W> {
    pub fn new(out: &'a mut W, ctx: ResponseContext<'a>) -> Self {
        Self {
            out,
            close: !ctx.keep_alive,
            ctx,
            framing: None,
            status: None,
            written: 0,
            excess: 0,
        }
    }

    /// Write the status line and headers.
    ///
    /// `known_length` is the size of a body the server holds in full; it is
    /// announced when the application did not set `Content-Length` itself.
    pub fn start(
        &mut self,
        status: &Status,
        headers: &[(String, String)],
        known_length: Option<u64>,
    ) -> io::Result<()> {
        if self.framing.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "response headers already written",
            ));
        }

        let has = |name: &str| headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name));
        let declared = headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse::<u64>().ok());

        let bodiless = self.ctx.method.is_bodiless_response() || status.forbids_body();
        let mut extra: Vec<(&str, String)> = Vec::new();

        let framing = if bodiless {
            if self.ctx.method == Method::Head && !status.forbids_body() && declared.is_none() {
                if let Some(n) = known_length {
                    extra.push(("Content-Length", n.to_string()));
                }
            }
            Framing::Bodiless
        } else if let Some(n) = declared {
            Framing::Length(n)
        } else if let Some(n) = known_length {
            extra.push(("Content-Length", n.to_string()));
            Framing::Length(n)
        } else if self.ctx.version == Version::Http11 {
            extra.push(("Transfer-Encoding", "chunked".to_string()));
            Framing::Chunked
        } else {
            self.close = true;
            Framing::CloseDelimited
        };

        let mut head = Vec::with_capacity(256);
        write!(head, "{} {}\r\n", self.ctx.version, status)?;
        for (name, value) in headers {
            write!(head, "{name}: {value}\r\n")?;
        }
        if !has("date") {
            write!(head, "Date: {}\r\n", httpdate::fmt_http_date(SystemTime::now()))?;
        }
        if !has("server") {
            write!(head, "Server: {}\r\n", self.ctx.server_software)?;
        }
        for (name, value) in &extra {
            write!(head, "{name}: {value}\r\n")?;
        }
        if self.close {
            head.extend_from_slice(b"Connection: close\r\n");
        } else if self.ctx.version == Version::Http10 {
            head.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        head.extend_from_slice(b"\r\n");

        self.out.write_all(&head)?;
        self.framing = Some(framing);
        self.status = Some(status.code());
        Ok(())
    }

    /// Send one body chunk through the framing.
    pub fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(framing) = self.framing else {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "body written before response headers",
            ));
        };
        if data.is_empty() {
            return Ok(());
        }

        match framing {
            Framing::Bodiless => return Ok(()),
            Framing::Length(declared) => {
                let room = declared.saturating_sub(self.written);
                let take = data.len().min(usize::try_from(room).unwrap_or(usize::MAX));
                self.out.write_all(&data[..take])?;
                self.written += take as u64;
                self.excess += (data.len() - take) as u64;
            }
            Framing::Chunked => {
                write!(self.out, "{:x}\r\n", data.len())?;
                self.out.write_all(data)?;
                self.out.write_all(b"\r\n")?;
                self.written += data.len() as u64;
            }
            Framing::CloseDelimited => {
                self.out.write_all(data)?;
                self.written += data.len() as u64;
            }
        }
        self.out.flush()
    }

    /// Complete the response: write the chunked terminator and flush.
    pub fn finish(&mut self) -> io::Result<()> {
        match self.framing {
            Some(Framing::Chunked) => self.out.write_all(b"0\r\n\r\n")?,
            Some(Framing::Length(declared)) if self.written < declared => {
                self.close = true;
            }
            _ => {}
        }
        self.out.flush()
    }

    /// Give up on the response mid-stream; the connection must close.
    pub fn abort(&mut self) -> io::Result<()> {
        self.close = true;
        self.out.flush()
    }

    /// Emit a complete minimal response with a plain-text body.
    pub fn write_simple(&mut self, status: &Status, body: &[u8]) -> io::Result<()> {
        let headers = vec![(
            "Content-Type".to_string(),
            "text/plain; charset=utf-8".to_string(),
        )];
        self.start(status, &headers, Some(body.len() as u64))?;
        self.write_chunk(body)?;
        self.finish()
    }

    /// Mark the connection for closing after this response.
    ///
    /// Only has an effect on the `Connection` header before `start`.
    pub fn force_close(&mut self) {
        self.close = true;
    }

    pub fn is_started(&self) -> bool {
        self.framing.is_some()
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Body bytes put on the wire, excluding chunk framing.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Body bytes dropped because they exceeded the declared length.
    pub fn excess_bytes(&self) -> u64 {
        self.excess
    }

    /// Whether a declared length was not met.
    pub fn is_short(&self) -> bool {
        matches!(self.framing, Some(Framing::Length(n)) if self.written < n)
    }

    /// Final keep-alive decision for the connection.
    pub fn keep_alive(&self) -> bool {
        !self.close
    }
}

/// Send the interim `100 Continue` response.
pub fn write_continue<W: Write>(out: &mut W) -> io::Result<()> {
    out.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(version: Version, method: Method, keep_alive: bool) -> ResponseContext<'static> {
        ResponseContext {
            version,
            method,
            keep_alive,
            server_software: "test-server/1.0",
        }
    }

    fn text_plain() -> Vec<(String, String)> {
        vec![("Content-Type".into(), "text/plain".into())]
    }

    fn split(raw: &[u8]) -> (String, Vec<u8>) {
        let text = String::from_utf8_lossy(raw);
        let end = text.find("\r\n\r\n").unwrap() + 4;
        (text[..end].to_string(), raw[end..].to_vec())
    }

    #[test]
    fn status_parsing() {
        let status = Status::parse("200 OK").unwrap();
        assert_eq!(status.code(), 200);
        assert_eq!(status.reason(), "OK");
        assert_eq!(Status::parse("404 Not Found").unwrap().to_string(), "404 Not Found");

        assert!(Status::parse("200").is_none());
        assert!(Status::parse("20 OK").is_none());
        assert!(Status::parse("abc OK").is_none());
        assert!(Status::parse("200OK").is_none());
        assert!(Status::parse("999 Huh").is_none());
        assert!(Status::parse("200 OK\r\nX: y").is_none());
    }

    #[test]
    fn canonical_reasons() {
        assert_eq!(Status::from_code(431).reason(), "Request Header Fields Too Large");
        assert_eq!(Status::from_code(500).to_string(), "500 Internal Server Error");
    }

    #[test]
    fn http11_unknown_length_is_chunked() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(200), &text_plain(), None).unwrap();
        writer.write_chunk(b"hi").unwrap();
        writer.write_chunk(b"").unwrap();
        writer.finish().unwrap();
        assert!(writer.keep_alive());

        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Type: text/plain\r\n"));
        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(head.contains("Server: test-server/1.0\r\n"));
        assert!(head.contains("Date: "));
        assert!(!head.contains("Connection:"));
        assert_eq!(body, b"2\r\nhi\r\n0\r\n\r\n");
    }

    #[test]
    fn known_length_adds_content_length() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(200), &text_plain(), Some(2)).unwrap();
        writer.write_chunk(b"hi").unwrap();
        writer.finish().unwrap();

        let (head, body) = split(&out);
        assert!(head.contains("Content-Length: 2\r\n"));
        assert_eq!(body, b"hi");
    }

    #[test]
    fn declared_length_truncates_excess() {
        let mut out = Vec::new();
        let headers = vec![("Content-Length".to_string(), "3".to_string())];
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(200), &headers, None).unwrap();
        writer.write_chunk(b"ab").unwrap();
        writer.write_chunk(b"cdef").unwrap();
        writer.finish().unwrap();

        assert_eq!(writer.excess_bytes(), 3);
        assert!(!writer.is_short());
        assert!(writer.keep_alive());
        assert_eq!(split(&out).1, b"abc");
    }

    #[test]
    fn short_declared_length_forces_close() {
        let mut out = Vec::new();
        let headers = vec![("Content-Length".to_string(), "10".to_string())];
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(200), &headers, None).unwrap();
        writer.write_chunk(b"abc").unwrap();
        writer.finish().unwrap();

        assert!(writer.is_short());
        assert!(!writer.keep_alive());
    }

    #[test]
    fn http10_stream_is_close_delimited() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http10, Method::Get, true));
        writer.start(&Status::from_code(200), &text_plain(), None).unwrap();
        writer.write_chunk(b"raw").unwrap();
        writer.finish().unwrap();
        assert!(!writer.keep_alive());

        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.0 200 OK\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(!head.contains("Transfer-Encoding"));
        assert_eq!(body, b"raw");
    }

    #[test]
    fn http10_keep_alive_is_announced() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http10, Method::Get, true));
        writer.start(&Status::from_code(200), &[], Some(0)).unwrap();
        writer.finish().unwrap();
        assert!(writer.keep_alive());
        assert!(split(&out).0.contains("Connection: keep-alive\r\n"));
    }

    #[test]
    fn head_and_no_content_are_bodiless() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Head, true));
        writer.start(&Status::from_code(200), &text_plain(), Some(5)).unwrap();
        writer.write_chunk(b"hello").unwrap();
        writer.finish().unwrap();
        assert!(writer.keep_alive());
        let (head, body) = split(&out);
        assert!(head.contains("Content-Length: 5\r\n"));
        assert!(body.is_empty());

        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(204), &[], None).unwrap();
        writer.write_chunk(b"ignored").unwrap();
        writer.finish().unwrap();
        let (head, body) = split(&out);
        assert!(!head.contains("Transfer-Encoding"));
        assert!(!head.contains("Content-Length"));
        assert!(body.is_empty());
    }

    #[test]
    fn close_requested_adds_connection_close() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, false));
        writer.start(&Status::from_code(200), &[], Some(0)).unwrap();
        writer.finish().unwrap();
        assert!(!writer.keep_alive());
        assert!(split(&out).0.contains("Connection: close\r\n"));
    }

    #[test]
    fn application_date_and_server_are_kept() {
        let mut out = Vec::new();
        let headers = vec![
            ("Server".to_string(), "custom".to_string()),
            ("Date".to_string(), "yesterday".to_string()),
        ];
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        writer.start(&Status::from_code(200), &headers, Some(0)).unwrap();
        let (head, _) = split(&out);
        assert_eq!(head.matches("Server:").count(), 1);
        assert_eq!(head.matches("Date:").count(), 1);
    }

    #[test]
    fn headers_are_written_once() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, true));
        assert!(writer.write_chunk(b"early").is_err());
        writer.start(&Status::from_code(200), &[], None).unwrap();
        assert!(writer.start(&Status::from_code(200), &[], None).is_err());
    }

    #[test]
    fn simple_response() {
        let mut out = Vec::new();
        let mut writer = ResponseWriter::new(&mut out, ctx(Version::Http11, Method::Get, false));
        writer.write_simple(&Status::from_code(400), b"Bad Request\n").unwrap();
        let (head, body) = split(&out);
        assert!(head.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(head.contains("Content-Length: 12\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert_eq!(body, b"Bad Request\n");
    }

    #[test]
    fn interim_continue() {
        let mut out = Vec::new();
        write_continue(&mut out).unwrap();
        assert_eq!(out, b"HTTP/1.1 100 Continue\r\n\r\n");
    }
}
