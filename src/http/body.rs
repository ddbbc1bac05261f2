//! Request body reader.
//!
//! Reads exactly the bytes that belong to the current request out of the
//! connection buffer, de-chunking when needed. Whatever the application does
//! not read is drained by the handler before the next request is parsed.

use std::io::{self, BufRead, Read};

use crate::http::request::{read_line, BodyFraming, Line};

/// Longest chunk-size or trailer line accepted.
const MAX_CHUNK_LINE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    Fixed { remaining: u64 },
    ChunkSize,
    ChunkData { remaining: u64 },
    ChunkEnd,
    Trailers,
    Done,
}

/// `Read` over one request body.
pub struct BodyReader<'a, R: BufRead> {
    inner: &'a mut R,
    state: BodyState,
    chunked: bool,
    consumed: u64,
}

impl<'a, R: BufRead> BodyReader<'a, R> {
    pub fn new(inner: &'a mut R, framing: BodyFraming) -> Self {
        let (state, chunked) = match framing {
            BodyFraming::Empty | BodyFraming::Fixed(0) => (BodyState::Done, false),
            BodyFraming::Fixed(n) => (BodyState::Fixed { remaining: n }, false),
            BodyFraming::Chunked => (BodyState::ChunkSize, true),
        };
        Self {
            inner,
            state,
            chunked,
            consumed: 0,
        }
    }

    /// The whole body, including any chunked trailer, has been read.
    pub fn is_complete(&self) -> bool {
        self.state == BodyState::Done
    }

    pub fn is_chunked(&self) -> bool {
        self.chunked
    }

    /// Body bytes handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Read and discard the rest of the body, up to `limit` bytes.
    ///
    /// Returns `Ok(true)` when the body ended within the limit.
    pub fn drain(&mut self, limit: u64) -> io::Result<bool> {
        let mut scratch = [0u8; 8192];
        let mut discarded = 0u64;
        while !self.is_complete() {
            if discarded >= limit {
                return Ok(false);
            }
            let want = scratch.len().min((limit - discarded) as usize);
            let n = self.read(&mut scratch[..want])?;
            if n == 0 && !self.is_complete() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            discarded += n as u64;
        }
        Ok(true)
    }

    fn read_chunk_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        match read_line(&mut *self.inner, MAX_CHUNK_LINE, &mut line)? {
            Line::Complete => Ok(String::from_utf8_lossy(&line).into_owned()),
            Line::TooLong => Err(invalid("chunk line too long")),
            Line::Eof | Line::Partial => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }

    fn read_data(&mut self, buf: &mut [u8], remaining: u64) -> io::Result<usize> {
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 && max > 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.consumed += n as u64;
        Ok(n)
    }
}

impl<R: BufRead> Read for BodyReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.state {
                BodyState::Done => return Ok(0),
                BodyState::Fixed { remaining } => {
                    let n = self.read_data(buf, remaining)?;
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        BodyState::Done
                    } else {
                        BodyState::Fixed { remaining }
                    };
                    return Ok(n);
                }
                BodyState::ChunkSize => {
                    let line = self.read_chunk_line()?;
                    let size = line.split(';').next().unwrap_or("").trim();
                    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_hexdigit()) {
                        return Err(invalid("malformed chunk size"));
                    }
                    let size = u64::from_str_radix(size, 16)
                        .map_err(|_| invalid("chunk size out of range"))?;
                    self.state = if size == 0 {
                        BodyState::Trailers
                    } else {
                        BodyState::ChunkData { remaining: size }
                    };
                }
                BodyState::ChunkData { remaining } => {
                    let n = self.read_data(buf, remaining)?;
                    let remaining = remaining - n as u64;
                    self.state = if remaining == 0 {
                        BodyState::ChunkEnd
                    } else {
                        BodyState::ChunkData { remaining }
                    };
                    return Ok(n);
                }
                BodyState::ChunkEnd => {
                    if !self.read_chunk_line()?.is_empty() {
                        return Err(invalid("missing CRLF after chunk data"));
                    }
                    self.state = BodyState::ChunkSize;
                }
                BodyState::Trailers => {
                    if self.read_chunk_line()?.is_empty() {
                        self.state = BodyState::Done;
                    }
                }
            }
        }
    }
}

impl<R: BufRead> std::fmt::Debug for BodyReader<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyReader")
            .field("state", &self.state)
            .field("consumed", &self.consumed)
            .finish()
    }
}

fn invalid(message: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read_all(raw: &[u8], framing: BodyFraming) -> (io::Result<Vec<u8>>, usize) {
        let mut cursor = Cursor::new(raw);
        let mut body = Vec::new();
        let result = BodyReader::new(&mut cursor, framing)
            .read_to_end(&mut body)
            .map(|_| body);
        (result, cursor.position() as usize)
    }

    #[test]
    fn fixed_length_stops_at_boundary() {
        let (body, offset) = read_all(b"helloNEXT", BodyFraming::Fixed(5));
        assert_eq!(body.unwrap(), b"hello");
        assert_eq!(offset, 5);
    }

    #[test]
    fn empty_body_reads_nothing() {
        let (body, offset) = read_all(b"GET", BodyFraming::Empty);
        assert!(body.unwrap().is_empty());
        assert_eq!(offset, 0);
    }

    #[test]
    fn short_fixed_body_is_unexpected_eof() {
        let (body, _) = read_all(b"hel", BodyFraming::Fixed(5));
        assert_eq!(body.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn dechunks_with_extensions_and_trailers() {
        let raw = b"4;ext=1\r\nWiki\r\n5\r\npedia\r\n0\r\nX-Trailer: t\r\n\r\nNEXT";
        let (body, offset) = read_all(raw, BodyFraming::Chunked);
        assert_eq!(body.unwrap(), b"Wikipedia");
        assert_eq!(&raw[offset..], b"NEXT");
    }

    #[test]
    fn malformed_chunk_size_is_invalid_data() {
        let (body, _) = read_all(b"zz\r\nabc\r\n", BodyFraming::Chunked);
        assert_eq!(body.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn signed_chunk_size_is_invalid_data() {
        for raw in [&b"+3\r\nabc\r\n0\r\n\r\n"[..], b"-3\r\nabc\r\n0\r\n\r\n", b"\r\nabc\r\n"] {
            let (body, _) = read_all(raw, BodyFraming::Chunked);
            assert_eq!(body.unwrap_err().kind(), io::ErrorKind::InvalidData);
        }
    }

    #[test]
    fn missing_chunk_terminator_is_invalid_data() {
        let (body, _) = read_all(b"2\r\nabXX\r\n0\r\n\r\n", BodyFraming::Chunked);
        assert_eq!(body.unwrap_err().kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_chunked_body_is_unexpected_eof() {
        let (body, _) = read_all(b"5\r\nab", BodyFraming::Chunked);
        assert_eq!(body.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn drain_discards_unread_remainder() {
        let mut cursor = Cursor::new(&b"0123456789NEXT"[..]);
        let mut reader = BodyReader::new(&mut cursor, BodyFraming::Fixed(10));
        let mut first = [0u8; 3];
        reader.read_exact(&mut first).unwrap();
        assert!(reader.drain(1024).unwrap());
        assert!(reader.is_complete());
        assert_eq!(reader.consumed(), 10);
        assert_eq!(cursor.position(), 10);
    }

    #[test]
    fn drain_gives_up_past_limit() {
        let mut cursor = Cursor::new(vec![b'x'; 100]);
        let mut reader = BodyReader::new(&mut cursor, BodyFraming::Fixed(100));
        assert!(!reader.drain(10).unwrap());
        assert!(!reader.is_complete());
    }
}
