//! The application contract.

use bytes::Bytes;

use crate::gateway::environ::Environ;
use crate::gateway::start_response::StartResponse;

/// Any failure raised by application code.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

/// Lazily produced body chunks.
pub type BodyChunks = Box<dyn Iterator<Item = Result<Bytes, AppError>> + Send>;

/// What an application returns after registering its status and headers.
///
/// Dropping a `Body` releases whatever the iterator holds; the server always
/// drops it once the response is finished or abandoned.
pub enum Body {
    /// No body bytes.
    Empty,
    /// One block known in full; the server announces its length.
    Full(Bytes),
    /// Chunks forwarded as they are produced.
    Stream(BodyChunks),
}

impl Body {
    /// Stream from any fallible chunk iterator.
    pub fn stream<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, AppError>>,
        I::IntoIter: Send + 'static,
    {
        Body::Stream(Box::new(chunks.into_iter()))
    }

    /// Stream from infallible chunks.
    pub fn from_chunks<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        I::IntoIter: Send + 'static,
        B: Into<Bytes>,
    {
        Body::Stream(Box::new(chunks.into_iter().map(|b| Ok(b.into()))))
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Body::Full(bytes.into())
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Body::Full(text.into())
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Body::Full(Bytes::from_static(text.as_bytes()))
    }
}

/// A hosted application.
///
/// Called once per request with a fresh environ and a `start_response`
/// handle. The application must call `start_response` before the first
/// non-empty body chunk is produced. Implementations must be safe to call
/// from several connections at once.
pub trait Application: Send + Sync {
    fn call(&self, environ: Environ<'_>, start_response: StartResponse) -> Result<Body, AppError>;
}

impl<F> Application for F
where
    F: Fn(Environ<'_>, StartResponse) -> Result<Body, AppError> + Send + Sync,
{
    fn call(&self, environ: Environ<'_>, start_response: StartResponse) -> Result<Body, AppError> {
        self(environ, start_response)
    }
}
