//! HTTP/1.x protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection
//!     → server.rs (dispatch onto a blocking thread)
//!     → handler.rs (per-connection request loop)
//!         → request.rs (parse request line and headers)
//!         → body.rs (length or chunked body reader)
//!         → [gateway adapter calls the application]
//!         → response.rs (frame status, headers and body)
//!     → Next request or close
//! ```

pub mod body;
pub mod handler;
pub mod headers;
pub mod method;
pub mod request;
pub mod response;
pub mod server;

pub use body::BodyReader;
pub use handler::{ConnectionHandler, HandlerConfig, TransportError};
pub use headers::Headers;
pub use method::Method;
pub use request::{BodyFraming, Limits, ParseError, ParseState, RequestHead, RequestParser, Version};
pub use response::{Framing, ResponseContext, ResponseWriter, Status};
pub use server::{HttpServer, ServerError};
