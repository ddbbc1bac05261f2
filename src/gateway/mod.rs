//! Gateway between the HTTP layer and the hosted application.
//!
//! # Data Flow
//! ```text
//! RequestHead + BodyReader
//!     → environ.rs (CGI-style variables, wsgi.input, wsgi.errors)
//!     → adapter.rs (call application, catch failures)
//!     → start_response.rs (status and headers registered, validated)
//!     → adapter.rs (commit at first chunk, stream body)
//!     → ResponseWriter
//! ```
//!
//! # Design Decisions
//! - The application is an explicit `Arc<dyn Application>` threaded through
//!   the dispatcher; there is no global application slot
//! - Response framing belongs to the server; applications cannot set
//!   hop-by-hop headers

pub mod adapter;
pub mod application;
pub mod environ;
pub mod start_response;
pub mod util;

pub use adapter::{AppFailure, GatewayAdapter, Invocation, ResponseOutcome};
pub use application::{AppError, Application, Body, BodyChunks};
pub use environ::{Environ, EnvironConfig, ErrorStream, Input};
pub use start_response::{GatewayError, ResponseHead, StartResponse};
