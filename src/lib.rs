//! Minimal HTTP/1.x server hosting a gateway-style application.
//!
//! A [`Listener`] accepts TCP (optionally TLS) connections, the
//! [`HttpServer`] dispatches each onto a blocking handler, and the handler
//! parses requests, calls the [`Application`] and writes its response.

pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::ServerConfig;
pub use gateway::{AppError, Application, Body, Environ, StartResponse};
pub use http::{HttpServer, ServerError};
pub use lifecycle::Shutdown;
pub use net::Listener;
