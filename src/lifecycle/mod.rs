//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Bind listener → Log reachable URLs → Serve
//!
//! Shutdown (shutdown.rs):
//!     Flag set → Stop accepting → Idle connections close → Drain in-flight → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second signal → Exit immediately
//! ```
//!
//! # Design Decisions
//! - The stop flag is cooperative: an in-flight request is never interrupted
//! - Shutdown has a timeout: remaining connections are abandoned after it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
