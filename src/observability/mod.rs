//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection handlers produce:
//!     → events.rs (ServerEvent reported to an EventSink)
//!         → logging.rs (structured log events via tracing)
//!         → metrics.rs (counters, gauges, histograms)
//! ```
//!
//! # Design Decisions
//! - Handlers depend only on `EventSink`; tests substitute their own sink
//! - Connection ID flows through every log line
//! - Metrics are cheap (facade calls, no exporter in the library)

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{EventSink, ServerEvent, TracingSink};
pub use logging::init_logging;
