//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline, controller, forwarder:
//!     → logging.rs (tracing events, fmt or JSON output)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout log shipping
//!     → Prometheus scrape of the exporter listener
//! ```
//!
//! # Design Decisions
//! - Request ID (from the request-id layer) is part of every request span
//! - Metrics are cheap and never fail the request path

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
