//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages produce:
//!     → tracing events (structured fields, request ID in span)
//!     → metrics.rs (counters, histograms)
//!     → events.rs (fire-and-forget analytics posts)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Configured analytics sink (optional)
//! ```
//!
//! # Design Decisions
//! - Metrics are cheap (atomic increments behind the `metrics` facade)
//! - Event delivery is detached from the request path; a slow or dead
//!   sink never delays a response

pub mod events;
pub mod metrics;
