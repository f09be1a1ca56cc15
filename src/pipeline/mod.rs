//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! accepted request (peer address, headers, buffered body)
//!     → identity rewrite (trust policy)
//!     → hardcoded-response match (terminates early, skips the guard)
//!     → hostname rewrite + resolution
//!     → loopback/LAN guard
//!     → CORS staging
//!     → upstream forwarder
//!     → response (staged CORS merged in)
//! ```
//!
//! # Design Decisions
//! - Stages run in a fixed order; each returns an explicit outcome and
//!   the first terminating stage owns the response
//! - Known error classes are resolved in-stage (400/403/503/504/502);
//!   only unclassified faults reach the terminal error stage

pub mod context;
pub mod orchestrator;

pub use orchestrator::{Pipeline, PipelineBuildError};
