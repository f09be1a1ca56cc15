//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, trace layer)
//!     → pipeline (identity, hostname rewrite, guard, rules, forward)
//!     → Send to client
//! ```

pub mod server;

pub use server::HttpServer;
