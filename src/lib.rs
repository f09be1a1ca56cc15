//! Hostname-translating reverse proxy library.
//!
//! Accepts requests addressed to test-site hostnames, rewrites them to
//! their production equivalents, validates the destination, and relays
//! the exchange with security-sensitive response fields rewritten back.

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod pipeline;

// Pipeline stages
pub mod forward;
pub mod guard;
pub mod resolver;
pub mod rules;
pub mod trust;

// Cross-cutting concerns
pub mod admin;
pub mod error;
pub mod lifecycle;
pub mod observability;

pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::shutdown::Shutdown;
pub use pipeline::Pipeline;
