//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//!
//! Rule files (JSON/YAML) load separately through rules::store and
//! reload via watcher.rs or per-request staleness checks.
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Rule tables are the only hot-reloadable state

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, GuardConfig, HostnameConfig, ListenerConfig, ObservabilityConfig, ProxyConfig,
    RulesConfig, TrustConfig, UpstreamConfig,
};
