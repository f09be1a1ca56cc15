//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Build rule store + pipeline → Listen
//!
//! Shutdown (shutdown.rs):
//!     SIGINT/SIGTERM → broadcast → server drains, watcher stops
//! ```

pub mod shutdown;
