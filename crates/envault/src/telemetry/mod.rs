//! Structured logging initialisation.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber once at startup.
//! - Pick format and default verbosity from the deployment environment.

mod init;

pub use init::init_telemetry;
