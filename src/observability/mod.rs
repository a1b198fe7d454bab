//! # Observability Infrastructure
//!
//! Structured logging for the bridge: subscriber setup, span macros and the
//! startup configuration summary.

pub mod logging;

pub use logging::{init_logging, log_config_info};
