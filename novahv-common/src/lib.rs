//! # novahv Common
//!
//! Shared logging and diagnostic utilities used by the novahv VM service
//! layer and the processes that embed it.
//!
//! ```rust
//! use novahv_common::{init_logging, log_success, log_vm};
//!
//! init_logging("info").unwrap();
//! log_success!("storage", "pool initialized");
//! log_vm!("start", "vm-123", "starting VM with 4GB RAM");
//! ```

pub mod logging;

pub use logging::{
    emoji, init_logging, init_logging_json, init_logging_production, log_system_diagnostics,
    LogEntry, LogStats, Loggable, TimedOperation,
};
