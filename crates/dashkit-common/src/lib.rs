//! # DashKit Common
//!
//! Logging setup shared by the DashKit offline layer and its tools.

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat, LoggingError};
