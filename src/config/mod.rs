//! # Configuration System
//!
//! TOML configuration for the standalone gate service.
//!
//! ## Example Configuration
//!
//! ```toml
//! [service]
//! name = "actions-gate"
//! listen = "0.0.0.0:2222"
//!
//! [logging]
//! level = "info"
//! format = "json"
//!
//! [upstream]
//! address = "127.0.0.1:22"
//!
//! [gate]
//! additionalCIDRs = ["10.0.0.0/8"]
//! ```

mod error;
mod loader;
mod types;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use types::{LogFormat, LogLevel, LoggingConfig, ServiceConfig, ServiceSection};
