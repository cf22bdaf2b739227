//! # Module Contract
//!
//! The lifecycle interface the admission gate exposes to its host:
//! configuration, start/stop, status and metrics.

mod config;
mod contract;
mod error;
mod manifest;
mod status;

pub use config::ModuleConfig;
pub use contract::{MetricsPayload, ModuleContract};
pub use error::{ModuleError, ModuleResult};
pub use manifest::{Capability, ModuleManifest, SemVer};
pub use status::ModuleStatus;
