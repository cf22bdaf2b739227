//! # Admission Module
//!
//! Forwards a TCP connection to the next handler only when its source
//! address lies inside the allow-list; every other connection is closed.
//!
//! ## Features
//!
//! - Forward-or-close exactly once per connection, stopping at the first
//!   matching range
//! - Fail-closed by default when the allow-list cannot be fetched, with an
//!   optional static-only fallback
//! - Per-connection admission tasks behind a shared accept loop
//! - Implements `ModuleContract` for lifecycle management
//!
//! ## Configuration
//!
//! ```toml
//! [gate]
//! additionalCIDRs = ["10.0.0.0/8"]
//! failure_policy = "closed"
//!
//! [gate.source]
//! url = "https://api.github.com/meta"
//! request_timeout_secs = 10
//!
//! [gate.cache]
//! enabled = true
//! refresh_interval_secs = 300
//! ```

mod config;
mod connection;
mod downstream;
mod error;
mod gate;
mod handler;
mod listener;

pub use config::{FailurePolicy, GateConfig, UpstreamConfig};
pub use connection::{peer_ip, Connection, InboundConnection};
pub use downstream::{Downstream, ForwarderStats, TcpForwarder};
pub use error::{AdmissionError, AdmissionResult};
pub use gate::{Admission, AdmissionGate, GateStats, RejectReason};
pub use handler::GateHandler;
pub use listener::{GateListener, ListenerStats};
