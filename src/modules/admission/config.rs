//! Configuration for the admission gate.

use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::modules::allowlist::AllowlistConfig;

/// What to do when the remote allow-list cannot be obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Close the connection, even if a static range would have matched.
    #[default]
    Closed,

    /// Evaluate the peer against the static `additionalCIDRs` only.
    StaticOnly,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::StaticOnly => write!(f, "static-only"),
        }
    }
}

/// Gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Allow-list sources and cache.
    #[serde(flatten)]
    pub allowlist: AllowlistConfig,

    /// Behaviour when the remote list is unavailable.
    pub failure_policy: FailurePolicy,
}

impl GateConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.allowlist.validate()
    }
}

/// Upstream that admitted connections are piped to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream address.
    pub address: SocketAddr,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::LOCALHOST, 22)))
    }
}

impl UpstreamConfig {
    /// Upstream at `address` with the default connect timeout.
    #[must_use]
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    /// Connect timeout as a duration.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.address.port() == 0 {
            return Err("upstream port must not be 0".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}
