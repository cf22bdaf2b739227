//! The lifecycle contract implemented by gate modules.
//!
//! A host (the bundled binary, or any proxy embedding the gate) drives a
//! module through `init` → `start` → `stop` and polls `status`/`metrics`.

use super::{ModuleConfig, ModuleManifest, ModuleResult, ModuleStatus};
use std::collections::BTreeMap;

/// Metrics payload containing module-specific metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Counter metrics (monotonically increasing).
    pub counters: BTreeMap<String, u64>,

    /// Gauge metrics (can go up and down).
    pub gauges: BTreeMap<String, f64>,
}

impl MetricsPayload {
    /// Creates a new empty metrics payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a counter metric.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Adds a gauge metric.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Formats metrics in Prometheus text format.
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut output = String::new();

        for (name, value) in &self.counters {
            output.push_str(&format!("{prefix}_{name} {value}\n"));
        }

        for (name, value) in &self.gauges {
            output.push_str(&format!("{prefix}_{name} {value}\n"));
        }

        output
    }
}

/// The contract that hosts use to manage a gate module.
///
/// # Lifecycle
///
/// 1. `manifest()` - Called to discover module capabilities
/// 2. `init()` - Initialize with configuration
/// 3. `start()` - Begin processing
/// 4. `status()` / `metrics()` - Ongoing monitoring
/// 5. `stop()` - Graceful shutdown
pub trait ModuleContract: Send + Sync {
    /// Returns the module's manifest describing its identity and capabilities.
    fn manifest(&self) -> ModuleManifest;

    /// Initializes the module with the provided configuration.
    ///
    /// The module should validate the configuration and prepare internal
    /// state, but should not start processing until `start()` is called.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::ConfigError` if the configuration is invalid.
    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()>;

    /// Starts the module's processing.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::StartFailed` if the module cannot start.
    /// Returns `ModuleError::InvalidState` if called before `init()`.
    fn start(&mut self) -> ModuleResult<()>;

    /// Stops the module gracefully.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::StopFailed` if graceful shutdown fails.
    fn stop(&mut self) -> ModuleResult<()>;

    /// Returns the current status of the module.
    fn status(&self) -> ModuleStatus;

    /// Returns the current metrics from the module.
    fn metrics(&self) -> MetricsPayload;

    /// Called periodically for liveness checks.
    ///
    /// The default implementation returns `true` if the module is operational.
    fn heartbeat(&self) -> bool {
        self.status().is_operational()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_output_is_sorted() {
        let mut metrics = MetricsPayload::new();
        metrics.counter("connections_rejected", 2);
        metrics.counter("connections_forwarded", 5);
        metrics.gauge("allowlist_ranges", 3.0);

        assert_eq!(
            metrics.to_prometheus("gate"),
            "gate_connections_forwarded 5\ngate_connections_rejected 2\ngate_allowlist_ranges 3\n"
        );
    }
}
