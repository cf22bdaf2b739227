//! Admission gate packaged as a managed module.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::module::{
    Capability, MetricsPayload, ModuleConfig, ModuleContract, ModuleError, ModuleManifest,
    ModuleResult, ModuleStatus,
};
use crate::modules::allowlist::{
    AllowlistProvider, AllowlistResolver, CachedAllowlist, HttpMetaSource, RefreshHandle,
};

use super::config::GateConfig;
use super::gate::AdmissionGate;

/// Module wrapping an [`AdmissionGate`] in front of downstream `D`.
pub struct GateHandler<D> {
    /// Current status.
    status: ModuleStatus,

    /// Gate configuration.
    config: GateConfig,

    /// Handler admitted connections are passed to.
    downstream: Arc<D>,

    /// Running gate.
    gate: Option<Arc<AdmissionGate<D>>>,

    /// Shared allow-list, when caching is enabled.
    cache: Option<Arc<CachedAllowlist>>,

    /// Background refresh task.
    refresh: Option<RefreshHandle>,

    /// Start time.
    started_at: Option<Instant>,
}

impl<D> std::fmt::Debug for GateHandler<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateHandler")
            .field("status", &self.status)
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl<D> GateHandler<D> {
    /// Create a handler with the default configuration.
    #[must_use]
    pub fn new(downstream: Arc<D>) -> Self {
        Self::with_config(GateConfig::default(), downstream)
    }

    /// Create a handler with the given configuration.
    #[must_use]
    pub fn with_config(config: GateConfig, downstream: Arc<D>) -> Self {
        Self {
            status: ModuleStatus::Initializing,
            config,
            downstream,
            gate: None,
            cache: None,
            refresh: None,
            started_at: None,
        }
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// The running gate, available between `start` and `stop`.
    #[must_use]
    pub fn gate(&self) -> Option<Arc<AdmissionGate<D>>> {
        self.gate.clone()
    }

    fn uptime_secs(&self) -> u64 {
        self.started_at.map_or(0, |t| t.elapsed().as_secs())
    }
}

impl<D: Send + Sync + 'static> ModuleContract for GateHandler<D> {
    fn manifest(&self) -> ModuleManifest {
        ModuleManifest::builder("actions-gate")
            .description("Admits TCP connections from GitHub Actions runner ranges")
            .version(0, 1, 0)
            .capabilities([
                Capability::TcpListener,
                Capability::AdmissionControl,
                Capability::RemoteAllowlist,
                Capability::Metrics,
            ])
            .build()
    }

    fn init(&mut self, config: ModuleConfig) -> ModuleResult<()> {
        info!("Initializing admission gate");

        if matches!(self.status, ModuleStatus::Running | ModuleStatus::Degraded { .. }) {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Initializing or Stopped".to_string(),
            });
        }

        let gate_config: GateConfig = match config.raw_config() {
            Some(raw) => toml::from_str(raw)
                .map_err(|e| ModuleError::ConfigError(format!("Invalid gate config: {e}")))?,
            None => self.config.clone(),
        };
        gate_config.validate().map_err(ModuleError::ConfigError)?;

        self.config = gate_config;
        self.status = ModuleStatus::Initializing;

        info!(
            additional_cidrs = self.config.allowlist.additional_cidrs.len(),
            failure_policy = %self.config.failure_policy,
            cache = self.config.allowlist.cache.enabled,
            "Admission gate initialized"
        );
        Ok(())
    }

    fn start(&mut self) -> ModuleResult<()> {
        info!("Starting admission gate");

        if self.status != ModuleStatus::Initializing {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Initializing".to_string(),
            });
        }

        let allowlist = &self.config.allowlist;
        if allowlist.cache.enabled && tokio::runtime::Handle::try_current().is_err() {
            return Err(ModuleError::StartFailed(
                "allow-list cache requires a tokio runtime".to_string(),
            ));
        }

        let source = HttpMetaSource::new(&allowlist.source)
            .map_err(|e| ModuleError::StartFailed(e.to_string()))?;
        let resolver = AllowlistResolver::new(source, &allowlist.additional_cidrs);

        let provider: Arc<dyn AllowlistProvider> = if allowlist.cache.enabled {
            let cache = Arc::new(CachedAllowlist::new(resolver, &allowlist.cache));
            self.refresh = Some(cache.spawn_refresh());
            self.cache = Some(Arc::clone(&cache));
            cache
        } else {
            info!("Allow-list cache disabled, fetching per connection");
            Arc::new(resolver)
        };

        self.gate = Some(Arc::new(AdmissionGate::new(
            provider,
            Arc::clone(&self.downstream),
            self.config.failure_policy,
        )));
        self.started_at = Some(Instant::now());
        self.status = ModuleStatus::Running;

        info!(endpoint = %allowlist.source.url, "Admission gate started");
        Ok(())
    }

    fn stop(&mut self) -> ModuleResult<()> {
        info!("Stopping admission gate");

        if !self.status.is_operational() {
            return Err(ModuleError::InvalidState {
                current: self.status.to_string(),
                expected: "Running".to_string(),
            });
        }

        if let Some(refresh) = self.refresh.take() {
            refresh.stop();
        }
        self.cache = None;
        self.gate = None;
        self.status = ModuleStatus::Stopped;

        info!("Admission gate stopped");
        Ok(())
    }

    fn status(&self) -> ModuleStatus {
        if self.status != ModuleStatus::Running {
            return self.status.clone();
        }

        match self.cache.as_ref().and_then(|c| c.last_error()) {
            Some(e) => ModuleStatus::Degraded {
                reason: format!("allow-list refresh failing: {e}"),
            },
            None => ModuleStatus::Running,
        }
    }

    fn metrics(&self) -> MetricsPayload {
        let mut metrics = MetricsPayload::new();

        if let Some(gate) = &self.gate {
            let stats = gate.stats();
            for (name, counter) in [
                ("connections_checked", &stats.connections_checked),
                ("connections_forwarded", &stats.connections_forwarded),
                ("connections_rejected", &stats.connections_rejected),
                ("no_match_rejections", &stats.no_match_rejections),
                ("resolve_failures", &stats.resolve_failures),
                ("request_build_errors", &stats.request_build_errors),
                ("network_errors", &stats.network_errors),
                ("decode_errors", &stats.decode_errors),
                ("stale_errors", &stats.stale_errors),
            ] {
                metrics.counter(name, counter.load(Ordering::Relaxed));
            }
        }

        if let Some(cache) = &self.cache {
            let stats = cache.stats();
            metrics.counter("cache_refreshes", stats.refreshes.load(Ordering::Relaxed));
            metrics.counter(
                "cache_refresh_failures",
                stats.refresh_failures.load(Ordering::Relaxed),
            );
            metrics.counter("cache_hits", stats.hits.load(Ordering::Relaxed));
            metrics.gauge(
                "allowlist_ranges",
                cache.snapshot_len().unwrap_or(0) as f64,
            );
        }

        metrics.gauge("uptime_secs", self.uptime_secs() as f64);
        metrics
    }
}
