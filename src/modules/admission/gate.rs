//! The admission decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use super::config::FailurePolicy;
use super::connection::{peer_ip, InboundConnection};
use super::downstream::Downstream;
use crate::modules::allowlist::{Allowlist, AllowlistProvider, CidrRange, FetchErrorKind};

/// Outcome of one admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The connection was handed to the downstream.
    Forwarded {
        /// The first range that contained the peer.
        range: CidrRange,
    },

    /// The connection was closed.
    Rejected {
        /// Why.
        reason: RejectReason,
    },
}

impl Admission {
    /// Whether the connection was forwarded.
    #[must_use]
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }
}

/// Reason a connection was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No range contains the peer, or the peer address is unparsable.
    NoMatch,

    /// The allow-list could not be obtained.
    ResolveFailed(FetchErrorKind),
}

/// Admission statistics.
#[derive(Debug, Default)]
pub struct GateStats {
    /// Connections evaluated.
    pub connections_checked: AtomicU64,
    /// Connections forwarded.
    pub connections_forwarded: AtomicU64,
    /// Connections closed.
    pub connections_rejected: AtomicU64,
    /// Closed because no range matched.
    pub no_match_rejections: AtomicU64,
    /// Allow-list resolution failures (regardless of policy).
    pub resolve_failures: AtomicU64,
    /// Resolution failures: request construction.
    pub request_build_errors: AtomicU64,
    /// Resolution failures: network, timeout or HTTP status.
    pub network_errors: AtomicU64,
    /// Resolution failures: undecodable response.
    pub decode_errors: AtomicU64,
    /// Resolution failures: cache past its staleness bound.
    pub stale_errors: AtomicU64,
}

impl GateStats {
    /// Create new stats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record_resolve_failure(&self, kind: FetchErrorKind) {
        self.resolve_failures.fetch_add(1, Ordering::Relaxed);
        let counter = match kind {
            FetchErrorKind::RequestBuild => &self.request_build_errors,
            FetchErrorKind::Network => &self.network_errors,
            FetchErrorKind::Decode => &self.decode_errors,
            FetchErrorKind::Stale => &self.stale_errors,
            // Invalid ranges are skipped while parsing and never fail a resolve.
            FetchErrorKind::InvalidRange => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_forwarded(&self) {
        self.connections_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self, reason: RejectReason) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
        if reason == RejectReason::NoMatch {
            self.no_match_rejections.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Decides the fate of each inbound connection.
///
/// Holds a shared reference to the downstream; it does not manage the
/// downstream's lifecycle.
pub struct AdmissionGate<D> {
    provider: Arc<dyn AllowlistProvider>,
    downstream: Arc<D>,
    failure_policy: FailurePolicy,
    static_fallback: Arc<Allowlist>,
    stats: GateStats,
}

impl<D> std::fmt::Debug for AdmissionGate<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGate")
            .field("failure_policy", &self.failure_policy)
            .field("static_ranges", &self.static_fallback.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl<D> AdmissionGate<D> {
    /// Create a gate.
    pub fn new(
        provider: Arc<dyn AllowlistProvider>,
        downstream: Arc<D>,
        failure_policy: FailurePolicy,
    ) -> Self {
        let static_fallback = Arc::new(Allowlist::from_ranges(provider.static_ranges().to_vec()));
        Self {
            provider,
            downstream,
            failure_policy,
            static_fallback,
            stats: GateStats::new(),
        }
    }

    /// Admission statistics.
    #[must_use]
    pub fn stats(&self) -> &GateStats {
        &self.stats
    }

    /// The configured failure policy.
    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// The downstream handler.
    #[must_use]
    pub fn downstream(&self) -> &Arc<D> {
        &self.downstream
    }

    /// Admit or reject one connection.
    ///
    /// The connection is either forwarded to the downstream or closed,
    /// exactly once. Evaluation stops at the first matching range. For a
    /// forwarded connection this returns after the downstream has finished
    /// with it.
    pub async fn admit<C>(&self, conn: C) -> Admission
    where
        C: InboundConnection,
        D: Downstream<C>,
    {
        self.stats.connections_checked.fetch_add(1, Ordering::Relaxed);
        let raw = conn.remote_addr();
        let peer = peer_ip(&raw);
        if peer.is_none() {
            debug!(peer = %raw, "Unable to parse source address");
        }

        let allowlist = match self.provider.resolve().await {
            Ok(list) => list,
            Err(e) => {
                let kind = e.kind();
                self.stats.record_resolve_failure(kind);
                match self.failure_policy {
                    FailurePolicy::Closed => {
                        warn!(peer = %raw, error = %e, "Allow-list unavailable, closing connection");
                        return self.reject(conn, &raw, RejectReason::ResolveFailed(kind)).await;
                    },
                    FailurePolicy::StaticOnly => {
                        warn!(
                            peer = %raw,
                            error = %e,
                            "Allow-list unavailable, evaluating static ranges only"
                        );
                        Arc::clone(&self.static_fallback)
                    },
                }
            },
        };

        let matched = peer.and_then(|ip| allowlist.find_match(ip)).cloned();
        match matched {
            Some(range) => {
                debug!(
                    peer = %raw,
                    range = %range,
                    origin = %range.origin(),
                    "Source address is allowed"
                );
                self.stats.record_forwarded();
                self.downstream.forward(conn).await;
                Admission::Forwarded { range }
            },
            None => {
                warn!(peer = %raw, "Source address is not allowed");
                self.reject(conn, &raw, RejectReason::NoMatch).await
            },
        }
    }

    async fn reject<C: InboundConnection>(
        &self,
        conn: C,
        raw: &str,
        reason: RejectReason,
    ) -> Admission {
        self.stats.record_rejected(reason);
        if let Err(e) = conn.close().await {
            debug!(peer = %raw, error = %e, "Error closing rejected connection");
        }
        Admission::Rejected { reason }
    }
}
