//! Next-stage handlers that take over admitted connections.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::config::UpstreamConfig;
use super::connection::{Connection, InboundConnection};
use super::error::{AdmissionError, AdmissionResult};

/// Takes ownership of an admitted connection.
#[async_trait]
pub trait Downstream<C: Send + 'static>: Send + Sync {
    /// Handle all further I/O on `conn`.
    async fn forward(&self, conn: C);
}

/// Forwarding statistics.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    /// Connections piped to the upstream.
    pub sessions: AtomicU64,
    /// Upstream connect failures.
    pub connect_failures: AtomicU64,
    /// Bytes sent from clients to the upstream.
    pub bytes_upstream: AtomicU64,
    /// Bytes sent from the upstream to clients.
    pub bytes_downstream: AtomicU64,
}

/// Pipes admitted connections to a fixed upstream address.
#[derive(Debug)]
pub struct TcpForwarder {
    config: UpstreamConfig,
    stats: ForwarderStats,
}

impl TcpForwarder {
    /// Create a forwarder.
    #[must_use]
    pub fn new(config: UpstreamConfig) -> Self {
        Self {
            config,
            stats: ForwarderStats::default(),
        }
    }

    /// Forwarding statistics.
    #[must_use]
    pub fn stats(&self) -> &ForwarderStats {
        &self.stats
    }

    async fn connect(&self) -> AdmissionResult<TcpStream> {
        let address = self.config.address;
        match tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(AdmissionError::UpstreamConnect { address, source }),
            Err(_) => Err(AdmissionError::UpstreamTimeout { address }),
        }
    }

    /// Connect to the upstream and copy bytes both ways until either side
    /// finishes. Returns `(client → upstream, upstream → client)` byte counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream is unreachable or the copy fails.
    pub async fn pipe(&self, conn: &mut Connection) -> AdmissionResult<(u64, u64)> {
        let mut upstream = self.connect().await?;
        self.stats.sessions.fetch_add(1, Ordering::Relaxed);
        let (up, down) = tokio::io::copy_bidirectional(conn, &mut upstream).await?;
        self.stats.bytes_upstream.fetch_add(up, Ordering::Relaxed);
        self.stats.bytes_downstream.fetch_add(down, Ordering::Relaxed);
        Ok((up, down))
    }
}

#[async_trait]
impl Downstream<Connection> for TcpForwarder {
    async fn forward(&self, mut conn: Connection) {
        let peer = conn.peer_addr();
        match self.pipe(&mut conn).await {
            Ok((up, down)) => {
                debug!(
                    %peer,
                    upstream = %self.config.address,
                    bytes_up = up,
                    bytes_down = down,
                    duration_ms = conn.age().as_millis() as u64,
                    "Session finished"
                );
            },
            Err(e) => {
                if matches!(
                    e,
                    AdmissionError::UpstreamConnect { .. } | AdmissionError::UpstreamTimeout { .. }
                ) {
                    self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                }
                warn!(%peer, error = %e, "Forwarding failed");
            },
        }

        if let Err(e) = conn.close().await {
            debug!(%peer, error = %e, "Error closing forwarded connection");
        }
    }
}
