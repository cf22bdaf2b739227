//! TCP accept loop feeding the gate.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::downstream::Downstream;
use super::error::{AdmissionError, AdmissionResult};
use super::gate::AdmissionGate;

/// Statistics for a listener.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub total_accepted: u64,

    /// Connections whose admission (or forwarded session) is in progress.
    pub active_connections: u64,

    /// Total accept errors.
    pub accept_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_accepted: AtomicU64,
    active_connections: AtomicU64,
    accept_errors: AtomicU64,
}

/// A bound TCP listener that admits every accepted connection through a
/// gate, each in its own task.
#[derive(Debug)]
pub struct GateListener {
    listener: TcpListener,
    bound_addr: SocketAddr,
    counters: Arc<Counters>,
}

impl GateListener {
    /// Bind to `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(address: SocketAddr) -> AdmissionResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| AdmissionError::Bind { address, source })?;
        let bound_addr = listener
            .local_addr()
            .map_err(|source| AdmissionError::Bind { address, source })?;

        info!(address = %bound_addr, "TCP listener bound");

        Ok(Self {
            listener,
            bound_addr,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Get the bound address.
    #[must_use]
    pub fn bound_addr(&self) -> SocketAddr {
        self.bound_addr
    }

    /// Get listener statistics.
    #[must_use]
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            total_accepted: self.counters.total_accepted.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            accept_errors: self.counters.accept_errors.load(Ordering::Relaxed),
        }
    }

    /// Accept connections until `shutdown` turns `true` (or its sender is
    /// dropped). Connections already being admitted keep running.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Accept`] on an unrecoverable accept error.
    pub async fn serve<D>(
        &self,
        gate: Arc<AdmissionGate<D>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> AdmissionResult<()>
    where
        D: Downstream<Connection> + 'static,
    {
        info!(address = %self.bound_addr, "Accept loop started");

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let conn = Connection::from_parts(stream, peer_addr);
                    self.counters.total_accepted.fetch_add(1, Ordering::Relaxed);
                    self.counters
                        .active_connections
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer_addr, conn_id = conn.id(), "Accepted connection");

                    let gate = Arc::clone(&gate);
                    let counters = Arc::clone(&self.counters);
                    tokio::spawn(async move {
                        let outcome = gate.admit(conn).await;
                        counters.active_connections.fetch_sub(1, Ordering::Relaxed);
                        debug!(peer = %peer_addr, forwarded = outcome.is_forwarded(), "Connection finished");
                    });
                },
                Err(e) => {
                    self.counters.accept_errors.fetch_add(1, Ordering::Relaxed);

                    if is_fatal_accept_error(&e) {
                        error!(error = %e, "Fatal accept error");
                        return Err(AdmissionError::Accept(e));
                    }

                    warn!(error = %e, "Transient accept error");
                },
            }
        }

        info!("Accept loop stopped");
        Ok(())
    }
}

/// Check if an accept error is fatal (unrecoverable).
fn is_fatal_accept_error(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::InvalidInput | ErrorKind::InvalidData | ErrorKind::NotFound
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::admission::config::FailurePolicy;
    use crate::modules::allowlist::{AllowlistResolver, FixedMetaSource};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Writes a greeting and closes.
    #[derive(Debug)]
    struct Greeter;

    #[async_trait]
    impl Downstream<Connection> for Greeter {
        async fn forward(&self, mut conn: Connection) {
            let _ = conn.write_all(b"welcome").await;
            let _ = conn.shutdown().await;
        }
    }

    fn gate(entries: &[&str]) -> Arc<AdmissionGate<Greeter>> {
        let provider = Arc::new(AllowlistResolver::new(
            FixedMetaSource::entries(entries.iter().copied()),
            Vec::<String>::new(),
        ));
        Arc::new(AdmissionGate::new(provider, Arc::new(Greeter), FailurePolicy::Closed))
    }

    async fn read_all(addr: SocketAddr) -> Vec<u8> {
        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
            .await
            .unwrap()
            .unwrap();
        buf
    }

    #[tokio::test]
    async fn test_listener_bind() {
        let listener = GateListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        assert_ne!(listener.bound_addr().port(), 0);
        assert_eq!(listener.stats(), ListenerStats::default());
    }

    #[tokio::test]
    async fn test_allowed_and_rejected_connections() {
        let listener = Arc::new(GateListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let addr = listener.bound_addr();
        let (tx, rx) = watch::channel(false);

        let server = {
            let listener = Arc::clone(&listener);
            let gate = gate(&["127.0.0.0/8"]);
            tokio::spawn(async move { listener.serve(gate, rx).await })
        };

        assert_eq!(read_all(addr).await, b"welcome");
        assert_eq!(read_all(addr).await, b"welcome");

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
        assert_eq!(listener.stats().total_accepted, 2);
    }

    #[tokio::test]
    async fn test_rejected_connection_is_closed_without_payload() {
        let listener = Arc::new(GateListener::bind("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let addr = listener.bound_addr();
        let (tx, rx) = watch::channel(false);

        let server = {
            let listener = Arc::clone(&listener);
            let gate = gate(&["192.30.252.0/22"]);
            tokio::spawn(async move { listener.serve(gate, rx).await })
        };

        assert!(read_all(addr).await.is_empty());

        drop(tx);
        server.await.unwrap().unwrap();
    }
}
