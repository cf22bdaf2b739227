//! Inbound connections as seen by the gate.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// A connection the gate can inspect and close.
///
/// The gate never reads or writes payload; it only needs the peer address
/// and a way to terminate the connection.
#[async_trait]
pub trait InboundConnection: Send + Sized + 'static {
    /// Raw remote address, usually `ip:port`.
    fn remote_addr(&self) -> String;

    /// Half-close: shut down the write direction.
    async fn close_write(&mut self) -> io::Result<()>;

    /// Close the connection entirely.
    async fn close(self) -> io::Result<()>;
}

/// Extract the peer IP from a raw remote-address string.
///
/// Accepts `ip:port`, `[v6]:port`, a bare IP and a bracketed IPv6 address.
/// Returns `None` for anything else; such peers match no range.
#[must_use]
pub fn peer_ip(raw: &str) -> Option<IpAddr> {
    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Some(addr.ip());
    }

    let host = raw
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(raw);
    host.parse().ok()
}

/// Global connection ID counter.
static CONNECTION_ID: AtomicU64 = AtomicU64::new(0);

/// An accepted TCP connection with metadata.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    created_at: Instant,
    id: u64,
}

impl Connection {
    /// Wrap an accepted stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer address cannot be determined.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        Ok(Self::from_parts(stream, peer_addr))
    }

    /// Wrap a stream whose peer address is already known (from `accept`).
    #[must_use]
    pub fn from_parts(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        Self {
            stream,
            peer_addr,
            created_at: Instant::now(),
            id: CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get connection age.
    #[must_use]
    pub fn age(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }
}

#[async_trait]
impl InboundConnection for Connection {
    fn remote_addr(&self) -> String {
        self.peer_addr.to_string()
    }

    async fn close_write(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    async fn close(mut self) -> io::Result<()> {
        match self.stream.shutdown().await {
            // The peer may already be gone.
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_peer_ip_forms() {
        assert_eq!(peer_ip("192.30.252.5:51234"), Some("192.30.252.5".parse().unwrap()));
        assert_eq!(peer_ip("192.30.252.5"), Some("192.30.252.5".parse().unwrap()));
        assert_eq!(peer_ip("[2001:db8::1]:443"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(peer_ip("[2001:db8::1]"), Some("2001:db8::1".parse().unwrap()));
        assert_eq!(peer_ip("2001:db8::1"), Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_peer_ip_malformed() {
        for raw in ["", "localhost:22", "300.1.1.1:22", "10.0.0.1:", "[10.0.0.1", "fe80::1%eth0"] {
            assert_eq!(peer_ip(raw), None, "{raw}");
        }
    }

    #[tokio::test]
    async fn test_connection_metadata_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut buf = Vec::new();
            // Returns once the server closes.
            stream.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let (server_stream, _) = listener.accept().await.unwrap();
        let conn = Connection::new(server_stream).unwrap();
        assert!(conn.remote_addr().starts_with("127.0.0.1:"));
        assert_eq!(peer_ip(&conn.remote_addr()), Some(conn.peer_addr().ip()));

        conn.close().await.unwrap();
        assert!(client.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_write_is_half_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_stream, peer) = listener.accept().await.unwrap();
        let mut conn = Connection::from_parts(server_stream, peer);

        conn.close_write().await.unwrap();
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);

        client.write_all(b"still open").await.unwrap();
        let mut read = [0u8; 10];
        conn.read_exact(&mut read).await.unwrap();
        assert_eq!(&read, b"still open");
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _a = TcpStream::connect(addr).await.unwrap();
        let (s1, p1) = listener.accept().await.unwrap();
        let _b = TcpStream::connect(addr).await.unwrap();
        let (s2, p2) = listener.accept().await.unwrap();

        let c1 = Connection::from_parts(s1, p1);
        let c2 = Connection::from_parts(s2, p2);
        assert_ne!(c1.id(), c2.id());
    }
}
