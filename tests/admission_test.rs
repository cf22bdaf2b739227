//! End-to-end admission tests against a local metadata endpoint.

use actions_gate::module::{ModuleConfig, ModuleContract, ModuleStatus};
use actions_gate::modules::admission::{
    Admission, AdmissionGate, Downstream, FailurePolicy, GateConfig, GateHandler, GateListener,
    InboundConnection, RejectReason, TcpForwarder, UpstreamConfig,
};
use actions_gate::modules::allowlist::{
    AllowlistResolver, CacheConfig, FetchErrorKind, HttpMetaSource, SourceConfig,
};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Serve the same HTTP response to every request. `None` accepts and never
/// answers.
async fn meta_server(response: Option<(&'static str, &'static str)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((mut stream, _)) = listener.accept().await {
            let Some((status, body)) = response else {
                held.push(stream);
                continue;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let reply = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    format!("http://{addr}/meta")
}

fn source_config(url: String) -> SourceConfig {
    SourceConfig {
        url,
        request_timeout_secs: 1,
        ..SourceConfig::default()
    }
}

/// A connection from a fixed source address.
#[derive(Debug)]
struct Peer {
    addr: &'static str,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl InboundConnection for Peer {
    fn remote_addr(&self) -> String {
        self.addr.to_string()
    }

    async fn close_write(&mut self) -> io::Result<()> {
        Ok(())
    }

    async fn close(self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorder {
    forwarded: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl Downstream<Peer> for Recorder {
    async fn forward(&self, conn: Peer) {
        self.forwarded.lock().unwrap().push(conn.addr);
    }
}

struct Outcome {
    admission: Admission,
    closed: bool,
    forwarded: Vec<&'static str>,
}

async fn evaluate(
    response: Option<(&'static str, &'static str)>,
    additional: &[&str],
    peer: &'static str,
) -> Outcome {
    let url = meta_server(response).await;
    let source = HttpMetaSource::new(&source_config(url)).unwrap();
    let provider = Arc::new(AllowlistResolver::new(source, additional));
    let downstream = Arc::new(Recorder::default());
    let gate = AdmissionGate::new(provider, Arc::clone(&downstream), FailurePolicy::Closed);

    let closed = Arc::new(AtomicBool::new(false));
    let admission = gate
        .admit(Peer {
            addr: peer,
            closed: Arc::clone(&closed),
        })
        .await;

    let forwarded = downstream.forwarded.lock().unwrap().clone();
    Outcome {
        admission,
        closed: closed.load(Ordering::SeqCst),
        forwarded,
    }
}

const GITHUB_RANGE: Option<(&str, &str)> = Some(("200 OK", r#"{"actions": ["192.30.252.0/22"]}"#));

#[tokio::test]
async fn remote_range_forwards_matching_peer() {
    let outcome = evaluate(GITHUB_RANGE, &[], "192.30.252.5:50123").await;

    assert!(outcome.admission.is_forwarded());
    assert_eq!(outcome.forwarded, vec!["192.30.252.5:50123"]);
    assert!(!outcome.closed);
}

#[tokio::test]
async fn remote_range_closes_other_peer() {
    let outcome = evaluate(GITHUB_RANGE, &[], "8.8.8.8:50123").await;

    assert_eq!(
        outcome.admission,
        Admission::Rejected {
            reason: RejectReason::NoMatch
        }
    );
    assert!(outcome.forwarded.is_empty());
    assert!(outcome.closed);
}

#[tokio::test]
async fn static_range_applies_when_remote_list_is_empty() {
    let outcome = evaluate(
        Some(("200 OK", r#"{"actions": []}"#)),
        &["10.0.0.0/8"],
        "10.1.2.3:50123",
    )
    .await;

    assert!(outcome.admission.is_forwarded());
    assert!(!outcome.closed);
}

#[tokio::test]
async fn http_error_fails_closed_despite_static_match() {
    let outcome = evaluate(
        Some(("503 Service Unavailable", "{}")),
        &["10.0.0.0/8"],
        "10.1.2.3:50123",
    )
    .await;

    assert_eq!(
        outcome.admission,
        Admission::Rejected {
            reason: RejectReason::ResolveFailed(FetchErrorKind::Network)
        }
    );
    assert!(outcome.forwarded.is_empty());
    assert!(outcome.closed);
}

#[tokio::test]
async fn timeout_fails_closed_despite_static_match() {
    let outcome = evaluate(None, &["10.0.0.0/8"], "10.1.2.3:50123").await;

    assert_eq!(
        outcome.admission,
        Admission::Rejected {
            reason: RejectReason::ResolveFailed(FetchErrorKind::Network)
        }
    );
    assert!(outcome.closed);
}

#[tokio::test]
async fn invalid_remote_entry_is_skipped() {
    let outcome = evaluate(
        Some(("200 OK", r#"{"actions": ["not-a-cidr", "192.30.252.0/22"]}"#)),
        &[],
        "192.30.252.5:50123",
    )
    .await;

    assert!(outcome.admission.is_forwarded());
    assert_eq!(outcome.forwarded.len(), 1);
}

#[tokio::test]
async fn undecodable_body_fails_closed() {
    let outcome = evaluate(
        Some(("200 OK", r#"{"message": "Not Found"}"#)),
        &["10.0.0.0/8"],
        "10.1.2.3:50123",
    )
    .await;

    assert_eq!(
        outcome.admission,
        Admission::Rejected {
            reason: RejectReason::ResolveFailed(FetchErrorKind::Decode)
        }
    );
}

#[tokio::test]
async fn non_string_remote_entry_fails_closed() {
    let outcome = evaluate(
        Some(("200 OK", r#"{"actions": ["192.30.252.0/22", 42, null]}"#)),
        &[],
        "192.30.252.5:50123",
    )
    .await;

    assert_eq!(
        outcome.admission,
        Admission::Rejected {
            reason: RejectReason::ResolveFailed(FetchErrorKind::Decode)
        }
    );
    assert!(outcome.forwarded.is_empty());
    assert!(outcome.closed);
}

/// Echo every byte back.
async fn echo_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut read, mut write) = stream.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });
    addr
}

struct Service {
    addr: SocketAddr,
    handler: GateHandler<TcpForwarder>,
    shutdown: watch::Sender<bool>,
    server: tokio::task::JoinHandle<()>,
}

async fn start_service(body: &'static str, additional: &[&str], cache: CacheConfig) -> Service {
    let url = meta_server(Some(("200 OK", body))).await;
    let upstream = echo_upstream().await;

    let mut config = GateConfig::default();
    config.allowlist.source = source_config(url);
    config.allowlist.cache = cache;
    config.allowlist.additional_cidrs = additional.iter().map(ToString::to_string).collect();

    let forwarder = Arc::new(TcpForwarder::new(UpstreamConfig::new(upstream)));
    let mut handler = GateHandler::with_config(config, forwarder);
    handler.init(ModuleConfig::new()).unwrap();
    handler.start().unwrap();

    let listener = GateListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.bound_addr();
    let gate = handler.gate().unwrap();
    let (shutdown, rx) = watch::channel(false);
    let server = tokio::spawn(async move {
        listener.serve(gate, rx).await.unwrap();
    });

    Service {
        addr,
        handler,
        shutdown,
        server,
    }
}

impl Service {
    async fn stop(mut self) {
        self.shutdown.send(true).unwrap();
        self.server.await.unwrap();
        self.handler.stop().unwrap();
        assert_eq!(self.handler.status(), ModuleStatus::Stopped);
    }
}

#[tokio::test]
async fn admitted_client_reaches_upstream() {
    let service = start_service(r#"{"actions": []}"#, &["127.0.0.0/8"], CacheConfig::disabled()).await;

    let mut client = TcpStream::connect(service.addr).await.unwrap();
    client.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");
    drop(client);

    assert_eq!(service.handler.metrics().counters["connections_forwarded"], 1);
    service.stop().await;
}

#[tokio::test]
async fn rejected_client_is_closed() {
    let service = start_service(
        r#"{"actions": ["192.30.252.0/22"]}"#,
        &[],
        CacheConfig::default(),
    )
    .await;

    let mut client = TcpStream::connect(service.addr).await.unwrap();
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
        .await
        .unwrap();
    assert!(read.map(|n| n == 0).unwrap_or(true));

    let metrics = service.handler.metrics();
    assert_eq!(metrics.counters["connections_rejected"], 1);
    assert_eq!(metrics.counters["no_match_rejections"], 1);
    service.stop().await;
}
