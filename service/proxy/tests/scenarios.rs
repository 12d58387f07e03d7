//! End-to-end scenarios against real loopback sockets: a fake upstream HTTP
//! server plays the role of the origin, and an [`Engine`] built the same
//! way `main.rs` builds one plays the role of the proxy. Each test drives
//! the proxy exactly as a client would, over a raw `TcpStream`.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use fwdproxy::blocklist::BlockList;
use fwdproxy::cache::Cache;
use fwdproxy::config::Config;
use fwdproxy::dialer::{Dial, Dialer};
use fwdproxy::engine::Engine;
use fwdproxy::error::{ProxyError, Result as ProxyResult};
use fwdproxy::logging::{LogEvent, LogSink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Discards every event; the scenarios assert on wire behavior, not logs.
struct NullLogSink;
impl LogSink for NullLogSink {
    fn publish(&self, _event: LogEvent) {}
}

/// A [`Dial`] that ignores whatever host/port it's asked for and always
/// connects to a fixed loopback address. The engine's forward path always
/// dials port 80, so scenario tests that need to reach a fake upstream
/// bound to an ephemeral loopback port inject this instead of a real
/// resolving `Dialer`.
struct FixedDialer(SocketAddr);

#[async_trait]
impl Dial for FixedDialer {
    async fn dial(&self, _host: &str, _port: u16) -> ProxyResult<TcpStream> {
        TcpStream::connect(self.0).await.map_err(|source| ProxyError::DialFailure {
            host: self.0.ip().to_string(),
            port: self.0.port(),
            source,
        })
    }
}

async fn spawn_fake_upstream(response: &'static [u8]) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let _ = stream.write_all(response).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}

/// Like `spawn_fake_upstream`, but hands back whatever bytes it received
/// off of the first connection through a oneshot channel, so a test can
/// assert on the request the engine actually forwarded.
async fn spawn_capturing_upstream(
    response: &'static [u8],
) -> (std::net::SocketAddr, tokio::sync::oneshot::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap_or(0);
        let _ = tx.send(buf[..n].to_vec());
        let _ = stream.write_all(response).await;
        let _ = stream.shutdown().await;
    });
    (addr, rx)
}

/// A bare-bones TCP echo server, for the CONNECT tunnel scenario.
async fn spawn_echo_upstream() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Builds an engine with a real resolving `Dialer`, suitable for scenarios
/// that dial an explicit `host:port` themselves (e.g. `CONNECT`).
fn build_engine(blocklist: Vec<&str>, cache_capacity: usize) -> Arc<Engine> {
    build_engine_with_dialer(
        blocklist,
        cache_capacity,
        Arc::new(Dialer::from_system_config().expect("resolver init")),
    )
}

/// Builds an engine with a fixed dial target, for forward-path scenarios:
/// the engine always dials port 80 for forwarded requests, so the fake
/// upstream's real ephemeral port can only be reached by overriding dial.
fn build_engine_forwarding_to(upstream: SocketAddr, blocklist: Vec<&str>, cache_capacity: usize) -> Arc<Engine> {
    build_engine_with_dialer(blocklist, cache_capacity, Arc::new(FixedDialer(upstream)))
}

fn build_engine_with_dialer(
    blocklist: Vec<&str>,
    cache_capacity: usize,
    dialer: Arc<dyn Dial>,
) -> Arc<Engine> {
    Arc::new(Engine {
        blocklist: Arc::new(BlockList::new(blocklist.into_iter().map(str::to_string))),
        cache: Arc::new(Cache::new(cache_capacity)),
        dialer,
        log: Arc::new(NullLogSink),
        config: Arc::new(Config::default()),
    })
}

/// Opens a loopback pair and hands the accepted half to the engine on a
/// background task, returning the connected half to drive as a client.
async fn drive(engine: Arc<Engine>) -> TcpStream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).await.unwrap();
    let (server_side, peer) = listener.accept().await.unwrap();
    tokio::spawn(async move {
        engine.handle_connection(server_side, peer).await;
    });
    client
}

async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
        }
    }
    out
}

#[tokio::test]
async fn blocked_forward_request_gets_403() {
    let engine = build_engine(vec!["blocked.example"], 10);
    let mut client = drive(engine).await;
    client
        .write_all(b"GET http://blocked.example/ HTTP/1.1\r\nHost: blocked.example\r\n\r\n")
        .await
        .unwrap();
    let resp = read_all(&mut client).await;
    assert!(resp.starts_with(b"HTTP/1.1 403"));
}

#[tokio::test]
async fn forwarded_request_preserves_headers_after_the_rewritten_request_line() {
    let (upstream, received) =
        spawn_capturing_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await;
    let engine = build_engine_forwarding_to(upstream, vec![], 10);
    let mut client = drive(engine).await;

    let req = format!(
        "GET http://{upstream}/page HTTP/1.1\r\nHost: {upstream}\r\nX-Test: yes\r\n\r\n"
    );
    client.write_all(req.as_bytes()).await.unwrap();
    let _ = read_all(&mut client).await;

    let forwarded = received.await.unwrap();
    let forwarded = String::from_utf8_lossy(&forwarded);
    let mut lines = forwarded.split("\r\n");
    assert_eq!(lines.next().unwrap(), "GET /page HTTP/1.1");
    let rest: Vec<&str> = lines.collect();
    assert!(rest.iter().any(|l| l.starts_with("Host:")), "missing Host header: {forwarded:?}");
    assert!(rest.iter().any(|l| l.starts_with("X-Test:")), "missing X-Test header: {forwarded:?}");
}

#[tokio::test]
async fn blocked_connect_gets_403() {
    let engine = build_engine(vec!["blocked.example"], 10);
    let mut client = drive(engine).await;
    client
        .write_all(b"CONNECT blocked.example:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let resp = read_all(&mut client).await;
    assert!(resp.starts_with(b"HTTP/1.1 403"));
}

#[tokio::test]
async fn cache_miss_then_hit_serves_identical_body_without_redialing() {
    let upstream = spawn_fake_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").await;
    let engine = build_engine_forwarding_to(upstream, vec![], 10);

    let mut first = drive(Arc::clone(&engine)).await;
    let req = format!("GET http://{upstream}/page HTTP/1.1\r\nHost: {upstream}\r\n\r\n");
    first.write_all(req.as_bytes()).await.unwrap();
    let miss_response = read_all(&mut first).await;
    assert!(miss_response.starts_with(b"HTTP/1.1 200 OK"));
    assert!(miss_response.ends_with(b"hi"));

    // The fake upstream is dropped here; a second hit must be served from
    // cache without dialing it again.
    let mut second = drive(Arc::clone(&engine)).await;
    second.write_all(req.as_bytes()).await.unwrap();
    let hit_response = read_all(&mut second).await;
    assert_eq!(hit_response, miss_response);
}

#[tokio::test]
async fn non_200_response_is_not_cached() {
    let upstream = spawn_fake_upstream(b"HTTP/1.1 404 Not Found\r\n\r\n").await;
    let engine = build_engine_forwarding_to(upstream, vec![], 10);

    let mut client = drive(Arc::clone(&engine)).await;
    let req = format!("GET http://{upstream}/missing HTTP/1.1\r\nHost: {upstream}\r\n\r\n");
    client.write_all(req.as_bytes()).await.unwrap();
    let resp = read_all(&mut client).await;
    assert!(resp.starts_with(b"HTTP/1.1 404"));
    assert!(engine.cache.is_empty());
}

#[tokio::test]
async fn lru_eviction_drops_the_oldest_fingerprint_first() {
    let upstream = spawn_fake_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nx").await;
    let engine = build_engine_forwarding_to(upstream, vec![], 2);

    for path in ["/a", "/b", "/c"] {
        let mut client = drive(Arc::clone(&engine)).await;
        let req = format!("GET http://{upstream}{path} HTTP/1.1\r\nHost: {upstream}\r\n\r\n");
        client.write_all(req.as_bytes()).await.unwrap();
        let _ = read_all(&mut client).await;
    }

    assert_eq!(engine.cache.len(), 2);
    assert!(engine.cache.lookup(&format!("{upstream}/a")).is_none());
    assert!(engine.cache.lookup(&format!("{upstream}/b")).is_some());
    assert!(engine.cache.lookup(&format!("{upstream}/c")).is_some());
}

#[tokio::test]
async fn connect_establishes_a_working_tunnel() {
    let upstream = spawn_echo_upstream().await;
    let engine = build_engine(vec![], 10);
    let mut client = drive(engine).await;

    let req = format!("CONNECT {upstream} HTTP/1.1\r\n\r\n");
    client.write_all(req.as_bytes()).await.unwrap();

    let mut established = [0u8; 39];
    client.read_exact(&mut established).await.unwrap();
    assert_eq!(&established, b"HTTP/1.1 200 Connection Established\r\n\r\n");

    client.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"ping");
}
