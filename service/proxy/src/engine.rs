//! Per-connection request lifecycle engine: reads the client's first
//! request, classifies it, and mediates between the cache, the forwarding
//! path, and the bidirectional tunnel.
//!
//! ```text
//! START -> READ_REQUEST_LINE -> CLASSIFY
//! CLASSIFY in {BLOCKED, CONNECT, FORWARD_CACHEABLE}
//! BLOCKED           -> WRITE_403      -> DONE
//! CONNECT           -> PARSE_HOSTPORT -> DIAL -> WRITE_200_OR_502 -> TUNNEL -> DONE
//! FORWARD_CACHEABLE -> FINGERPRINT    -> CACHE_LOOKUP
//!   on hit  -> LOG_HIT  -> WRITE_BODY -> DONE
//!   on miss -> LOG_MISS -> PARSE_HOSTPATHPORT -> BLOCKLIST_CHECK
//!           -> DIAL -> FORWARD_REQUEST -> STREAM_RESPONSE_AND_MAYBE_CACHE -> DONE
//! ```
//! Any step may fail; failures branch straight to DONE per §7 of the spec
//! (silent close, or a 403/502 where the wire protocol calls for one).

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{instrument, Instrument};

use crate::blocklist::BlockList;
use crate::cache::Cache;
use crate::config::Config;
use crate::dialer::Dial;
use crate::error::{ProxyError, Result};
use crate::fingerprint;
use crate::logging::{CacheStatus, LogEvent, LogSink};

const READ_REQUEST_LIMIT: usize = 8192;
const INITIAL_RESPONSE_CAPACITY: usize = 16 * 1024;

const RESPONSE_403: &[u8] = b"HTTP/1.1 403 Forbidden\r\n\r\n";
const RESPONSE_502: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";
const RESPONSE_200_CONNECT: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

struct ParsedRequest {
    method: String,
    url: String,
    protocol: String,
    /// Byte offset into the raw buffer of the first `\r\n`, i.e. the start
    /// of whatever comes after the request line.
    tail_start: usize,
}

fn parse_request_line(buf: &[u8]) -> Option<ParsedRequest> {
    let crlf = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&buf[..crlf]).ok()?;
    let mut tokens = line.split_ascii_whitespace();
    let method = tokens.next()?;
    let url = tokens.next()?;
    let protocol = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    if method.len() > 15 || url.len() > 1023 || protocol.len() > 15 {
        return None;
    }
    Some(ParsedRequest {
        method: method.to_string(),
        url: url.to_string(),
        protocol: protocol.to_string(),
        tail_start: crlf,
    })
}

/// The raw body bytes after the `\r\n\r\n` header boundary, if the boundary
/// is present in the buffer read so far; empty otherwise. Only used to
/// fingerprint `POST` requests.
fn body_after_boundary(buf: &[u8]) -> &[u8] {
    match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(idx) => &buf[idx + 4..],
        None => &[],
    }
}

pub struct Engine {
    pub blocklist: Arc<BlockList>,
    pub cache: Arc<Cache>,
    pub dialer: Arc<dyn Dial>,
    pub log: Arc<dyn LogSink>,
    pub config: Arc<Config>,
}

impl Engine {
    #[instrument(skip(self, client), fields(%peer))]
    pub async fn handle_connection(&self, mut client: TcpStream, peer: SocketAddr) {
        if let Err(e) = self.try_handle_connection(&mut client, peer).await {
            self.log.publish(LogEvent::Error { context: e.to_string() });
        }
    }

    async fn try_handle_connection(&self, client: &mut TcpStream, peer: SocketAddr) -> Result<()> {
        let mut buf = vec![0u8; READ_REQUEST_LIMIT];
        let n = client.read(&mut buf).await.map_err(ProxyError::ClientIo)?;
        if n == 0 {
            return Ok(());
        }
        buf.truncate(n);

        let req = parse_request_line(&buf).ok_or(ProxyError::MalformedRequest { peer })?;

        if req.method == "CONNECT" {
            self.handle_connect(client, peer, &req).await
        } else {
            self.handle_forward(client, peer, &req, &buf).await
        }
    }

    async fn handle_connect(
        &self,
        client: &mut TcpStream,
        peer: SocketAddr,
        req: &ParsedRequest,
    ) -> Result<()> {
        let (host, port) = match req.url.split_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().unwrap_or(443)),
            None => (req.url.as_str(), 443),
        };

        self.log.publish(LogEvent::RequestSeen {
            peer,
            method: req.method.clone(),
            url: req.url.clone(),
            protocol: req.protocol.clone(),
            cache_status: CacheStatus::Connect,
        });

        if self.blocklist.is_blocked(host) {
            let _ = client.write_all(RESPONSE_403).await;
            return Err(ProxyError::BlockedHost { peer, host: host.to_string() });
        }

        let upstream = match self.dialer.dial(host, port).await {
            Ok(s) => s,
            Err(e) => {
                let _ = client.write_all(RESPONSE_502).await;
                return Err(e);
            }
        };

        client.write_all(RESPONSE_200_CONNECT).await.map_err(ProxyError::ClientIo)?;

        crate::tunnel::tunnel(client, upstream)
            .instrument(tracing::info_span!("tunnel", %peer, host))
            .await;
        Ok(())
    }

    async fn handle_forward(
        &self,
        client: &mut TcpStream,
        peer: SocketAddr,
        req: &ParsedRequest,
        raw: &[u8],
    ) -> Result<()> {
        let body = body_after_boundary(raw);
        let fp = fingerprint::compute(&req.method, &req.url, body);

        if let Some(cached) = self.cache.lookup(&fp) {
            // Blocklist is intentionally consulted AFTER the cache for
            // forward requests: a cached response for a now-blocked host
            // is still served. See spec.md §9's open question.
            self.log.publish(LogEvent::RequestSeen {
                peer,
                method: req.method.clone(),
                url: req.url.clone(),
                protocol: req.protocol.clone(),
                cache_status: CacheStatus::Hit,
            });
            self.log.publish(LogEvent::CacheHit { fingerprint: fp });
            client.write_all(&cached).await.map_err(ProxyError::ClientIo)?;
            return Ok(());
        }

        self.log.publish(LogEvent::RequestSeen {
            peer,
            method: req.method.clone(),
            url: req.url.clone(),
            protocol: req.protocol.clone(),
            cache_status: CacheStatus::Miss,
        });
        self.log.publish(LogEvent::CacheMiss { fingerprint: fp.clone() });

        let (host, path) = fingerprint::split_host_path(&req.url);
        let host = host.to_string();
        let path = path.to_string();

        if self.blocklist.is_blocked(&host) {
            let _ = client.write_all(RESPONSE_403).await;
            return Err(ProxyError::BlockedHost { peer, host });
        }

        // Forward requests always dial port 80 (spec.md §4.6); any port
        // named in the request's host component is not honored here.
        let mut upstream = self.dialer.dial(&host, 80).await?;

        let mut forwarded = format!("{} {} {}\r\n", req.method, path, req.protocol).into_bytes();
        forwarded.extend_from_slice(&raw[req.tail_start + 2..]);
        upstream.write_all(&forwarded).await.map_err(ProxyError::UpstreamIo)?;

        self.stream_response_and_maybe_cache(client, &mut upstream, &fp).await
    }

    async fn stream_response_and_maybe_cache(
        &self,
        client: &mut TcpStream,
        upstream: &mut TcpStream,
        fingerprint: &str,
    ) -> Result<()> {
        let mut response = Vec::with_capacity(INITIAL_RESPONSE_CAPACITY);
        let mut cacheable: Option<bool> = None;
        let mut read_buf = [0u8; READ_REQUEST_LIMIT];

        // `upstream_recv_timeout_s` (2 s) is the socket-level SO_RCVTIMEO
        // safety net behind the per-iteration readiness wait in the
        // original; every iteration here is gated by the 1 s wait alone.
        loop {
            let read = timeout(self.config.forward_readiness_wait(), upstream.read(&mut read_buf)).await;

            let n = match read {
                Ok(Ok(0)) | Ok(Err(_)) | Err(_) => break,
                Ok(Ok(n)) => n,
            };

            if client.write_all(&read_buf[..n]).await.is_err() {
                break;
            }

            if response.len() + n > response.capacity() {
                let mut new_cap = response.capacity().max(1);
                while new_cap < response.len() + n {
                    new_cap *= 2;
                }
                response.reserve(new_cap - response.capacity());
            }
            response.extend_from_slice(&read_buf[..n]);

            if cacheable.is_none() && find_header_boundary(&response).is_some() {
                cacheable = Some(
                    response.starts_with(b"HTTP/1.1 200") || response.starts_with(b"HTTP/1.0 200"),
                );
            }
        }

        if cacheable == Some(true) && !response.is_empty() {
            self.cache.insert(fingerprint.to_string(), response);
        }
        Ok(())
    }
}

fn find_header_boundary(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
