//! `LogEvent` plus the `LogSink` contract: `publish` must be infallible and
//! non-blocking from the caller's point of view. The default sink renders
//! events through `tracing`; callers that need true backpressure isolation
//! can swap in `ChannelLogSink`, which buffers onto a bounded channel and
//! drops the newest event on overflow rather than blocking the connection
//! task that produced it.

use std::net::SocketAddr;

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum CacheStatus {
    Hit,
    Miss,
    Connect,
}

impl CacheStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "CACHE_HIT",
            Self::Miss => "CACHE_MISS",
            Self::Connect => "CONNECT",
        }
    }
}

#[derive(Debug, Clone)]
pub enum LogEvent {
    Startup { port: u16 },
    RequestSeen {
        peer: SocketAddr,
        method: String,
        url: String,
        protocol: String,
        cache_status: CacheStatus,
    },
    CacheHit { fingerprint: String },
    CacheMiss { fingerprint: String },
    Error { context: String },
}

pub trait LogSink: Send + Sync {
    /// Publishes an event. Must never block or panic; the caller has
    /// already moved past the network I/O this event describes.
    fn publish(&self, event: LogEvent);
}

/// Renders events via `tracing` at call time. `tracing`'s own subscriber
/// machinery is responsible for any buffering; this sink never blocks on
/// I/O itself (the subscriber's writer may, but that is the subscriber's
/// contract, not ours).
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn publish(&self, event: LogEvent) {
        match event {
            LogEvent::Startup { port } => {
                tracing::info!("[+] Proxy server running on port {port}");
            }
            LogEvent::RequestSeen {
                peer,
                method,
                url,
                protocol,
                cache_status,
            } => {
                tracing::info!(
                    %peer,
                    "{method} {url} {protocol} | {}",
                    cache_status.as_str()
                );
            }
            LogEvent::CacheHit { fingerprint } => {
                tracing::debug!(fingerprint, "cache hit");
            }
            LogEvent::CacheMiss { fingerprint } => {
                tracing::debug!(fingerprint, "cache miss");
            }
            LogEvent::Error { context } => {
                tracing::error!("{context}");
            }
        }
    }
}

/// A non-blocking sink backed by a bounded channel: `publish` never
/// awaits, and a full channel drops the newest event rather than stalling
/// the connection task. A background task drains the channel into an
/// inner sink (typically [`TracingLogSink`]).
pub struct ChannelLogSink {
    tx: mpsc::Sender<LogEvent>,
}

impl ChannelLogSink {
    pub fn spawn(capacity: usize, inner: impl LogSink + 'static) -> Self {
        let (tx, mut rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                inner.publish(event);
            }
        });
        Self { tx }
    }
}

impl LogSink for ChannelLogSink {
    fn publish(&self, event: LogEvent) {
        if self.tx.try_send(event).is_err() {
            // Channel full or closed: drop-newest, per spec.md §9.
        }
    }
}
