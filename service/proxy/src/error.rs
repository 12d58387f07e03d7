//! Error taxonomy for the request lifecycle engine.
//!
//! None of these are retried and none are surfaced to the client beyond the
//! 403/502 responses already specified in the wire protocol; they exist so
//! that each branch of the state machine can be logged with enough context
//! to debug, per-connection, without ever aborting the accept loop.

use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed request line from {peer}")]
    MalformedRequest { peer: SocketAddr },

    #[error("blocked host {host:?} requested by {peer}")]
    BlockedHost { peer: SocketAddr, host: String },

    #[error("failed to dial {host}:{port}: {source}")]
    DialFailure {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream I/O error: {0}")]
    UpstreamIo(#[source] std::io::Error),

    #[error("client I/O error: {0}")]
    ClientIo(#[source] std::io::Error),

    #[error("response buffer exceeded available memory")]
    ResourceExhaustion,
}

pub type Result<T> = std::result::Result<T, ProxyError>;
