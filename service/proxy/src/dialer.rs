//! Resolves a hostname and opens a single outbound TCP connection. No
//! retry, no happy-eyeballs: the first resolved address is used.

use std::net::SocketAddr;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use tokio::net::TcpStream;
use tracing::instrument;

use crate::error::{ProxyError, Result};

/// A single outbound TCP connection attempt. Pulled out as a trait so the
/// engine can hold a `dyn Dial` and tests can substitute a fixed target
/// without standing up real DNS or honoring whatever port a request line
/// happens to name.
#[async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream>;
}

#[derive(Clone)]
pub struct Dialer {
    resolver: TokioAsyncResolver,
}

impl Dialer {
    /// Builds a resolver from the platform's `/etc/resolv.conf` (or
    /// platform equivalent), matching the teacher's `service/dns` crate's
    /// use of `hickory-resolver` for upstream lookups.
    pub fn from_system_config() -> anyhow::Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }

    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Ok(ip) = host.parse() {
            return Ok(SocketAddr::new(ip, port));
        }
        let lookup = self.resolver.lookup_ip(host).await.map_err(|e| ProxyError::DialFailure {
            host: host.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, e),
        })?;
        let ip = lookup.iter().next().ok_or_else(|| ProxyError::DialFailure {
            host: host.to_string(),
            port,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses returned"),
        })?;
        Ok(SocketAddr::new(ip, port))
    }
}

#[async_trait]
impl Dial for Dialer {
    #[instrument(skip(self), fields(host, port))]
    async fn dial(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = self.resolve(host, port).await?;
        TcpStream::connect(addr).await.map_err(|source| ProxyError::DialFailure {
            host: host.to_string(),
            port,
            source,
        })
    }
}
