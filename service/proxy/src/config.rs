//! Process configuration: defaults, an optional YAML file, and CLI
//! overrides, in that order of increasing precedence.

use std::{path::Path, time::Duration};

use serde::Deserialize;

/// Default blocklist, matched verbatim from spec.
pub const DEFAULT_BLOCKLIST: &[&str] =
    &["www.blocked.com", "example-bad-site.com", "www.wikipedia.org"];

pub const DEFAULT_LISTEN_PORT: u16 = 8080;
pub const DEFAULT_CACHE_CAPACITY: usize = 10;
pub const DEFAULT_UPSTREAM_RECV_TIMEOUT_S: u64 = 2;
pub const DEFAULT_FORWARD_READINESS_WAIT_S: u64 = 1;
pub const LISTEN_BACKLOG: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_port: u16,
    pub cache_capacity: usize,
    pub blocklist: Vec<String>,
    pub upstream_recv_timeout_s: u64,
    pub forward_readiness_wait_s: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            blocklist: DEFAULT_BLOCKLIST.iter().map(|s| s.to_string()).collect(),
            upstream_recv_timeout_s: DEFAULT_UPSTREAM_RECV_TIMEOUT_S,
            forward_readiness_wait_s: DEFAULT_FORWARD_READINESS_WAIT_S,
        }
    }
}

impl Config {
    /// Loads a YAML config file, falling back to defaults for any field the
    /// file omits. A missing file is not an error: defaults apply.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        match std::fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to read config file {}", path.display()))
            }
        }
    }

    /// Applies `PROXY_*` environment overrides on top of whatever the file
    /// (or defaults) produced. Precedence is file < env < CLI; CLI flags
    /// are applied by the caller after this.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parsed("PROXY_LISTEN_PORT") {
            self.listen_port = v;
        }
        if let Some(v) = env_parsed("PROXY_CACHE_CAPACITY") {
            self.cache_capacity = v;
        }
        if let Some(v) = env_parsed("PROXY_UPSTREAM_RECV_TIMEOUT_S") {
            self.upstream_recv_timeout_s = v;
        }
        if let Some(v) = env_parsed("PROXY_FORWARD_READINESS_WAIT_S") {
            self.forward_readiness_wait_s = v;
        }
    }

    pub fn upstream_recv_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_recv_timeout_s)
    }

    pub fn forward_readiness_wait(&self) -> Duration {
        Duration::from_secs(self.forward_readiness_wait_s)
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
