//! Immutable, process-lifetime host blocklist.
//!
//! Matching is substring, not equality, by design: a pattern like
//! `www.blocked.com` must also match `foo.www.blocked.com:443`.

#[derive(Debug, Clone)]
pub struct BlockList {
    patterns: Vec<String>,
}

impl BlockList {
    pub fn new(patterns: impl IntoIterator<Item = String>) -> Self {
        Self {
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn is_blocked(&self, host: &str) -> bool {
        self.patterns.iter().any(|pattern| host.contains(pattern.as_str()))
    }
}
