//! Cache key derivation (fingerprinting). Pure, allocation-only functions so
//! the fingerprint can be computed before any network I/O and reused as the
//! `Cache` key.

/// Splits a request target into `(host, path)` after stripping an optional
/// `http://` scheme, defaulting an absent path to `/`. Used both to build
/// the normalized URL for fingerprinting and to recompose the forwarded
/// request line with the target rewritten to `path`.
pub fn split_host_path(url: &str) -> (&str, &str) {
    let rest = url.strip_prefix("http://").unwrap_or(url);
    match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    }
}

/// `host + path` after stripping an optional `http://` scheme and defaulting
/// an absent path to `/`.
pub fn normalize_url(url: &str) -> String {
    let (host, path) = split_host_path(url);
    format!("{host}{path}")
}

/// Derives the cache fingerprint for a parsed request, per spec:
/// - `GET`: the normalized URL alone.
/// - `POST`: normalized URL, a space, then the raw request body bytes
///   (lossily decoded; the cache treats the fingerprint as opaque text).
/// - any other non-CONNECT method: `METHOD normalized_url`.
///
/// `CONNECT` must never reach this function; callers branch on method
/// before fingerprinting.
pub fn compute(method: &str, url: &str, body: &[u8]) -> String {
    debug_assert_ne!(method, "CONNECT", "CONNECT requests are never fingerprinted");
    let normalized = normalize_url(url);
    match method {
        "GET" => normalized,
        "POST" => {
            let body_text = String::from_utf8_lossy(body);
            format!("{normalized} {body_text}")
        }
        other => format!("{other} {normalized}"),
    }
}
