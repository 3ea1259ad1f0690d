//! Peer URL helpers.

const SECURE_SCHEME_SUFFIX: &str = "s://";
const SCHEME_SEPARATOR: &str = "://";

/// Whether a connection to `url` must be secured.
///
/// A secure scheme (`grpcs://`, `https://`) always wins, any other explicit
/// scheme means plaintext, and bare addresses are secured unless insecure
/// dialing is allowed.
pub fn attempt_secured(url: &str, allow_insecure: bool) -> bool {
    if url.to_ascii_lowercase().contains(SECURE_SCHEME_SUFFIX) {
        true
    } else if url.contains(SCHEME_SEPARATOR) {
        false
    } else {
        !allow_insecure
    }
}

/// Strips the `grpc://` or `grpcs://` scheme from `url`.
pub fn to_address(url: &str) -> &str {
    url.strip_prefix("grpcs://")
        .or_else(|| url.strip_prefix("grpc://"))
        .unwrap_or(url)
}
