//! Callback signature (`msg_signature`) computation and verification.
//!
//! The platform signs each callback with SHA-1 over the lexicographically
//! sorted concatenation of `[token, timestamp, nonce, encrypted_payload]`,
//! hex-encoded in lowercase.
//! See: <https://developer.work.weixin.qq.com/document/path/90930>

use sha1::{Digest, Sha1};
use subtle::ConstantTimeEq;

/// Computes the callback signature for the given inputs.
pub fn compute_signature(token: &str, timestamp: &str, nonce: &str, encrypted: &str) -> String {
    let mut parts = [token, timestamp, nonce, encrypted];
    parts.sort_unstable();

    let mut hasher = Sha1::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Verifies a callback signature.
///
/// Returns `false` on any mismatch, including a candidate of the wrong length
/// or case. Never panics.
pub fn verify_signature(
    token: &str,
    timestamp: &str,
    nonce: &str,
    encrypted: &str,
    candidate: &str,
) -> bool {
    let expected = compute_signature(token, timestamp, nonce, encrypted);
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}
