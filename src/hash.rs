use sha2::{Digest, Sha256};

pub use crate::config::HASH_ALGORITHM;

/// SHA-256 of a byte payload as lowercase hex.
///
/// Used for both the unsigned snapshot (pre-hash) and the signed
/// artifact (post-hash). Empty input yields the digest of zero bytes.
pub fn digest(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Short prefix of a hex digest, safe to put in log lines.
pub fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
