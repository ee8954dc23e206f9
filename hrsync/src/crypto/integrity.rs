//! Digest helpers. Fingerprints let logs and CLI output refer to a key without
//! printing it.

use sha2::{Digest, Sha256};

/// Hex characters kept from the digest when fingerprinting key material.
const FINGERPRINT_LEN: usize = 16;

/// Produces a raw SHA-256 digest of the provided bytes.
pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns the hexadecimal representation of a SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256_digest(data))
}

/// Short, log-safe identifier for key material.
pub fn fingerprint(data: &[u8]) -> String {
    let mut digest = sha256_hex(data);
    digest.truncate(FINGERPRINT_LEN);
    digest
}
