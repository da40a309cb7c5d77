//! Wire-format types, the audit taxonomy, and canonical hashing for the
//! governance/audit trust core.
//!
//! This crate holds only data and pure functions: the taxonomy, the audit
//! envelope factory, canonical JSON + `recordHash`/`segmentDigest` hashing,
//! and the plain data shapes (`GovernanceState`, `PolicyDecision`,
//! `SessionContext`, `ConflictRecord`, ...) shared across the stateful
//! engines in `trustcore-core`. Nothing here holds a lock or does I/O.
#![deny(missing_docs)]

use sha2::{Digest, Sha256};

/// Audit taxonomy: the closed, versioned event vocabulary.
pub mod taxonomy;
/// Audit actor/severity/envelope types and the envelope factory.
pub mod envelope;
/// Canonical JSON encoding and the hash-chained ledger record shape.
pub mod record;
/// Segment attestation manifest shape.
pub mod attestation;
/// Governance state machine data model.
pub mod governance;
/// Policy engine decision/explanation data model.
pub mod policy;
/// Multi-tenant session context data model.
pub mod session;
/// VFS path, conflict, and duplicate-group data model.
pub mod vfs;

/// A 32-byte SHA-256 digest, used for `recordHash`, `segmentDigest`, and
/// attestation statement hashes.
pub type Hash = [u8; 32];

/// Ed25519 public key bytes.
pub type PublicKey = [u8; 32];

/// Ed25519 signature bytes.
pub type SignatureBytes = [u8; 64];

/// Unix epoch milliseconds.
pub type Timestamp = u64;

/// All-zero hash used as the genesis `prevHash` for a chain.
pub const GENESIS_HASH: Hash = [0u8; 32];

/// Render a hash as lowercase hex, the wire encoding used throughout §6.
pub fn hex_lower(hash: &[u8]) -> String {
    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Parse a lowercase hex digest back into raw bytes.
pub fn hex_to_bytes(hex: &str) -> Result<Vec<u8>, HexError> {
    if hex.len() % 2 != 0 {
        return Err(HexError::OddLength);
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for chunk in hex.as_bytes().chunks(2) {
        let s = std::str::from_utf8(chunk).map_err(|_| HexError::NotAscii)?;
        let byte = u8::from_str_radix(s, 16).map_err(|_| HexError::BadDigit)?;
        out.push(byte);
    }
    Ok(out)
}

/// Errors decoding a hex string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HexError {
    /// Hex string had an odd number of characters.
    #[error("odd-length hex string")]
    OddLength,
    /// Hex string contained non-ASCII bytes.
    #[error("non-ascii byte in hex string")]
    NotAscii,
    /// Hex string contained a non-hex digit.
    #[error("invalid hex digit")]
    BadDigit,
}

/// SHA-256 over raw bytes, returned as a fixed-size digest.
pub fn sha256(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// First 16 hex characters of the SHA-256 digest over `bytes`, used for
/// `publicKeyId` and alert fingerprints.
pub fn short_fingerprint(bytes: &[u8]) -> String {
    let digest = sha256(bytes);
    hex_lower(&digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let bytes = sha256(b"hello");
        let hex = hex_lower(&bytes);
        assert_eq!(hex.len(), 64);
        let back = hex_to_bytes(&hex).unwrap();
        assert_eq!(back, bytes.to_vec());
    }

    #[test]
    fn short_fingerprint_is_16_chars() {
        let fp = short_fingerprint(b"DEGRADED:LEDGER_CHAIN_BROKEN");
        assert_eq!(fp.len(), 16);
    }
}
