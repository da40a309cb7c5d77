//! Segment attestation manifest shape (§3 `AttestationManifest`, §4.3, §6).

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Fixed manifest schema version.
pub const MANIFEST_VERSION: &str = "1.0";

/// The only signature algorithm the manifest format recognizes. Any other
/// value in a parsed manifest is a verification failure (§4.3, §6).
pub const ALGORITHM_ED25519: &str = "ed25519";

/// A signed statement over a contiguous ledger segment, offline-verifiable
/// with no platform code running (§4.3).
///
/// Field order matches §6: `algorithm, chainId, createdAt, headHash,
/// publicKeyId, recordCount, segmentDigest, segmentName, seqEnd, seqStart,
/// signature, toolVersion, version`. `serde_json` with a `BTreeMap`
/// round-trip (as used by [`crate::record::canonical_json_bytes`]) is what
/// actually produces the sorted-key wire form; the struct field order here
/// is documentation, not the normative order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttestationManifest {
    /// Manifest schema version, always [`MANIFEST_VERSION`].
    pub version: String,
    /// Version of the tool that produced this manifest.
    pub tool_version: String,
    /// Chain the segment was cut from.
    pub chain_id: String,
    /// Human-readable segment file name.
    pub segment_name: String,
    /// First `seq` included (inclusive).
    pub seq_start: u64,
    /// Last `seq` included (inclusive).
    pub seq_end: u64,
    /// Number of records in the segment.
    pub record_count: u64,
    /// `recordHash` of the segment's last record, lowercase hex.
    pub head_hash: String,
    /// `SHA-256(segment bytes)`, lowercase hex.
    pub segment_digest: String,
    /// Ed25519 signature over the hex-ASCII `segment_digest` string
    /// (frozen Open Question resolution, see DESIGN.md), lowercase hex.
    pub signature: String,
    /// Always [`ALGORITHM_ED25519`]; any other value fails verification.
    pub algorithm: String,
    /// First 16 hex characters of `SHA-256(public key bytes)`.
    pub public_key_id: String,
    /// When the manifest was produced, epoch milliseconds.
    pub created_at: Timestamp,
}

/// A single named failure collected during offline verification (§4.3).
/// The verifier never throws; it accumulates these and reports `ok=false`
/// when any are present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationFailure {
    /// Which verification step failed.
    pub step: VerificationStep,
    /// Human-readable description, e.g. containing "digest mismatch" or
    /// "signature" per the S2 scenario's expected substrings.
    pub detail: String,
}

/// The ordered steps a segment verifier performs (§4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStep {
    /// JSONL could not be parsed into records.
    Parse,
    /// `validate_chain` reported a broken link.
    ChainValidity,
    /// Recomputed `segmentDigest` did not match the manifest.
    DigestMismatch,
    /// Ed25519 signature did not verify against the recomputed digest.
    SignatureInvalid,
    /// A manifest field did not cross-check against the parsed data.
    ManifestMismatch,
    /// The manifest named an algorithm other than `"ed25519"`.
    UnknownAlgorithm,
}

/// Summary statistics returned alongside verification failures.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationStats {
    /// Number of records parsed from the JSONL.
    pub record_count: u64,
    /// First `seq` seen.
    pub seq_start: Option<u64>,
    /// Last `seq` seen.
    pub seq_end: Option<u64>,
}

/// Result of an offline segment verification (§4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Whether every check passed.
    pub ok: bool,
    /// Accumulated failures, empty when `ok`.
    pub failures: Vec<VerificationFailure>,
    /// Summary stats gathered during verification.
    pub stats: VerificationStats,
}

/// Continuity check result over a sorted list of manifests (§4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContinuityReport {
    /// Whether every adjacent pair is contiguous and same-chain.
    pub continuous: bool,
    /// Description of the first gap or chain mismatch found, if any.
    pub break_at: Option<String>,
}
