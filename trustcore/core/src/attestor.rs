//! Segment attestation: Ed25519 signing and offline verification (§4.3).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use trustcore_spec::attestation::{
    AttestationManifest, ContinuityReport, VerificationFailure, VerificationOutcome,
    VerificationStats, VerificationStep, ALGORITHM_ED25519, MANIFEST_VERSION,
};
use trustcore_spec::record::{self, AuditRecord};
use trustcore_spec::{hex_lower, hex_to_bytes, short_fingerprint, Timestamp};

/// Build tool version stamped on manifests produced by this crate.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Supplies Ed25519 signing material. Polymorphic over a deterministic
/// test provider and an environment-injected production provider (§4.3).
pub trait KeyProvider: Send + Sync {
    /// The signing keypair used to attest segments.
    fn signing_key_pair(&self) -> &SigningKey;

    /// The public key half of the signing keypair.
    fn public_key(&self) -> VerifyingKey {
        self.signing_key_pair().verifying_key()
    }

    /// First 16 hex characters of `SHA-256(public key bytes)` (§4.3).
    fn public_key_id(&self) -> String {
        short_fingerprint(&self.public_key().to_bytes())
    }
}

/// A fixed, reproducible key provider for tests and local development.
/// Never use in production: the key is derived from a constant seed.
pub struct DeterministicTestKeyProvider {
    key: SigningKey,
}

impl DeterministicTestKeyProvider {
    /// Derive a signing key deterministically from `seed`.
    pub fn new(seed: [u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(&seed),
        }
    }
}

impl KeyProvider for DeterministicTestKeyProvider {
    fn signing_key_pair(&self) -> &SigningKey {
        &self.key
    }
}

/// A key provider backed by `ATTESTATION_PRIVATE_KEY` (hex-encoded Ed25519
/// seed bytes), per §6's environment configuration.
pub struct EnvironmentKeyProvider {
    key: SigningKey,
}

/// Errors constructing an [`EnvironmentKeyProvider`].
#[derive(Debug, thiserror::Error)]
pub enum KeyProviderError {
    /// `ATTESTATION_PRIVATE_KEY` was not set.
    #[error("ATTESTATION_PRIVATE_KEY is not set")]
    Missing,
    /// The hex value could not be decoded, or was not 32 bytes.
    #[error("invalid ATTESTATION_PRIVATE_KEY: {0}")]
    Invalid(String),
}

impl EnvironmentKeyProvider {
    /// Load the signing key from the `ATTESTATION_PRIVATE_KEY` environment
    /// variable.
    pub fn from_env() -> Result<Self, KeyProviderError> {
        let hex = std::env::var("ATTESTATION_PRIVATE_KEY").map_err(|_| KeyProviderError::Missing)?;
        Self::from_hex(&hex)
    }

    /// Load the signing key from an explicit hex string (used by tests and
    /// by `from_env`).
    pub fn from_hex(hex: &str) -> Result<Self, KeyProviderError> {
        let bytes = hex_to_bytes(hex).map_err(|e| KeyProviderError::Invalid(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyProviderError::Invalid("expected 32 bytes".to_string()))?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }
}

impl KeyProvider for EnvironmentKeyProvider {
    fn signing_key_pair(&self) -> &SigningKey {
        &self.key
    }
}

/// Sign a cut segment, producing its attestation manifest (§4.3).
///
/// The signed message is the lowercase hex-ASCII `segmentDigest` string,
/// not the raw 32 digest bytes (frozen Open Question resolution, see
/// DESIGN.md), so an external verifier holding only the JSON manifest can
/// reproduce the signed message.
pub fn sign_segment(
    segment: &record::Segment,
    segment_name: impl Into<String>,
    key_provider: &dyn KeyProvider,
    created_at: Timestamp,
) -> AttestationManifest {
    let digest_hex = hex_lower(&segment.segment_digest);
    let signature: Signature = key_provider.signing_key_pair().sign(digest_hex.as_bytes());
    AttestationManifest {
        version: MANIFEST_VERSION.to_string(),
        tool_version: TOOL_VERSION.to_string(),
        chain_id: segment.chain_id.clone(),
        segment_name: segment_name.into(),
        seq_start: segment.seq_start,
        seq_end: segment.seq_end,
        record_count: segment.record_count,
        head_hash: hex_lower(&segment.head_hash),
        segment_digest: digest_hex,
        signature: hex_lower(&signature.to_bytes()),
        algorithm: ALGORITHM_ED25519.to_string(),
        public_key_id: key_provider.public_key_id(),
        created_at,
    }
}

fn fail(
    outcome: &mut VerificationOutcome,
    step: VerificationStep,
    detail: impl Into<String>,
) {
    outcome.ok = false;
    outcome.failures.push(VerificationFailure {
        step,
        detail: detail.into(),
    });
}

/// Verify a segment offline: no ledger access, no platform code running,
/// just `jsonl`, `manifest`, and `public_key` (§4.3). Never panics; every
/// failure is collected and returned.
pub fn verify_segment(
    jsonl: &[u8],
    manifest: &AttestationManifest,
    public_key: &VerifyingKey,
) -> VerificationOutcome {
    let mut outcome = VerificationOutcome {
        ok: true,
        ..Default::default()
    };

    if manifest.algorithm != ALGORITHM_ED25519 {
        fail(
            &mut outcome,
            VerificationStep::UnknownAlgorithm,
            format!("unknown signature algorithm {:?}", manifest.algorithm),
        );
        return outcome;
    }

    let wire_values = match record::parse_jsonl(jsonl) {
        Ok(values) => values,
        Err(err) => {
            fail(&mut outcome, VerificationStep::Parse, format!("JSONL parse failed: {err}"));
            return outcome;
        }
    };
    let mut records = Vec::with_capacity(wire_values.len());
    for value in &wire_values {
        let decoded = match serde_json::from_value::<WireRecord>(value.clone()) {
            Ok(w) => w,
            Err(err) => {
                fail(&mut outcome, VerificationStep::Parse, format!("record decode failed: {err}"));
                return outcome;
            }
        };
        match decoded.into_record() {
            Ok(record) => records.push(record),
            Err(err) => {
                fail(&mut outcome, VerificationStep::Parse, format!("record decode failed: {err}"));
                return outcome;
            }
        }
    }

    outcome.stats = VerificationStats {
        record_count: records.len() as u64,
        seq_start: records.first().map(|r| r.seq),
        seq_end: records.last().map(|r| r.seq),
    };

    let validity = record::validate_chain(&records);
    if !validity.valid {
        fail(
            &mut outcome,
            VerificationStep::ChainValidity,
            validity.error.unwrap_or_else(|| "chain validation failed".to_string()),
        );
    }

    let recomputed_digest = Sha256::digest(jsonl);
    let recomputed_hex = hex_lower(&recomputed_digest);
    if recomputed_hex != manifest.segment_digest {
        fail(
            &mut outcome,
            VerificationStep::DigestMismatch,
            format!(
                "digest mismatch: manifest has {}, recomputed {}",
                manifest.segment_digest, recomputed_hex
            ),
        );
    }

    match hex_to_bytes(&manifest.signature)
        .ok()
        .and_then(|b| <[u8; 64]>::try_from(b).ok())
        .map(|bytes: [u8; 64]| Signature::from_bytes(&bytes))
    {
        Some(signature) => {
            if public_key
                .verify(manifest.segment_digest.as_bytes(), &signature)
                .is_err()
            {
                fail(
                    &mut outcome,
                    VerificationStep::SignatureInvalid,
                    "signature does not verify against recomputed digest",
                );
            }
        }
        None => fail(
            &mut outcome,
            VerificationStep::SignatureInvalid,
            "signature field is not a valid 64-byte hex string",
        ),
    }

    if let (Some(first), Some(last)) = (records.first(), records.last()) {
        if first.seq != manifest.seq_start
            || last.seq != manifest.seq_end
            || records.len() as u64 != manifest.record_count
            || first.chain_id != manifest.chain_id
            || hex_lower(&last.record_hash) != manifest.head_hash
        {
            fail(
                &mut outcome,
                VerificationStep::ManifestMismatch,
                "manifest seqStart/seqEnd/recordCount/chainId/headHash do not match parsed data",
            );
        }
    }

    outcome
}

/// A parsed wire-format record (alphabetical JSON keys, §6), used only to
/// decode segment JSONL without assuming the producer's struct layout.
#[derive(serde::Deserialize)]
struct WireRecord {
    #[serde(rename = "chainId")]
    chain_id: String,
    payload: trustcore_spec::envelope::AuditEventEnvelope,
    #[serde(rename = "prevHash")]
    prev_hash: String,
    #[serde(rename = "recordHash")]
    record_hash: String,
    #[serde(rename = "recordedAt")]
    recorded_at: u64,
    seq: u64,
}

impl WireRecord {
    fn into_record(self) -> Result<AuditRecord, String> {
        let prev_hash = hex_to_bytes(&self.prev_hash)
            .map_err(|e| e.to_string())?
            .try_into()
            .map_err(|_| "prevHash is not 32 bytes".to_string())?;
        let record_hash = hex_to_bytes(&self.record_hash)
            .map_err(|e| e.to_string())?
            .try_into()
            .map_err(|_| "recordHash is not 32 bytes".to_string())?;
        Ok(AuditRecord {
            chain_id: self.chain_id,
            seq: self.seq,
            prev_hash,
            payload: self.payload,
            recorded_at: self.recorded_at,
            record_hash,
        })
    }
}

/// Verify that a sorted-by-`seqStart` list of manifests forms an unbroken,
/// same-chain sequence (§4.3 continuity check).
pub fn check_continuity(manifests: &[AttestationManifest]) -> ContinuityReport {
    for window in manifests.windows(2) {
        let [prev, curr] = window else { unreachable!() };
        if prev.chain_id != curr.chain_id {
            return ContinuityReport {
                continuous: false,
                break_at: Some(format!(
                    "chain id changed between segments {} and {}",
                    prev.segment_name, curr.segment_name
                )),
            };
        }
        if prev.seq_end + 1 != curr.seq_start {
            return ContinuityReport {
                continuous: false,
                break_at: Some(format!(
                    "gap between {} (seqEnd={}) and {} (seqStart={})",
                    prev.segment_name, prev.seq_end, curr.segment_name, curr.seq_start
                )),
            };
        }
    }
    ContinuityReport {
        continuous: true,
        break_at: None,
    }
}
