//! Canonical JSON, the hash-chained ledger record shape, and segment bytes
//! (§4.2, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::AuditEventEnvelope;
use crate::{hex_lower, sha256, Hash, Timestamp};

/// Re-serialize a JSON value with object keys sorted lexicographically at
/// every level, no insignificant whitespace, and no trailing newline. This
/// is `canonical(...)` from §4.2: the only place key order is decided.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    serde_json::to_vec(&canonicalize(value))
        .expect("canonicalized JSON value serialization cannot fail")
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: std::collections::BTreeMap<String, Value> =
                std::collections::BTreeMap::new();
            for (key, val) in map {
                sorted.insert(key.clone(), canonicalize(val));
            }
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// An append-only ledger entry (§3 `AuditRecord`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    /// Chain this record belongs to.
    pub chain_id: String,
    /// Monotonic sequence number within the chain, starting at 0.
    pub seq: u64,
    /// Hash of the previous record in the chain (all-zeros for seq 0).
    pub prev_hash: Hash,
    /// The envelope this record wraps.
    pub payload: AuditEventEnvelope,
    /// Wall-clock time the record was appended, epoch milliseconds.
    pub recorded_at: Timestamp,
    /// `H(canonical(payload) || prevHash || be(seq) || chainId || be(recordedAt))`.
    pub record_hash: Hash,
}

/// Compute `recordHash` per the §4.2 algorithmic contract. `seq` and
/// `recordedAt` are encoded as big-endian `u64` in the preimage (frozen
/// reference encoding, see DESIGN.md's Open Question resolution).
pub fn compute_record_hash(
    payload: &AuditEventEnvelope,
    prev_hash: &Hash,
    seq: u64,
    chain_id: &str,
    recorded_at: Timestamp,
) -> Hash {
    let payload_value =
        serde_json::to_value(payload).expect("AuditEventEnvelope always serializes");
    let mut preimage = canonical_json_bytes(&payload_value);
    preimage.extend_from_slice(prev_hash);
    preimage.extend_from_slice(&seq.to_be_bytes());
    preimage.extend_from_slice(chain_id.as_bytes());
    preimage.extend_from_slice(&recorded_at.to_be_bytes());
    sha256(&preimage)
}

/// Render a record as the alphabetically-keyed wire JSON object documented
/// in §6 (`{"chainId":...,"payload":...,"prevHash":...,"recordHash":...,
/// "recordedAt":...,"seq":...}`).
pub fn record_to_wire_json(record: &AuditRecord) -> Value {
    let mut map = std::collections::BTreeMap::new();
    map.insert("chainId".to_string(), Value::String(record.chain_id.clone()));
    map.insert(
        "payload".to_string(),
        serde_json::to_value(&record.payload).expect("envelope serializes"),
    );
    map.insert(
        "prevHash".to_string(),
        Value::String(hex_lower(&record.prev_hash)),
    );
    map.insert(
        "recordHash".to_string(),
        Value::String(hex_lower(&record.record_hash)),
    );
    map.insert(
        "recordedAt".to_string(),
        Value::Number(record.recorded_at.into()),
    );
    map.insert("seq".to_string(), Value::Number(record.seq.into()));
    Value::Object(map.into_iter().collect())
}

/// Encode a single record as one canonical JSON line (no trailing newline).
pub fn record_to_jsonl_line(record: &AuditRecord) -> Vec<u8> {
    canonical_json_bytes(&record_to_wire_json(record))
}

/// Result of [`validate_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidation {
    /// Whether the whole chain validated.
    pub valid: bool,
    /// The `seq` of the first broken record, if any.
    pub first_broken_seq: Option<u64>,
    /// A human-readable description of the first failure, if any.
    pub error: Option<String>,
}

impl ChainValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            first_broken_seq: None,
            error: None,
        }
    }

    fn broken(seq: u64, error: impl Into<String>) -> Self {
        Self {
            valid: false,
            first_broken_seq: Some(seq),
            error: Some(error.into()),
        }
    }
}

/// Recompute `recordHash` for every record in `records` and verify
/// `prevHash` continuity (§4.2 `validateChain`). Pure: never repairs, only
/// reports.
pub fn validate_chain(records: &[AuditRecord]) -> ChainValidation {
    let mut expected_prev = crate::GENESIS_HASH;
    for (i, record) in records.iter().enumerate() {
        if record.prev_hash != expected_prev {
            return ChainValidation::broken(
                record.seq,
                format!(
                    "prevHash mismatch at seq {}: expected {}, got {}",
                    record.seq,
                    hex_lower(&expected_prev),
                    hex_lower(&record.prev_hash)
                ),
            );
        }
        let recomputed = compute_record_hash(
            &record.payload,
            &record.prev_hash,
            record.seq,
            &record.chain_id,
            record.recorded_at,
        );
        if recomputed != record.record_hash {
            return ChainValidation::broken(
                record.seq,
                format!("recordHash mismatch at seq {}", record.seq),
            );
        }
        if i > 0 {
            let prev_seq = records[i - 1].seq;
            if record.seq != prev_seq + 1 {
                return ChainValidation::broken(
                    record.seq,
                    format!(
                        "seq is not monotonic: expected {}, got {}",
                        prev_seq + 1,
                        record.seq
                    ),
                );
            }
        }
        expected_prev = record.record_hash;
    }
    ChainValidation::ok()
}

/// A contiguous, serialized range of one chain (§3 `Segment`).
#[derive(Debug, Clone)]
pub struct Segment {
    /// Chain the segment was cut from.
    pub chain_id: String,
    /// First `seq` included (inclusive).
    pub seq_start: u64,
    /// Last `seq` included (inclusive).
    pub seq_end: u64,
    /// UTF-8 JSONL bytes, LF-terminated, no trailing newline.
    pub bytes: Vec<u8>,
    /// `SHA-256` over `bytes`.
    pub segment_digest: Hash,
    /// `recordHash` of the last record in the segment.
    pub head_hash: Hash,
    /// Number of records in the segment.
    pub record_count: u64,
}

/// Errors cutting a segment.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SegmentError {
    /// The requested range was empty or out of bounds.
    #[error("empty or out-of-range segment request [{0}..{1}]")]
    EmptyRange(u64, u64),
}

/// Produce a [`Segment`] over `records[seq_start..=seq_end]` (§4.2
/// `cutSegment`). `records` must already be contiguous and in `seq` order;
/// this function does not re-validate chain continuity (call
/// [`validate_chain`] first if that matters to the caller).
pub fn cut_segment(
    chain_id: &str,
    records: &[AuditRecord],
    seq_start: u64,
    seq_end: u64,
) -> Result<Segment, SegmentError> {
    let slice: Vec<&AuditRecord> = records
        .iter()
        .filter(|r| r.seq >= seq_start && r.seq <= seq_end)
        .collect();
    if slice.is_empty() {
        return Err(SegmentError::EmptyRange(seq_start, seq_end));
    }
    let mut bytes = Vec::new();
    for (i, record) in slice.iter().enumerate() {
        if i > 0 {
            bytes.push(b'\n');
        }
        bytes.extend_from_slice(&record_to_jsonl_line(record));
    }
    let segment_digest = sha256(&bytes);
    let head_hash = slice.last().expect("slice is non-empty").record_hash;
    Ok(Segment {
        chain_id: chain_id.to_string(),
        seq_start,
        seq_end,
        bytes,
        segment_digest,
        head_hash,
        record_count: slice.len() as u64,
    })
}

/// Parse JSONL segment bytes back into wire records for offline
/// verification, without requiring the original [`AuditRecord`] structs.
pub fn parse_jsonl(bytes: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    let text = String::from_utf8_lossy(bytes);
    text.split('\n')
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}

/// A closed redaction policy: field names to scrub from `payload.context`
/// and how to transform them. `recordHash` is never recomputed by
/// [`redact`]; the whole point is the hash survives payload scrubbing.
#[derive(Debug, Clone, Default)]
pub struct RedactionPolicy {
    /// Field names within `payload.context` to transform.
    pub fields: Vec<RedactionRule>,
}

/// How to transform a single redacted field.
#[derive(Debug, Clone)]
pub struct RedactionRule {
    /// Context field name to match.
    pub field: String,
    /// Replacement action.
    pub action: RedactionAction,
}

/// A redaction transform applied to a matched context field.
#[derive(Debug, Clone)]
pub enum RedactionAction {
    /// Remove the field entirely.
    Remove,
    /// Replace the value with a fixed placeholder string.
    Replace(String),
}

/// Apply `policy` to `record.payload.context`, returning a new record whose
/// `recordHash` is preserved verbatim (§4.2 `redact`).
pub fn redact(record: &AuditRecord, policy: &RedactionPolicy) -> AuditRecord {
    let mut redacted = record.clone();
    if let Some(context) = redacted.payload.context.as_mut() {
        for rule in &policy.fields {
            match &rule.action {
                RedactionAction::Remove => {
                    context.remove(&rule.field);
                }
                RedactionAction::Replace(placeholder) => {
                    if context.contains_key(&rule.field) {
                        context.insert(
                            rule.field.clone(),
                            serde_json::Value::String(placeholder.clone()),
                        );
                    }
                }
            }
        }
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{create_envelope, AuditSeverity, EnvelopeInput};
    use crate::taxonomy::AuditEvent;
    use crate::GENESIS_HASH;
    use proptest::prelude::*;

    fn envelope(trace_id: &str, ts: u64) -> AuditEventEnvelope {
        create_envelope(
            AuditEvent::SystemStartup,
            EnvelopeInput {
                trace_id: trace_id.into(),
                severity: Some(AuditSeverity::Info),
                timestamp: Some(ts),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn append_record(chain_id: &str, seq: u64, prev_hash: Hash, ts: u64) -> AuditRecord {
        let payload = envelope(&format!("t{seq}"), ts);
        let record_hash = compute_record_hash(&payload, &prev_hash, seq, chain_id, ts);
        AuditRecord {
            chain_id: chain_id.to_string(),
            seq,
            prev_hash,
            payload,
            recorded_at: ts,
            record_hash,
        }
    }

    fn sample_chain(len: u64) -> Vec<AuditRecord> {
        let mut records = Vec::new();
        let mut prev = GENESIS_HASH;
        for seq in 0..len {
            let record = append_record("c1", seq, prev, 1_700_000_000_000 + seq);
            prev = record.record_hash;
            records.push(record);
        }
        records
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let value = serde_json::json!({"b": 1, "a": 2, "c": {"z": 1, "y": 2}});
        let bytes = canonical_json_bytes(&value);
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, r#"{"a":2,"b":1,"c":{"y":2,"z":1}}"#);
    }

    #[test]
    fn genesis_prev_hash_is_all_zero() {
        let records = sample_chain(1);
        assert_eq!(records[0].prev_hash, GENESIS_HASH);
    }

    #[test]
    fn hash_stability_flips_on_mutation() {
        let record = &sample_chain(1)[0];
        let mut mutated = record.clone();
        mutated.payload.trace_id = "mutated".into();
        let recomputed = compute_record_hash(
            &mutated.payload,
            &mutated.prev_hash,
            mutated.seq,
            &mutated.chain_id,
            mutated.recorded_at,
        );
        assert_ne!(recomputed, record.record_hash);
    }

    #[test]
    fn validate_chain_accepts_well_formed_chain() {
        let records = sample_chain(3);
        let result = validate_chain(&records);
        assert!(result.valid);
        assert_eq!(records[2].seq, 2);
        assert_eq!(records[1].prev_hash, records[0].record_hash);
    }

    #[test]
    fn validate_chain_detects_broken_link() {
        let mut records = sample_chain(3);
        records[2].prev_hash = [9u8; 32];
        let result = validate_chain(&records);
        assert!(!result.valid);
        assert_eq!(result.first_broken_seq, Some(2));
    }

    #[test]
    fn cut_segment_produces_lf_jsonl_without_trailing_newline() {
        let records = sample_chain(3);
        let segment = cut_segment("c1", &records, 0, 2).unwrap();
        let text = String::from_utf8(segment.bytes.clone()).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(!text.ends_with('\n'));
        assert_eq!(segment.head_hash, records[2].record_hash);
        assert_eq!(segment.record_count, 3);
    }

    #[test]
    fn redact_preserves_record_hash() {
        let mut records = sample_chain(1);
        records[0].payload.context = Some(
            [("secret".to_string(), serde_json::json!("sensitive"))]
                .into_iter()
                .collect(),
        );
        let policy = RedactionPolicy {
            fields: vec![RedactionRule {
                field: "secret".into(),
                action: RedactionAction::Remove,
            }],
        };
        let redacted = redact(&records[0], &policy);
        assert_eq!(redacted.record_hash, records[0].record_hash);
        assert!(redacted.payload.context.unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn hash_recomputation_matches_stored_value_for_any_trace_id(
            trace_id in "[a-zA-Z0-9_-]{1,64}",
            seq in 0u64..10_000,
            ts in 1_600_000_000_000u64..1_900_000_000_000,
        ) {
            let payload = envelope(&trace_id, ts);
            let prev_hash = [7u8; 32];
            let record_hash = compute_record_hash(&payload, &prev_hash, seq, "c1", ts);
            let recomputed = compute_record_hash(&payload, &prev_hash, seq, "c1", ts);
            prop_assert_eq!(record_hash, recomputed);
        }

        #[test]
        fn any_trace_id_mutation_flips_the_hash(
            original in "[a-zA-Z0-9_-]{1,32}",
            mutated in "[a-zA-Z0-9_-]{1,32}",
        ) {
            prop_assume!(original != mutated);
            let prev_hash = [1u8; 32];
            let base = envelope(&original, 1_700_000_000_000);
            let changed = envelope(&mutated, 1_700_000_000_000);
            let base_hash = compute_record_hash(&base, &prev_hash, 0, "c1", 1_700_000_000_000);
            let changed_hash = compute_record_hash(&changed, &prev_hash, 0, "c1", 1_700_000_000_000);
            prop_assert_ne!(base_hash, changed_hash);
        }
    }
}
