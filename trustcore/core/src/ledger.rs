//! Hash-chained, append-only audit ledger (§4.2).
//!
//! Mirrors the shape of an append-only log with a checksummed WAL and
//! tmp-rename metadata persistence, retargeted from Merkle-tree envelope
//! hashing to `AuditRecord` hash-chaining with SHA-256 `recordHash`
//! (§4.2, DESIGN.md hashing-algorithm resolution).

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use blake3::Hasher;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use trustcore_spec::envelope::AuditEventEnvelope;
use trustcore_spec::record::{
    self, AuditRecord, ChainValidation, RedactionPolicy, Segment, SegmentError,
};
use trustcore_spec::{Hash, Timestamp, GENESIS_HASH};

/// Errors appending to or reading from the ledger (§4.2, §7 `Conflict`/`Transient`).
#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    /// The caller supplied an envelope that cannot become a record (not
    /// used by [`Ledger::append`] today, reserved for future validation
    /// at this layer beyond what the envelope factory already enforces).
    #[error("validation: {0}")]
    Validation(String),
    /// Storage or I/O failure; the head pointer is guaranteed unchanged.
    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

/// An in-process, append-only chain: its ordered records and head pointer.
#[derive(Debug, Default)]
struct ChainLog {
    records: Vec<AuditRecord>,
}

impl ChainLog {
    fn head_hash(&self) -> Hash {
        self.records.last().map(|r| r.record_hash).unwrap_or(GENESIS_HASH)
    }

    fn next_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq + 1).unwrap_or(0)
    }
}

/// An in-memory hash-chained ledger holding any number of chains. Cheap to
/// clone: the underlying storage is shared via `Arc`.
///
/// Append is serialized per chain: the whole chain map is held behind a
/// single [`RwLock`], so at most one appender makes progress on any chain
/// at a time, matching §5's "at-most-one concurrent appender per chain"
/// (a coarser lock than strictly necessary, but the expected chain count
/// and append rate make per-chain striping unwarranted).
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    chains: Arc<RwLock<HashMap<String, ChainLog>>>,
}

impl Ledger {
    /// Create a new, empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `payload` to `chain_id`, producing and storing the resulting
    /// [`AuditRecord`] (§4.2 `append`). Never partially succeeds: on error
    /// the chain head is unchanged.
    pub fn append(
        &self,
        chain_id: &str,
        payload: AuditEventEnvelope,
        recorded_at: Timestamp,
    ) -> Result<AuditRecord, AppendError> {
        let span = tracing::info_span!("ledger_append", chain_id, seq = tracing::field::Empty);
        let _guard = span.enter();
        let mut chains = self.chains.write();
        let chain = chains.entry(chain_id.to_string()).or_default();
        let seq = chain.next_seq();
        let prev_hash = chain.head_hash();
        let record_hash =
            record::compute_record_hash(&payload, &prev_hash, seq, chain_id, recorded_at);
        let record = AuditRecord {
            chain_id: chain_id.to_string(),
            seq,
            prev_hash,
            payload,
            recorded_at,
            record_hash,
        };
        chain.records.push(record.clone());
        span.record("seq", seq);
        tracing::debug!("record appended");
        Ok(record)
    }

    /// Read a contiguous range `[from_seq, from_seq + count)` of `chain_id`
    /// (§4.2 `getRecords`).
    pub fn get_records(&self, chain_id: &str, from_seq: u64, count: u64) -> Vec<AuditRecord> {
        let chains = self.chains.read();
        let Some(chain) = chains.get(chain_id) else {
            return Vec::new();
        };
        chain
            .records
            .iter()
            .filter(|r| r.seq >= from_seq && r.seq < from_seq + count)
            .cloned()
            .collect()
    }

    /// Number of records currently stored for `chain_id`.
    pub fn len(&self, chain_id: &str) -> usize {
        self.chains.read().get(chain_id).map_or(0, |c| c.records.len())
    }

    /// Recompute hashes and verify `prevHash` continuity over `records`
    /// (§4.2 `validateChain`). Pure; never repairs.
    pub fn validate_chain(&self, records: &[AuditRecord]) -> ChainValidation {
        record::validate_chain(records)
    }

    /// Cut a contiguous segment `[seq_start, seq_end]` of `chain_id` as
    /// JSONL bytes plus its digest (§4.2 `cutSegment`).
    pub fn cut_segment(
        &self,
        chain_id: &str,
        seq_start: u64,
        seq_end: u64,
    ) -> Result<Segment, SegmentError> {
        let chains = self.chains.read();
        let records = chains
            .get(chain_id)
            .map(|c| c.records.as_slice())
            .unwrap_or(&[]);
        record::cut_segment(chain_id, records, seq_start, seq_end)
    }

    /// Apply a redaction policy to a stored record's `payload.context`,
    /// replacing it in place. `recordHash` is never recomputed, so the
    /// chain remains externally verifiable (§4.2 `redact`).
    pub fn redact(&self, chain_id: &str, seq: u64, policy: &RedactionPolicy) -> bool {
        let mut chains = self.chains.write();
        let Some(chain) = chains.get_mut(chain_id) else {
            return false;
        };
        let Some(existing) = chain.records.iter_mut().find(|r| r.seq == seq) else {
            return false;
        };
        *existing = record::redact(existing, policy);
        true
    }
}

const CHECKSUM_DOMAIN: &[u8] = b"trustcore-ledger:wal:v1";

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct PersistentMetadata {
    length: usize,
    head_hash: Hash,
}

/// Disk-backed ledger for a single chain: a checksummed WAL, a compacted
/// segments file, and tmp-rename metadata persistence, in the idiom of the
/// teacher's `PersistentAppendLog` (generalized from envelope/Merkle
/// hashing to `AuditRecord` hash-chaining).
#[derive(Debug)]
pub struct PersistentLedger {
    chain_id: String,
    records: RwLock<Vec<AuditRecord>>,
    wal: Mutex<File>,
    segments: Mutex<File>,
    dir: PathBuf,
    meta_path: PathBuf,
    wal_path: PathBuf,
    segment_size: usize,
}

const DEFAULT_SEGMENT_SIZE: usize = 1024;

impl PersistentLedger {
    /// Open (or create) a persistent single-chain ledger at `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, chain_id: impl Into<String>) -> Result<Self, AppendError> {
        Self::open_with_segment_size(dir, chain_id, DEFAULT_SEGMENT_SIZE)
    }

    /// Open (or create) with a custom WAL-compaction threshold.
    pub fn open_with_segment_size<P: AsRef<Path>>(
        dir: P,
        chain_id: impl Into<String>,
        segment_size: usize,
    ) -> Result<Self, AppendError> {
        let dir = dir.as_ref();
        let segment_size = segment_size.max(1);
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create ledger directory {}", dir.display()))?;
        let wal_path = dir.join("append.wal");
        let segments_path = dir.join("segments.jsonl");
        let meta_path = dir.join("meta.json");

        let mut records = read_records(&segments_path)?;
        records.extend(read_records(&wal_path)?);
        let current_meta = PersistentMetadata {
            length: records.len(),
            head_hash: records.last().map(|r| r.record_hash).unwrap_or(GENESIS_HASH),
        };
        if let Some(on_disk) = read_metadata_file(&meta_path) {
            if on_disk != current_meta {
                return Err(anyhow::anyhow!(
                    "persistent ledger metadata mismatch during recovery for chain {}",
                    chain_id.into()
                )
                .into());
            }
        }

        let wal = Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&wal_path)
                .with_context(|| format!("failed to open WAL {}", wal_path.display()))?,
        );
        let segments = Mutex::new(
            OpenOptions::new()
                .create(true)
                .append(true)
                .read(true)
                .open(&segments_path)
                .with_context(|| format!("failed to open segments {}", segments_path.display()))?,
        );

        let chain_id = {
            let s: String = chain_id.into();
            s
        };
        let log = Self {
            chain_id,
            records: RwLock::new(records),
            wal,
            segments,
            dir: dir.to_path_buf(),
            meta_path,
            wal_path,
            segment_size,
        };
        log.persist_metadata(&current_meta)?;
        Ok(log)
    }

    fn persist_metadata(&self, meta: &PersistentMetadata) -> Result<(), AppendError> {
        let tmp = self.meta_path.with_extension("tmp");
        let encoded =
            serde_json::to_vec(meta).context("failed to serialize persistent ledger metadata")?;
        fs::write(&tmp, encoded)
            .with_context(|| format!("failed to write metadata {}", tmp.display()))?;
        fs::rename(&tmp, &self.meta_path).with_context(|| {
            format!(
                "failed to atomically persist metadata {} -> {}",
                tmp.display(),
                self.meta_path.display()
            )
        })?;
        Ok(())
    }

    fn write_wal(&self, record: &AuditRecord) -> Result<(), AppendError> {
        let mut wal = self.wal.lock();
        let bytes = serde_json::to_vec(record).context("failed to serialize record")?;
        let mut hasher = Hasher::new();
        hasher.update(CHECKSUM_DOMAIN);
        hasher.update(&bytes);
        let digest = hasher.finalize();
        let len = (bytes.len() as u32).to_be_bytes();
        wal.write_all(&len).context("failed to write wal length prefix")?;
        wal.write_all(digest.as_bytes())
            .context("failed to write wal checksum")?;
        wal.write_all(&bytes).context("failed to write wal entry body")?;
        wal.flush().context("failed to flush wal")?;
        wal.sync_all().context("failed to sync wal to disk")?;
        Ok(())
    }

    fn compact_if_due(&self, length: usize) -> Result<(), AppendError> {
        if length % self.segment_size != 0 {
            return Ok(());
        }
        let wal_bytes = fs::read(&self.wal_path).unwrap_or_default();
        if wal_bytes.is_empty() {
            return Ok(());
        }
        {
            let mut segments = self.segments.lock();
            segments
                .write_all(&wal_bytes)
                .context("failed to write compacted wal into segments")?;
            segments.sync_all().context("failed to sync compacted segments")?;
        }
        {
            let mut wal = self.wal.lock();
            wal.set_len(0).context("failed to truncate wal")?;
            wal.sync_all().context("failed to sync truncated wal")?;
        }
        Ok(())
    }

    /// Append `payload` durably. Either the record lands in the WAL and is
    /// visible to subsequent reads, or an error is returned and on-disk
    /// state is unchanged (§4.2).
    pub fn append(
        &self,
        payload: AuditEventEnvelope,
        recorded_at: Timestamp,
    ) -> Result<AuditRecord, AppendError> {
        let span = tracing::info_span!(
            "persistent_ledger_append",
            chain_id = %self.chain_id,
            seq = tracing::field::Empty
        );
        let _guard = span.enter();
        let mut records = self.records.write();
        let seq = records.last().map(|r| r.seq + 1).unwrap_or(0);
        let prev_hash = records.last().map(|r| r.record_hash).unwrap_or(GENESIS_HASH);
        let record_hash =
            record::compute_record_hash(&payload, &prev_hash, seq, &self.chain_id, recorded_at);
        let record = AuditRecord {
            chain_id: self.chain_id.clone(),
            seq,
            prev_hash,
            payload,
            recorded_at,
            record_hash,
        };
        self.write_wal(&record)?;
        records.push(record.clone());
        let meta = PersistentMetadata {
            length: records.len(),
            head_hash: record.record_hash,
        };
        drop(records);
        self.persist_metadata(&meta)?;
        self.compact_if_due(meta.length)?;
        span.record("seq", seq);
        tracing::debug!("record durably appended");
        Ok(record)
    }

    /// Current record count.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Read a contiguous range.
    pub fn get_records(&self, from_seq: u64, count: u64) -> Vec<AuditRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.seq >= from_seq && r.seq < from_seq + count)
            .cloned()
            .collect()
    }

    /// Estimated on-disk footprint, for health reporting.
    pub fn storage_usage_bytes(&self) -> u64 {
        let wal = fs::metadata(&self.wal_path).map(|m| m.len()).unwrap_or(0);
        let seg = fs::metadata(self.dir.join("segments.jsonl"))
            .map(|m| m.len())
            .unwrap_or(0);
        let meta = fs::metadata(&self.meta_path).map(|m| m.len()).unwrap_or(0);
        wal + seg + meta
    }
}

fn read_metadata_file(path: &Path) -> Option<PersistentMetadata> {
    fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<PersistentMetadata>(&bytes).ok())
}

fn read_records(path: &Path) -> Result<Vec<AuditRecord>, AppendError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file =
        File::open(path).with_context(|| format!("failed to open ledger file {}", path.display()))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)
        .with_context(|| format!("failed to read ledger file {}", path.display()))?;
    let mut cursor = 0usize;
    let mut items = Vec::new();
    while cursor < buf.len() {
        if cursor + 4 > buf.len() {
            return Err(anyhow::anyhow!("truncated record length in {}", path.display()).into());
        }
        let len = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        if cursor + 32 + len > buf.len() {
            return Err(anyhow::anyhow!("truncated record body in {}", path.display()).into());
        }
        let checksum: [u8; 32] = buf[cursor..cursor + 32].try_into().unwrap();
        cursor += 32;
        let payload = &buf[cursor..cursor + len];
        cursor += len;
        let mut hasher = Hasher::new();
        hasher.update(CHECKSUM_DOMAIN);
        hasher.update(payload);
        let digest = hasher.finalize();
        if *digest.as_bytes() != checksum {
            return Err(anyhow::anyhow!("checksum mismatch in {}", path.display()).into());
        }
        let record: AuditRecord =
            serde_json::from_slice(payload).context("failed to decode record from wal")?;
        items.push(record);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustcore_spec::envelope::{create_envelope, AuditSeverity, EnvelopeInput};
    use trustcore_spec::taxonomy::AuditEvent;

    fn envelope(trace_id: &str) -> AuditEventEnvelope {
        create_envelope(
            AuditEvent::SystemStartup,
            EnvelopeInput {
                trace_id: trace_id.into(),
                severity: Some(AuditSeverity::Info),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn append_assigns_sequential_seq_and_genesis_prev_hash() {
        let ledger = Ledger::new();
        let r0 = ledger.append("c1", envelope("t1"), 1_700_000_000_000).unwrap();
        let r1 = ledger.append("c1", envelope("t2"), 1_700_000_000_001).unwrap();
        let r2 = ledger.append("c1", envelope("t3"), 1_700_000_000_002).unwrap();
        assert_eq!((r0.seq, r1.seq, r2.seq), (0, 1, 2));
        assert_eq!(r0.prev_hash, GENESIS_HASH);
        assert_eq!(r1.prev_hash, r0.record_hash);
        assert_eq!(r2.prev_hash, r1.record_hash);
    }

    #[test]
    fn validate_chain_reports_ok_for_s1_scenario() {
        let ledger = Ledger::new();
        ledger.append("c1", envelope("t1"), 1_700_000_000_000).unwrap();
        ledger.append("c1", envelope("t2"), 1_700_000_000_001).unwrap();
        ledger.append("c1", envelope("t3"), 1_700_000_000_002).unwrap();
        let records = ledger.get_records("c1", 0, 3);
        let result = ledger.validate_chain(&records);
        assert!(result.valid);
    }

    #[test]
    fn separate_chains_do_not_interleave_seq() {
        let ledger = Ledger::new();
        ledger.append("a", envelope("t1"), 1).unwrap();
        ledger.append("b", envelope("t2"), 2).unwrap();
        let a = ledger.append("a", envelope("t3"), 3).unwrap();
        assert_eq!(a.seq, 1);
        assert_eq!(ledger.len("b"), 1);
    }

    #[test]
    fn cut_segment_over_full_range_round_trips_validation() {
        let ledger = Ledger::new();
        for i in 0..5u64 {
            ledger.append("c1", envelope(&format!("t{i}")), 1_700_000_000_000 + i).unwrap();
        }
        let records = ledger.get_records("c1", 0, 5);
        let segment = ledger.cut_segment("c1", 0, 4).unwrap();
        assert_eq!(segment.record_count, 5);
        assert_eq!(segment.head_hash, records[4].record_hash);
    }

    fn temp_dir(prefix: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!("trustcore-ledger-{prefix}-{nanos}"));
        let _ = fs::remove_dir_all(&path);
        path
    }

    #[test]
    fn persistent_ledger_recovers_head_hash_across_restart() {
        let dir = temp_dir("recover");
        let log = PersistentLedger::open(&dir, "c1").unwrap();
        let mut last = None;
        for i in 0..3u64 {
            last = Some(log.append(envelope(&format!("t{i}")), 1_700_000_000_000 + i).unwrap());
        }
        let expected_head = last.unwrap().record_hash;
        drop(log);
        let reopened = PersistentLedger::open(&dir, "c1").unwrap();
        assert_eq!(reopened.len(), 3);
        assert_eq!(reopened.get_records(0, 3).last().unwrap().record_hash, expected_head);
    }

    #[test]
    fn persistent_ledger_compacts_wal_into_segments() {
        let dir = temp_dir("compact");
        let log = PersistentLedger::open_with_segment_size(&dir, "c1", 2).unwrap();
        for i in 0..4u64 {
            log.append(envelope(&format!("t{i}")), 1_700_000_000_000 + i).unwrap();
        }
        let wal_bytes = fs::read(dir.join("append.wal")).unwrap_or_default();
        assert!(wal_bytes.is_empty(), "wal should be compacted, got {} bytes", wal_bytes.len());
        assert_eq!(log.len(), 4);
    }
}
