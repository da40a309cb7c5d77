//! VFS path, conflict, and duplicate-group data model (§3, §4.8).

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// The three path schemes the VFS recognizes (§4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Platform-owned, read-only from the caller's perspective for writes.
    System,
    /// Per-user storage.
    User,
    /// Shared workspace storage.
    Workspace,
}

impl Scheme {
    /// Parse a scheme name, returning `None` for anything else.
    pub fn parse(name: &str) -> Option<Scheme> {
        match name {
            "system" => Some(Scheme::System),
            "user" => Some(Scheme::User),
            "workspace" => Some(Scheme::Workspace),
            _ => None,
        }
    }

    /// The scheme's canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::System => "system",
            Scheme::User => "user",
            Scheme::Workspace => "workspace",
        }
    }
}

/// A normalized VFS path: a scheme plus a sequence of non-empty segments
/// with no `.`/`..` components (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VfsPath {
    /// Path scheme.
    pub scheme: Scheme,
    /// URL-decoded, slash-separated, non-empty path segments.
    pub segments: Vec<String>,
}

impl VfsPath {
    /// Render back to `scheme://a/b/c` form.
    pub fn to_string_form(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.segments.join("/"))
    }

    /// The final segment (base name), if any.
    pub fn base_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The parent path (all but the final segment).
    pub fn parent(&self) -> VfsPath {
        let mut segments = self.segments.clone();
        segments.pop();
        VfsPath {
            scheme: self.scheme,
            segments,
        }
    }
}

/// Why [`crate::vfs`] path normalization failed (§4.8).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum InvalidPath {
    /// The `scheme://` prefix was missing or named an unknown scheme.
    #[error("unknown or missing scheme in path {0:?}")]
    UnknownScheme(String),
    /// A `.` or `..` segment was present.
    #[error("path traversal segment in {0:?}")]
    Traversal(String),
    /// Percent-encoding could not be decoded.
    #[error("malformed percent-encoding in {0:?}")]
    MalformedEncoding(String),
    /// A null byte was present in a decoded segment.
    #[error("null byte in path {0:?}")]
    NullByte(String),
}

/// Operation kinds gated by governance and uniqueness checks (§4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VfsOperation {
    /// Read an existing entry. Never write-gated.
    Read,
    /// List a directory's children. Never write-gated.
    List,
    /// Write (create or overwrite) a file.
    Write,
    /// Create a directory.
    Mkdir,
    /// Delete an entry.
    Delete,
    /// Rename an entry in place.
    Rename,
    /// Move an entry to a new parent.
    Move,
}

impl VfsOperation {
    /// Whether this operation mutates persistent state (§1, §4.8) and is
    /// therefore subject to the governance write gate and the uniqueness
    /// invariant.
    pub fn is_write_family(&self) -> bool {
        matches!(
            self,
            VfsOperation::Write | VfsOperation::Mkdir | VfsOperation::Delete
                | VfsOperation::Rename | VfsOperation::Move
        )
    }

    /// Whether this operation is subject to the kernel uniqueness
    /// invariant (§4.8: write, mkdir, rename, move — delete is exempt).
    pub fn requires_uniqueness_check(&self) -> bool {
        matches!(
            self,
            VfsOperation::Write | VfsOperation::Mkdir | VfsOperation::Rename | VfsOperation::Move
        )
    }
}

/// Why a gated VFS operation was denied (§4.8).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum VfsDenyReason {
    /// The VFS feature flag is off.
    #[error("GOVERNANCE_BLOCK")]
    GovernanceBlock,
    /// A write-family operation targeted `system://`.
    #[error("PERMISSION_DENIED")]
    PermissionDenied,
    /// Governance mode currently forbids execution (HARD_FREEZE / SOFT_LOCK).
    #[error("GOVERNANCE_BLOCK: {0}")]
    GovernanceModeBlocked(String),
    /// A sibling with the same canonical name already exists.
    #[error("Conflict: {0}")]
    Conflict(String),
}

/// A group of sibling entries that collide under case-fold + NFC (§4.8
/// duplicate scanner).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Parent directory path string.
    pub parent_path: String,
    /// The canonical (case-folded, NFC-normalized) key shared by entries.
    pub canonical_key: String,
    /// The colliding entry names as they actually appear on disk.
    pub entries: Vec<String>,
}

/// Kind of conflict recorded in the conflict store (§3 `ConflictRecord`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Two siblings collide under the canonical-key uniqueness invariant.
    DuplicateName,
    /// An offline-replayed sync operation conflicts with current state.
    SyncConflict,
}

/// Lifecycle status of a conflict record (§3, §4.8: `OPEN -> {RESOLVED, IGNORED}` only).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    /// Awaiting resolution.
    Open,
    /// Resolved by a caller-supplied resolution.
    Resolved,
    /// Explicitly dismissed without resolution.
    Ignored,
}

/// What originated a conflict record (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictSource {
    /// Found by the duplicate scanner.
    Scan,
    /// Found while replaying an offline sync log.
    SyncReplay,
    /// Created directly by a caller.
    Manual,
}

/// A session-scoped conflict awaiting resolution (§3 `ConflictRecord`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Record id, unique within the session.
    pub id: String,
    /// Conflict kind.
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    /// Parent directory path string the conflict occurred under.
    pub parent_path: String,
    /// Canonical (case-folded, NFC) key shared by the colliding entries.
    pub canonical_key: String,
    /// The colliding entry names.
    pub entries: Vec<String>,
    /// Current lifecycle status.
    pub status: ConflictStatus,
    /// Caller-supplied resolution description, once resolved.
    pub resolution: Option<String>,
    /// When the record was created, epoch milliseconds.
    pub created_at: Timestamp,
    /// When the record was resolved or ignored, if applicable.
    pub resolved_at: Option<Timestamp>,
    /// What produced this record.
    pub source: ConflictSource,
}

/// Aggregate counts published to subscribers on every conflict-store
/// change (§4.8).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictSummary {
    /// Number of `OPEN` records.
    pub open: usize,
    /// Number of `RESOLVED` records.
    pub resolved: usize,
    /// Number of `IGNORED` records.
    pub ignored: usize,
    /// Total records.
    pub total: usize,
}

impl ConflictSummary {
    /// Recompute a summary from a slice of records.
    pub fn summarize(records: &[ConflictRecord]) -> Self {
        let mut summary = ConflictSummary {
            total: records.len(),
            ..Default::default()
        };
        for record in records {
            match record.status {
                ConflictStatus::Open => summary.open += 1,
                ConflictStatus::Resolved => summary.resolved += 1,
                ConflictStatus::Ignored => summary.ignored += 1,
            }
        }
        summary
    }
}
