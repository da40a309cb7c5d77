//! VFS path normalization, governance write gate, uniqueness invariant,
//! duplicate scanner, and session-scoped conflict store (§4.8).

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use percent_encoding::percent_decode_str;
use trustcore_spec::vfs::{
    ConflictRecord, ConflictSource, ConflictStatus, ConflictSummary, ConflictType, DuplicateGroup,
    InvalidPath, Scheme, VfsDenyReason, VfsOperation, VfsPath,
};
use trustcore_spec::Timestamp;
use unicode_normalization::UnicodeNormalization;

/// Normalize a raw `scheme://segment/segment` string into a [`VfsPath`].
/// URL-decodes each segment, folds backslashes to forward slashes,
/// drops empty segments, and rejects `.`/`..` traversal, null bytes, and
/// unknown schemes. Idempotent: normalizing an already-normalized path's
/// [`VfsPath::to_string_form`] output returns an equal path.
pub fn normalize_path(raw: &str) -> Result<VfsPath, InvalidPath> {
    let (scheme_name, rest) = raw
        .split_once("://")
        .ok_or_else(|| InvalidPath::UnknownScheme(raw.to_string()))?;
    let scheme = Scheme::parse(scheme_name).ok_or_else(|| InvalidPath::UnknownScheme(raw.to_string()))?;

    let folded = rest.replace('\\', "/");
    let mut segments = Vec::new();
    for raw_segment in folded.split('/') {
        if raw_segment.is_empty() {
            continue;
        }
        let decoded = percent_decode_str(raw_segment)
            .decode_utf8()
            .map_err(|_| InvalidPath::MalformedEncoding(raw.to_string()))?
            .into_owned();
        if decoded.contains('\0') {
            return Err(InvalidPath::NullByte(raw.to_string()));
        }
        if decoded == "." || decoded == ".." {
            return Err(InvalidPath::Traversal(raw.to_string()));
        }
        segments.push(decoded);
    }

    Ok(VfsPath { scheme, segments })
}

/// Case-fold and NFC-normalize a path segment into its canonical
/// uniqueness key (§4.8 kernel uniqueness invariant).
pub fn canonical_key(segment: &str) -> String {
    segment.nfc().collect::<String>().to_lowercase()
}

/// Whether the VFS feature flag is enabled. A disabled flag blocks every
/// write-family operation with [`VfsDenyReason::GovernanceBlock`],
/// except under the documented localhost dev override.
#[derive(Debug, Clone, Copy)]
pub struct GovernanceGateConfig {
    /// Whether the VFS feature is enabled at all.
    pub feature_enabled: bool,
    /// Whether the caller is a localhost development client, which may
    /// bypass a disabled feature flag (never bypasses the `system://`
    /// write restriction or an active HARD_FREEZE/SOFT_LOCK).
    pub is_localhost_dev: bool,
}

/// Evaluate the governance write gate for a single operation against a
/// directory entry that may or may not already exist. Read-family
/// operations are never gated.
pub fn check_governance_gate(
    operation: VfsOperation,
    path: &VfsPath,
    config: GovernanceGateConfig,
    governance_blocks_execution: bool,
) -> Result<(), VfsDenyReason> {
    if !operation.is_write_family() {
        return Ok(());
    }
    if governance_blocks_execution {
        return Err(VfsDenyReason::GovernanceModeBlocked(
            "current governance mode forbids execution".to_string(),
        ));
    }
    if !config.feature_enabled && !config.is_localhost_dev {
        return Err(VfsDenyReason::GovernanceBlock);
    }
    if path.scheme == Scheme::System {
        return Err(VfsDenyReason::PermissionDenied);
    }
    Ok(())
}

/// Evaluate the uniqueness invariant for a proposed write-family entry
/// against its current siblings. Only called for operations where
/// [`VfsOperation::requires_uniqueness_check`] holds.
pub fn check_uniqueness(new_name: &str, existing_siblings: &[String]) -> Result<(), VfsDenyReason> {
    let key = canonical_key(new_name);
    if let Some(collision) = existing_siblings.iter().find(|s| canonical_key(s) == key) {
        return Err(VfsDenyReason::Conflict(format!(
            "{new_name:?} collides with existing entry {collision:?}"
        )));
    }
    Ok(())
}

/// A directory tree entry as seen by the duplicate scanner.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    /// Entry name (no path separators).
    pub name: String,
    /// Children, if this entry is a directory. `None` for files.
    pub children: Option<Vec<TreeEntry>>,
}

/// Walk `root` pre-order up to `max_depth`, grouping siblings that
/// collide under [`canonical_key`]. `system://` is excluded from the
/// walk by default; pass `include_system = true` to override.
pub fn scan_duplicates(
    scheme: Scheme,
    root_path: &str,
    root: &TreeEntry,
    max_depth: usize,
    include_system: bool,
) -> Vec<DuplicateGroup> {
    let mut groups = Vec::new();
    if scheme == Scheme::System && !include_system {
        return groups;
    }
    walk(root_path, root, max_depth, &mut groups);
    groups
}

fn walk(parent_path: &str, entry: &TreeEntry, depth_remaining: usize, groups: &mut Vec<DuplicateGroup>) {
    let Some(children) = &entry.children else {
        return;
    };
    if depth_remaining == 0 {
        return;
    }

    let mut by_key: HashMap<String, Vec<String>> = HashMap::new();
    for child in children {
        by_key.entry(canonical_key(&child.name)).or_default().push(child.name.clone());
    }
    let mut keys: Vec<&String> = by_key.keys().collect();
    keys.sort();
    for key in keys {
        let names = &by_key[key];
        if names.len() > 1 {
            let mut entries = names.clone();
            entries.sort();
            groups.push(DuplicateGroup {
                parent_path: parent_path.to_string(),
                canonical_key: key.clone(),
                entries,
            });
        }
    }

    for child in children {
        let child_path = format!("{parent_path}/{}", child.name);
        walk(&child_path, child, depth_remaining - 1, groups);
    }
}

/// Render a deterministic Markdown report from a set of duplicate
/// groups, sorted by parent path then canonical key.
pub fn format_duplicate_report(groups: &[DuplicateGroup]) -> String {
    let mut sorted = groups.to_vec();
    sorted.sort_by(|a, b| {
        a.parent_path
            .cmp(&b.parent_path)
            .then_with(|| a.canonical_key.cmp(&b.canonical_key))
    });

    let mut out = String::from("# Duplicate entries\n\n");
    if sorted.is_empty() {
        out.push_str("No duplicates found.\n");
        return out;
    }
    for group in &sorted {
        out.push_str(&format!("## {}\n\n", group.parent_path));
        out.push_str(&format!("Canonical key: `{}`\n\n", group.canonical_key));
        for entry in &group.entries {
            out.push_str(&format!("- {entry}\n"));
        }
        out.push('\n');
    }
    out
}

/// A session-scoped store of [`ConflictRecord`]s with subscriber
/// notification on every mutation (§4.8).
pub struct ConflictStore {
    records: RwLock<Vec<ConflictRecord>>,
    next_id: Mutex<u64>,
    subscribers: Mutex<Vec<Box<dyn Fn(ConflictSummary) + Send + Sync>>>,
}

impl ConflictStore {
    /// An empty conflict store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: Mutex::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback invoked with the new summary after every
    /// mutation.
    pub fn subscribe(&self, callback: Box<dyn Fn(ConflictSummary) + Send + Sync>) {
        self.subscribers.lock().push(callback);
    }

    /// Record a conflict, deduplicating by `(canonical_key, parent_path)`
    /// against existing `OPEN` records. Returns the existing record's id
    /// if a duplicate is already open, otherwise the id of the newly
    /// created record.
    pub fn record(
        &self,
        conflict_type: ConflictType,
        parent_path: impl Into<String>,
        canonical_key: impl Into<String>,
        entries: Vec<String>,
        source: ConflictSource,
        now: Timestamp,
    ) -> String {
        let parent_path = parent_path.into();
        let canonical_key = canonical_key.into();

        {
            let records = self.records.read();
            if let Some(existing) = records.iter().find(|r| {
                r.status == ConflictStatus::Open
                    && r.parent_path == parent_path
                    && r.canonical_key == canonical_key
            }) {
                return existing.id.clone();
            }
        }

        let id = {
            let mut next_id = self.next_id.lock();
            let id = format!("conflict-{}", *next_id);
            *next_id += 1;
            id
        };

        let record = ConflictRecord {
            id: id.clone(),
            conflict_type,
            parent_path,
            canonical_key,
            entries,
            status: ConflictStatus::Open,
            resolution: None,
            created_at: now,
            resolved_at: None,
            source,
        };

        {
            let mut records = self.records.write();
            records.push(record);
        }
        self.notify();
        id
    }

    /// Transition an `OPEN` record to `RESOLVED`. No-op (returns
    /// `false`) if the record is unknown or not currently open.
    pub fn resolve(&self, id: &str, resolution: impl Into<String>, now: Timestamp) -> bool {
        self.transition(id, ConflictStatus::Resolved, Some(resolution.into()), now)
    }

    /// Transition an `OPEN` record to `IGNORED`.
    pub fn ignore(&self, id: &str, now: Timestamp) -> bool {
        self.transition(id, ConflictStatus::Ignored, None, now)
    }

    fn transition(
        &self,
        id: &str,
        status: ConflictStatus,
        resolution: Option<String>,
        now: Timestamp,
    ) -> bool {
        let changed = {
            let mut records = self.records.write();
            match records.iter_mut().find(|r| r.id == id && r.status == ConflictStatus::Open) {
                Some(record) => {
                    record.status = status;
                    record.resolution = resolution;
                    record.resolved_at = Some(now);
                    true
                }
                None => false,
            }
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Current aggregate summary.
    pub fn summary(&self) -> ConflictSummary {
        ConflictSummary::summarize(&self.records.read())
    }

    /// All records, in insertion order.
    pub fn all(&self) -> Vec<ConflictRecord> {
        self.records.read().clone()
    }

    fn notify(&self) {
        let summary = self.summary();
        for subscriber in self.subscribers.lock().iter() {
            subscriber(summary);
        }
    }
}

impl Default for ConflictStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn normalize_decodes_and_drops_empty_segments() {
        let path = normalize_path("user://docs//My%20File.txt").unwrap();
        assert_eq!(path.scheme, Scheme::User);
        assert_eq!(path.segments, vec!["docs".to_string(), "My File.txt".to_string()]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let path = normalize_path("workspace://a/b/c").unwrap();
        let reparsed = normalize_path(&path.to_string_form()).unwrap();
        assert_eq!(path, reparsed);
    }

    #[test]
    fn normalize_rejects_traversal_and_unknown_scheme() {
        assert!(matches!(normalize_path("user://a/../b"), Err(InvalidPath::Traversal(_))));
        assert!(matches!(normalize_path("ftp://a/b"), Err(InvalidPath::UnknownScheme(_))));
    }

    #[test]
    fn folds_backslashes_to_forward_slashes() {
        let path = normalize_path("user://a\\b\\c").unwrap();
        assert_eq!(path.segments, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
    }

    #[test]
    fn governance_gate_blocks_feature_disabled() {
        let path = normalize_path("user://docs/a.txt").unwrap();
        let config = GovernanceGateConfig {
            feature_enabled: false,
            is_localhost_dev: false,
        };
        let result = check_governance_gate(VfsOperation::Write, &path, config, false);
        assert!(matches!(result, Err(VfsDenyReason::GovernanceBlock)));
    }

    #[test]
    fn governance_gate_localhost_dev_bypasses_disabled_flag() {
        let path = normalize_path("user://docs/a.txt").unwrap();
        let config = GovernanceGateConfig {
            feature_enabled: false,
            is_localhost_dev: true,
        };
        let result = check_governance_gate(VfsOperation::Write, &path, config, false);
        assert!(result.is_ok());
    }

    #[test]
    fn governance_gate_denies_system_writes_even_when_enabled() {
        let path = normalize_path("system://config/x.json").unwrap();
        let config = GovernanceGateConfig {
            feature_enabled: true,
            is_localhost_dev: false,
        };
        let result = check_governance_gate(VfsOperation::Write, &path, config, false);
        assert!(matches!(result, Err(VfsDenyReason::PermissionDenied)));
    }

    #[test]
    fn governance_gate_never_blocks_reads() {
        let path = normalize_path("system://config/x.json").unwrap();
        let config = GovernanceGateConfig {
            feature_enabled: false,
            is_localhost_dev: false,
        };
        assert!(check_governance_gate(VfsOperation::Read, &path, config, true).is_ok());
    }

    #[test]
    fn s7_uniqueness_invariant_is_case_and_nfc_fold() {
        let siblings = vec!["Report.txt".to_string()];
        let result = check_uniqueness("report.txt", &siblings);
        assert!(matches!(result, Err(VfsDenyReason::Conflict(_))));

        let ok = check_uniqueness("summary.txt", &siblings);
        assert!(ok.is_ok());
    }

    #[test]
    fn duplicate_scanner_groups_by_canonical_key() {
        let root = TreeEntry {
            name: "docs".to_string(),
            children: Some(vec![
                TreeEntry { name: "Report.txt".to_string(), children: None },
                TreeEntry { name: "report.txt".to_string(), children: None },
                TreeEntry { name: "unique.txt".to_string(), children: None },
            ]),
        };
        let groups = scan_duplicates(Scheme::User, "user://docs", &root, 8, false);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].entries, vec!["Report.txt".to_string(), "report.txt".to_string()]);
    }

    #[test]
    fn duplicate_scanner_excludes_system_by_default() {
        let root = TreeEntry {
            name: "etc".to_string(),
            children: Some(vec![
                TreeEntry { name: "A.cfg".to_string(), children: None },
                TreeEntry { name: "a.cfg".to_string(), children: None },
            ]),
        };
        let groups = scan_duplicates(Scheme::System, "system://etc", &root, 8, false);
        assert!(groups.is_empty());
    }

    #[test]
    fn report_format_is_deterministic() {
        let groups = vec![DuplicateGroup {
            parent_path: "user://docs".to_string(),
            canonical_key: "report".to_string(),
            entries: vec!["Report.txt".to_string(), "report.txt".to_string()],
        }];
        let report = format_duplicate_report(&groups);
        assert!(report.contains("## user://docs"));
        assert!(report.contains("Report.txt"));
    }

    #[test]
    fn conflict_store_dedups_by_canonical_key_and_parent() {
        let store = ConflictStore::new();
        let id1 = store.record(
            ConflictType::DuplicateName,
            "user://docs",
            "report",
            vec!["Report.txt".into(), "report.txt".into()],
            ConflictSource::Scan,
            0,
        );
        let id2 = store.record(
            ConflictType::DuplicateName,
            "user://docs",
            "report",
            vec!["Report.txt".into(), "report.txt".into()],
            ConflictSource::Scan,
            10,
        );
        assert_eq!(id1, id2);
        assert_eq!(store.summary().open, 1);
    }

    #[test]
    fn conflict_store_resolve_transitions_and_notifies() {
        let store = ConflictStore::new();
        let id = store.record(
            ConflictType::DuplicateName,
            "user://docs",
            "report",
            vec!["Report.txt".into(), "report.txt".into()],
            ConflictSource::Scan,
            0,
        );
        assert!(store.resolve(&id, "renamed report.txt to report-2.txt", 5));
        assert_eq!(store.summary().resolved, 1);
        assert_eq!(store.summary().open, 0);
        assert!(!store.resolve(&id, "again", 6));
    }

    #[test]
    fn conflict_store_subscriber_receives_summaries() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let store = ConflictStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        store.subscribe(Box::new(move |_summary| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        store.record(
            ConflictType::DuplicateName,
            "user://docs",
            "report",
            vec!["Report.txt".into(), "report.txt".into()],
            ConflictSource::Scan,
            0,
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn normalize_accepts_and_round_trips_any_safe_segment_list(
            segments in proptest::collection::vec("[a-zA-Z0-9_ .]{1,12}", 1..6)
                .prop_filter("no segment is a bare dot or dot-dot", |segs| {
                    segs.iter().all(|s| s != "." && s != "..")
                }),
        ) {
            let raw = format!("user://{}", segments.join("/"));
            let path = normalize_path(&raw).unwrap();
            prop_assert_eq!(&path.segments, &segments);
            let reparsed = normalize_path(&path.to_string_form()).unwrap();
            prop_assert_eq!(path, reparsed);
        }

        #[test]
        fn normalize_rejects_any_traversal_segment_anywhere(
            prefix in proptest::collection::vec("[a-zA-Z0-9_]{1,8}", 0..3),
            suffix in proptest::collection::vec("[a-zA-Z0-9_]{1,8}", 0..3),
            dots in proptest::sample::select(vec![".", ".."]),
        ) {
            let mut segments = prefix;
            segments.push(dots.to_string());
            segments.extend(suffix);
            let raw = format!("user://{}", segments.join("/"));
            prop_assert!(matches!(normalize_path(&raw), Err(InvalidPath::Traversal(_))));
        }

        #[test]
        fn normalize_rejects_unknown_scheme_for_any_name(
            scheme in "[a-z]{2,10}",
            segment in "[a-zA-Z0-9_]{1,8}",
        ) {
            prop_assume!(!matches!(scheme.as_str(), "user" | "system" | "workspace"));
            let raw = format!("{scheme}://{segment}");
            prop_assert!(matches!(normalize_path(&raw), Err(InvalidPath::UnknownScheme(_))));
        }
    }
}
