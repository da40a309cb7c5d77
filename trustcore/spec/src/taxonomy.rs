//! The frozen, versioned audit event vocabulary.
//!
//! Every value is a dotted path `group.[category.]action`. The set is
//! closed, append-only, and unique by both variant identity and string
//! value; adding an event bumps [`TAXONOMY_VERSION`].

/// Semver of the taxonomy. Bump on any addition; never remove a member.
pub const TAXONOMY_VERSION: &str = "1.3.0";

macro_rules! audit_taxonomy {
    ($( $variant:ident => $value:literal ),+ $(,)?) => {
        /// A taxonomy-registered audit event identifier.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum AuditEvent {
            $(
                #[allow(missing_docs)]
                $variant,
            )+
        }

        impl AuditEvent {
            /// All taxonomy members, in declaration order.
            pub const ALL: &'static [AuditEvent] = &[ $( AuditEvent::$variant ),+ ];

            /// The dotted-path string value for this event.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( AuditEvent::$variant => $value, )+
                }
            }

            /// Look up a taxonomy member by its dotted-path value.
            pub fn from_str_strict(value: &str) -> Option<AuditEvent> {
                match value {
                    $( $value => Some(AuditEvent::$variant), )+
                    _ => None,
                }
            }
        }
    };
}

audit_taxonomy! {
    // job.lifecycle
    JobLifecycleCreated => "job.lifecycle.created",
    JobLifecycleStarted => "job.lifecycle.started",
    JobLifecycleCompleted => "job.lifecycle.completed",
    JobLifecycleFailed => "job.lifecycle.failed",
    JobLifecycleCancelled => "job.lifecycle.cancelled",
    // job.ops
    JobOpsRetried => "job.ops.retried",
    JobOpsRescheduled => "job.ops.rescheduled",
    JobOpsPriorityChanged => "job.ops.priority_changed",
    // worker
    WorkerRegistered => "worker.registered",
    WorkerHeartbeat => "worker.heartbeat",
    WorkerDisconnected => "worker.disconnected",
    WorkerCapacityChanged => "worker.capacity_changed",
    // auth
    AuthLogin => "auth.login",
    AuthLogout => "auth.logout",
    AuthLoginFailed => "auth.login_failed",
    AuthSessionRevoked => "auth.session_revoked",
    AuthStepupRequired => "auth.stepup_required",
    AuthStepupCompleted => "auth.stepup_completed",
    // policy
    PolicyCheckPassed => "policy.check_passed",
    PolicyCheckDenied => "policy.check_denied",
    PolicySpaceAccessGranted => "policy.space_access_granted",
    PolicySpaceAccessDenied => "policy.space_access_denied",
    PolicyCapabilityUnknown => "policy.capability_unknown",
    // governance
    GovernanceFreeze => "governance.freeze",
    GovernanceThrottle => "governance.throttle",
    GovernanceLock => "governance.lock",
    GovernanceBlockPromotion => "governance.block_promotion",
    GovernanceOverride => "governance.override",
    GovernanceResumed => "governance.resumed",
    // system
    SystemStartup => "system.startup",
    SystemShutdown => "system.shutdown",
    SystemConfigChanged => "system.config_changed",
    SystemIntegrityChecked => "system.integrity_checked",
    // security
    SecurityNonceReplay => "security.nonce_replay",
    SecurityHashMismatch => "security.hash_mismatch",
    SecurityLedgerMismatch => "security.ledger_mismatch",
    SecuritySignatureInvalid => "security.signature_invalid",
    // brain
    BrainInferenceRequested => "brain.inference_requested",
    BrainInferenceCompleted => "brain.inference_completed",
    // process.lifecycle
    ProcessLifecycleRegistered => "process.lifecycle.registered",
    ProcessLifecycleActivated => "process.lifecycle.activated",
    ProcessLifecycleRetired => "process.lifecycle.retired",
    // VFS / UX origin
    VfsWrite => "vfs.write",
    VfsMkdir => "vfs.mkdir",
    VfsDelete => "vfs.delete",
    VfsRename => "vfs.rename",
    VfsMove => "vfs.move",
    VfsConflictDetected => "vfs.conflict_detected",
    VfsConflictResolved => "vfs.conflict_resolved",
    // alerts
    AlertSent => "alert.sent",
    AlertSuppressed => "alert.suppressed",
    AlertEscalated => "alert.escalated",
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_valid_segment(segment: &str) -> bool {
        let mut chars = segment.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
            && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }

    const KNOWN_GROUPS: &[&str] = &[
        "job", "worker", "auth", "policy", "governance", "system", "security", "brain",
        "process", "vfs", "alert",
    ];

    #[test]
    fn has_at_least_forty_events() {
        assert!(AuditEvent::ALL.len() >= 40, "taxonomy must have >= 40 events");
    }

    #[test]
    fn values_are_unique() {
        let mut seen = HashSet::new();
        for event in AuditEvent::ALL {
            assert!(seen.insert(event.as_str()), "duplicate value {}", event.as_str());
        }
    }

    #[test]
    fn every_value_has_known_group_and_valid_segments() {
        for event in AuditEvent::ALL {
            let value = event.as_str();
            let segments: Vec<&str> = value.split('.').collect();
            assert!(segments.len() == 2 || segments.len() == 3, "{value} must have 2 or 3 dotted segments");
            assert!(KNOWN_GROUPS.contains(&segments[0]), "{value} has unknown group");
            for segment in &segments {
                assert!(is_valid_segment(segment), "{value} has invalid segment {segment}");
            }
        }
    }

    #[test]
    fn roundtrips_through_string() {
        for event in AuditEvent::ALL {
            assert_eq!(AuditEvent::from_str_strict(event.as_str()), Some(*event));
        }
        assert_eq!(AuditEvent::from_str_strict("not.a.real.event"), None);
    }
}
