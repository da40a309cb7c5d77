//! Governance reaction engine data model (§3 `GovernanceState`, §4.4).

use serde::{Deserialize, Serialize};

use crate::envelope::AuditSeverity;
use crate::taxonomy::AuditEvent;
use crate::Timestamp;

/// The four governance operating levels, escalating left to right.
/// `Ord` follows declaration order: `NORMAL < THROTTLED < SOFT_LOCK < HARD_FREEZE`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceMode {
    /// Normal operation.
    Normal,
    /// Elevated caution; writes still permitted.
    Throttled,
    /// Temporary write freeze with a wall-clock expiry.
    SoftLock,
    /// Total freeze; only an owner override can clear it.
    HardFreeze,
}

impl GovernanceMode {
    /// Numeric rank used for monotonicity comparisons (§4.4, invariant 6).
    pub fn rank(self) -> u8 {
        match self {
            GovernanceMode::Normal => 0,
            GovernanceMode::Throttled => 1,
            GovernanceMode::SoftLock => 2,
            GovernanceMode::HardFreeze => 3,
        }
    }
}

/// What caused the current (or most recent) mode transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceTrigger {
    /// A ledger hash or kernel integrity check failed.
    IntegrityFailure,
    /// A sliding-window burst of policy denials.
    PolicyBurst,
    /// A sliding-window flood of nonce-replay detections.
    NonceReplayFlood,
    /// Build artifact hash does not match the ledger's recorded hash.
    LedgerMismatch,
    /// Process startup default state.
    SystemInit,
    /// An explicit owner override.
    OwnerOverride,
}

/// Sliding-window violation tallies (§4.4). Each count reflects the number
/// of events observed within the current window at last evaluation time.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationCounts {
    /// Policy-denial events within the current window.
    pub policy_deny: u64,
    /// Nonce-replay events within the current window.
    pub nonce_replay: u64,
    /// Integrity-check failures observed (monotonic, not windowed).
    pub integrity_fail: u64,
    /// Ledger/build hash mismatches observed (monotonic, not windowed).
    pub ledger_mismatch: u64,
}

/// Current governance state (§3).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GovernanceState {
    /// Current operating mode.
    pub mode: GovernanceMode,
    /// Human-readable reason for the current mode.
    pub reason: String,
    /// When the current mode was entered, epoch milliseconds.
    pub triggered_at: Timestamp,
    /// What triggered the current mode.
    pub triggered_by: GovernanceTrigger,
    /// Sliding-window and cumulative violation tallies.
    pub violation_counts: ViolationCounts,
    /// Timestamp of the last integrity evaluation, if any.
    pub last_integrity_check: Option<Timestamp>,
    /// Whether promotion/deploy is currently blocked by a ledger mismatch.
    pub promotion_blocked: bool,
    /// Wall-clock expiry for `SOFT_LOCK`; meaningless in other modes.
    pub lock_expires_at: Timestamp,
}

impl GovernanceState {
    /// The initial state at process startup.
    pub fn initial(now: Timestamp) -> Self {
        Self {
            mode: GovernanceMode::Normal,
            reason: "system initialized".to_string(),
            triggered_at: now,
            triggered_by: GovernanceTrigger::SystemInit,
            violation_counts: ViolationCounts::default(),
            last_integrity_check: None,
            promotion_blocked: false,
            lock_expires_at: 0,
        }
    }
}

/// Result of [`crate::governance`]'s `is_execution_allowed` gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionGate {
    /// Whether execution is currently permitted.
    pub allowed: bool,
    /// Why, including an expiry time when locked.
    pub reason: String,
}

/// One entry in the bounded reaction ring buffer (§4.4, cap 50). Every
/// reaction must correspond to exactly one emitted audit envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GovernanceReaction {
    /// Resulting mode after the reaction was applied.
    pub mode: GovernanceMode,
    /// What triggered this reaction.
    pub trigger: GovernanceTrigger,
    /// Human-readable reason, mirrors `GovernanceState::reason` at the time.
    pub reason: String,
    /// When the reaction occurred, epoch milliseconds.
    pub at: Timestamp,
}

impl GovernanceReaction {
    /// The taxonomy event this reaction must be audited under (§4.4:
    /// `GOVERNANCE_FREEZE`, `_THROTTLE`, `_LOCK`, `_BLOCK_PROMOTION`,
    /// `_OVERRIDE`). The mapping is keyed on the trigger, not the
    /// resulting mode, since each trigger escalates to exactly one mode.
    pub fn audit_event(&self) -> AuditEvent {
        match self.trigger {
            GovernanceTrigger::IntegrityFailure => AuditEvent::GovernanceFreeze,
            GovernanceTrigger::PolicyBurst => AuditEvent::GovernanceThrottle,
            GovernanceTrigger::NonceReplayFlood => AuditEvent::GovernanceLock,
            GovernanceTrigger::LedgerMismatch => AuditEvent::GovernanceBlockPromotion,
            GovernanceTrigger::OwnerOverride => AuditEvent::GovernanceOverride,
            GovernanceTrigger::SystemInit => AuditEvent::GovernanceResumed,
        }
    }

    /// Severity to stamp on the reaction's audit envelope. `IntegrityFailure`
    /// is CRITICAL per §4.4; the others are ranked by how close they put the
    /// system to a full freeze (the spec's prose calls these "HIGH"/"MEDIUM"
    /// but §3 closes `AuditSeverity` over `INFO|WARN|ERROR|CRITICAL`).
    pub fn severity(&self) -> AuditSeverity {
        match self.trigger {
            GovernanceTrigger::IntegrityFailure => AuditSeverity::Critical,
            GovernanceTrigger::NonceReplayFlood => AuditSeverity::Error,
            GovernanceTrigger::PolicyBurst | GovernanceTrigger::LedgerMismatch => AuditSeverity::Warn,
            GovernanceTrigger::OwnerOverride | GovernanceTrigger::SystemInit => AuditSeverity::Info,
        }
    }
}

/// Capacity of the governance reaction ring buffer.
pub const REACTION_RING_CAPACITY: usize = 50;

/// Default sliding-window duration for policy-burst and nonce-replay
/// counters (60 seconds).
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

/// Default policy-denial burst threshold (§4.4: `count > threshold`).
pub const DEFAULT_POLICY_BURST_THRESHOLD: u64 = 5;

/// Default nonce-replay flood threshold.
pub const DEFAULT_NONCE_REPLAY_THRESHOLD: u64 = 3;

/// Default soft-lock duration once triggered (60 seconds).
pub const DEFAULT_SOFT_LOCK_DURATION_MS: u64 = 60_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_rank_is_strictly_increasing() {
        assert!(GovernanceMode::Normal.rank() < GovernanceMode::Throttled.rank());
        assert!(GovernanceMode::Throttled.rank() < GovernanceMode::SoftLock.rank());
        assert!(GovernanceMode::SoftLock.rank() < GovernanceMode::HardFreeze.rank());
    }

    #[test]
    fn every_trigger_maps_to_a_distinct_governance_audit_event() {
        let reaction = |trigger| GovernanceReaction {
            mode: GovernanceMode::Normal,
            trigger,
            reason: String::new(),
            at: 0,
        };
        assert_eq!(
            reaction(GovernanceTrigger::IntegrityFailure).audit_event(),
            AuditEvent::GovernanceFreeze
        );
        assert_eq!(
            reaction(GovernanceTrigger::PolicyBurst).audit_event(),
            AuditEvent::GovernanceThrottle
        );
        assert_eq!(
            reaction(GovernanceTrigger::NonceReplayFlood).audit_event(),
            AuditEvent::GovernanceLock
        );
        assert_eq!(
            reaction(GovernanceTrigger::LedgerMismatch).audit_event(),
            AuditEvent::GovernanceBlockPromotion
        );
        assert_eq!(
            reaction(GovernanceTrigger::OwnerOverride).audit_event(),
            AuditEvent::GovernanceOverride
        );
        assert_eq!(
            reaction(GovernanceTrigger::SystemInit).audit_event(),
            AuditEvent::GovernanceResumed
        );
    }

    #[test]
    fn integrity_failure_reaction_is_critical() {
        let reaction = GovernanceReaction {
            mode: GovernanceMode::HardFreeze,
            trigger: GovernanceTrigger::IntegrityFailure,
            reason: String::new(),
            at: 0,
        };
        assert_eq!(reaction.severity(), AuditSeverity::Critical);
    }

    #[test]
    fn initial_state_is_normal_with_system_init_trigger() {
        let state = GovernanceState::initial(1_700_000_000_000);
        assert_eq!(state.mode, GovernanceMode::Normal);
        assert_eq!(state.triggered_by, GovernanceTrigger::SystemInit);
        assert!(!state.promotion_blocked);
    }
}
