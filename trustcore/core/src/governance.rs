//! Autonomous governance reaction engine: sliding-window trigger counters
//! and the NORMAL → THROTTLED → SOFT_LOCK → HARD_FREEZE mode FSM (§4.4).

use std::collections::VecDeque;

use parking_lot::Mutex;

use trustcore_spec::governance::{
    ExecutionGate, GovernanceMode, GovernanceReaction, GovernanceState, GovernanceTrigger,
    ViolationCounts, DEFAULT_NONCE_REPLAY_THRESHOLD, DEFAULT_POLICY_BURST_THRESHOLD,
    DEFAULT_SOFT_LOCK_DURATION_MS, DEFAULT_WINDOW_MS, REACTION_RING_CAPACITY,
};
use trustcore_spec::Timestamp;

/// A plain vector of timestamps, purged of anything older than `window_ms`
/// on every access (§4.4, §9: "cheap at expected cardinalities").
#[derive(Debug, Default)]
struct SlidingWindowCounter {
    events: VecDeque<Timestamp>,
}

impl SlidingWindowCounter {
    fn record(&mut self, now: Timestamp, window_ms: u64) -> u64 {
        self.events.push_back(now);
        self.purge(now, window_ms);
        self.events.len() as u64
    }

    fn purge(&mut self, now: Timestamp, window_ms: u64) {
        while let Some(&front) = self.events.front() {
            if now.saturating_sub(front) > window_ms {
                self.events.pop_front();
            } else {
                break;
            }
        }
    }

    fn reset(&mut self) {
        self.events.clear();
    }
}

/// Thresholds governing trigger evaluation (§4.4, all overridable, with
/// the spec's defaults).
#[derive(Debug, Clone, Copy)]
pub struct GovernanceThresholds {
    /// Sliding-window duration for policy-burst and nonce-replay counters.
    pub window_ms: u64,
    /// Policy-denial burst threshold (`count > threshold` escalates).
    pub policy_burst_limit: u64,
    /// Nonce-replay flood threshold.
    pub nonce_replay_limit: u64,
    /// SOFT_LOCK duration once triggered.
    pub soft_lock_duration_ms: u64,
}

impl Default for GovernanceThresholds {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            policy_burst_limit: DEFAULT_POLICY_BURST_THRESHOLD,
            nonce_replay_limit: DEFAULT_NONCE_REPLAY_THRESHOLD,
            soft_lock_duration_ms: DEFAULT_SOFT_LOCK_DURATION_MS,
        }
    }
}

/// Inputs to [`GovernanceEngine::evaluate_integrity`] (§4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrityCheck {
    /// Whether the last ledger hash check passed.
    pub hash_valid: bool,
    /// Whether the kernel/process is in its frozen/verified state.
    pub kernel_frozen: bool,
    /// Whether any integrity-check error codes were reported.
    pub has_error_codes: bool,
}

struct Inner {
    state: GovernanceState,
    policy_deny: SlidingWindowCounter,
    nonce_replay: SlidingWindowCounter,
    reactions: VecDeque<GovernanceReaction>,
    thresholds: GovernanceThresholds,
}

/// Called once per emitted [`GovernanceReaction`], outside the engine's
/// critical section (§4.4: "every reaction must produce exactly one audit
/// envelope"). Kept as a plain callback rather than a direct ledger
/// dependency so this engine stays ignorant of the audit envelope factory
/// and the ledger it feeds — the caller (typically `governd`, wiring the
/// engines together) owns turning [`GovernanceReaction::audit_event`] into
/// an envelope with whatever trace id and actor fit its call site.
pub type ReactionSink = Box<dyn Fn(&GovernanceReaction) + Send + Sync>;

/// The governance reaction engine: a single process-wide state object
/// behind one critical section (§5, §9 — "Class singletons ... become
/// explicit process-wide state objects").
pub struct GovernanceEngine {
    inner: Mutex<Inner>,
    reaction_sink: Option<ReactionSink>,
}

impl GovernanceEngine {
    /// Start a fresh engine in `NORMAL` mode at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self::with_thresholds(now, GovernanceThresholds::default())
    }

    /// Start a fresh engine with custom thresholds.
    pub fn with_thresholds(now: Timestamp, thresholds: GovernanceThresholds) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GovernanceState::initial(now),
                policy_deny: SlidingWindowCounter::default(),
                nonce_replay: SlidingWindowCounter::default(),
                reactions: VecDeque::with_capacity(REACTION_RING_CAPACITY),
                thresholds,
            }),
            reaction_sink: None,
        }
    }

    /// Attach a callback invoked once per emitted reaction, after the
    /// engine's internal state has already been updated and the lock
    /// released. Typically used to append an audit envelope built from
    /// [`GovernanceReaction::audit_event`] to the ledger.
    pub fn with_reaction_sink(mut self, sink: ReactionSink) -> Self {
        self.reaction_sink = Some(sink);
        self
    }

    fn notify(&self, reaction: Option<GovernanceReaction>) {
        if let (Some(reaction), Some(sink)) = (reaction, &self.reaction_sink) {
            sink(&reaction);
        }
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> GovernanceState {
        self.inner.lock().state.clone()
    }

    /// The reaction ring buffer, most recent last.
    pub fn reactions(&self) -> Vec<GovernanceReaction> {
        self.inner.lock().reactions.iter().cloned().collect()
    }

    fn push_reaction(
        inner: &mut Inner,
        now: Timestamp,
        trigger: GovernanceTrigger,
    ) -> GovernanceReaction {
        if inner.reactions.len() == REACTION_RING_CAPACITY {
            inner.reactions.pop_front();
        }
        let reaction = GovernanceReaction {
            mode: inner.state.mode,
            trigger,
            reason: inner.state.reason.clone(),
            at: now,
        };
        inner.reactions.push_back(reaction.clone());
        reaction
    }

    /// Escalate to `target` if `target`'s rank exceeds the current mode's
    /// rank; refresh reason/timestamp on a same-rank trigger; no-op on a
    /// strictly-lower rank (§4.4 monotonicity, invariant 6). Returns the
    /// emitted reaction, if any.
    fn escalate(
        inner: &mut Inner,
        target: GovernanceMode,
        trigger: GovernanceTrigger,
        reason: String,
        now: Timestamp,
        lock_expires_at: Option<Timestamp>,
    ) -> Option<GovernanceReaction> {
        match target.rank().cmp(&inner.state.mode.rank()) {
            std::cmp::Ordering::Greater | std::cmp::Ordering::Equal => {
                inner.state.reason = reason;
                inner.state.triggered_at = now;
                inner.state.triggered_by = trigger;
                if target.rank() > inner.state.mode.rank() {
                    inner.state.mode = target;
                }
                if let Some(expiry) = lock_expires_at {
                    inner.state.lock_expires_at = expiry;
                }
                Some(Self::push_reaction(inner, now, trigger))
            }
            std::cmp::Ordering::Less => None,
        }
    }

    /// Evaluate an integrity check (§4.4). Any failure forces `HARD_FREEZE`
    /// with severity CRITICAL; always updates `last_integrity_check`.
    pub fn evaluate_integrity(&self, check: IntegrityCheck, now: Timestamp) {
        let reaction = {
            let mut inner = self.inner.lock();
            inner.state.last_integrity_check = Some(now);
            if !check.hash_valid || !check.kernel_frozen || check.has_error_codes {
                inner.state.violation_counts.integrity_fail += 1;
                let reason = format!(
                    "Integrity failure: hashValid={}, kernelFrozen={}, errorCodes={}",
                    check.hash_valid, check.kernel_frozen, check.has_error_codes
                );
                Self::escalate(
                    &mut inner,
                    GovernanceMode::HardFreeze,
                    GovernanceTrigger::IntegrityFailure,
                    reason,
                    now,
                    None,
                )
            } else {
                None
            }
        };
        self.notify(reaction);
    }

    /// Record a policy denial; escalates to `THROTTLED` when the sliding
    /// window count exceeds the burst limit (§4.4, S3).
    pub fn record_policy_deny(&self, now: Timestamp) {
        let reaction = {
            let mut inner = self.inner.lock();
            let window_ms = inner.thresholds.window_ms;
            let count = inner.policy_deny.record(now, window_ms);
            inner.state.violation_counts.policy_deny = count;
            if count > inner.thresholds.policy_burst_limit && inner.state.mode < GovernanceMode::HardFreeze {
                let reason = format!("Policy violation burst: {count}");
                Self::escalate(
                    &mut inner,
                    GovernanceMode::Throttled,
                    GovernanceTrigger::PolicyBurst,
                    reason,
                    now,
                    None,
                )
            } else {
                None
            }
        };
        self.notify(reaction);
    }

    /// Record a nonce-replay detection; escalates to `SOFT_LOCK` with a
    /// wall-clock expiry when the sliding window count exceeds the flood
    /// limit (§4.4, S4).
    pub fn record_nonce_replay(&self, now: Timestamp) {
        let reaction = {
            let mut inner = self.inner.lock();
            let window_ms = inner.thresholds.window_ms;
            let count = inner.nonce_replay.record(now, window_ms);
            inner.state.violation_counts.nonce_replay = count;
            if count > inner.thresholds.nonce_replay_limit && inner.state.mode < GovernanceMode::HardFreeze {
                let reason = format!("Nonce replay flood: {count}");
                let expiry = now + inner.thresholds.soft_lock_duration_ms;
                Self::escalate(
                    &mut inner,
                    GovernanceMode::SoftLock,
                    GovernanceTrigger::NonceReplayFlood,
                    reason,
                    now,
                    Some(expiry),
                )
            } else {
                None
            }
        };
        self.notify(reaction);
    }

    /// Compare a build artifact hash against the ledger's recorded hash.
    /// Equality clears `promotionBlocked`; inequality sets it and records
    /// a reaction without changing mode (§4.4).
    pub fn check_ledger_parity(&self, build_sha: &str, ledger_sha: &str, now: Timestamp) {
        let reaction = {
            let mut inner = self.inner.lock();
            if build_sha == ledger_sha {
                inner.state.promotion_blocked = false;
                None
            } else {
                inner.state.promotion_blocked = true;
                inner.state.violation_counts.ledger_mismatch += 1;
                inner.state.reason = format!(
                    "Ledger/build hash mismatch: build={build_sha} ledger={ledger_sha}"
                );
                inner.state.triggered_by = GovernanceTrigger::LedgerMismatch;
                inner.state.triggered_at = now;
                Some(Self::push_reaction(&mut inner, now, GovernanceTrigger::LedgerMismatch))
            }
        };
        self.notify(reaction);
    }

    /// Whether execution is currently allowed (§4.4). Auto-expires
    /// `SOFT_LOCK` before evaluating: if `mode == SOFT_LOCK` and
    /// `now > lockExpiresAt`, transitions to `NORMAL` first, preserving
    /// counters (§9 Open Question: `lockExpiresAt` itself is left at its
    /// previous value rather than eagerly cleared).
    pub fn is_execution_allowed(&self, now: Timestamp) -> ExecutionGate {
        let (gate, reaction) = {
            let mut inner = self.inner.lock();
            let mut reaction = None;
            if inner.state.mode == GovernanceMode::SoftLock && now > inner.state.lock_expires_at {
                inner.state.mode = GovernanceMode::Normal;
                inner.state.reason = "soft lock expired".to_string();
                inner.state.triggered_at = now;
                inner.state.triggered_by = GovernanceTrigger::SystemInit;
                reaction = Some(Self::push_reaction(&mut inner, now, GovernanceTrigger::SystemInit));
            }
            let gate = match inner.state.mode {
                GovernanceMode::HardFreeze => ExecutionGate {
                    allowed: false,
                    reason: format!("HARD_FREEZE: {}", inner.state.reason),
                },
                GovernanceMode::SoftLock => ExecutionGate {
                    allowed: false,
                    reason: format!(
                        "SOFT_LOCK until {}: {}",
                        inner.state.lock_expires_at, inner.state.reason
                    ),
                },
                _ => ExecutionGate {
                    allowed: true,
                    reason: "execution permitted".to_string(),
                },
            };
            (gate, reaction)
        };
        self.notify(reaction);
        gate
    }

    /// Set the mode unconditionally, bypassing monotonicity (§4.4). Only
    /// an owner-authorized caller should invoke this; enforcing that is
    /// the session guard's responsibility, not this engine's. When the
    /// target is `NORMAL`, resets the policy-deny and nonce-replay
    /// counters and clears `promotionBlocked`.
    pub fn owner_override(&self, target: GovernanceMode, reason: impl Into<String>, now: Timestamp) {
        let reaction = {
            let mut inner = self.inner.lock();
            inner.state.mode = target;
            inner.state.reason = reason.into();
            inner.state.triggered_at = now;
            inner.state.triggered_by = GovernanceTrigger::OwnerOverride;
            if target == GovernanceMode::Normal {
                inner.policy_deny.reset();
                inner.nonce_replay.reset();
                inner.state.violation_counts = ViolationCounts::default();
                inner.state.promotion_blocked = false;
            }
            Self::push_reaction(&mut inner, now, GovernanceTrigger::OwnerOverride)
        };
        self.notify(Some(reaction));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_policy_burst_escalates_on_sixth_call_within_a_second() {
        let engine = GovernanceEngine::new(0);
        for i in 0..5u64 {
            engine.record_policy_deny(i * 100);
            assert_eq!(engine.state().mode, GovernanceMode::Normal);
        }
        engine.record_policy_deny(500);
        let state = engine.state();
        assert_eq!(state.mode, GovernanceMode::Throttled);
        assert!(state.reason.contains("Policy violation burst: 6"));
    }

    #[test]
    fn s4_nonce_flood_soft_locks_and_expires() {
        let engine = GovernanceEngine::new(0);
        for i in 0..4u64 {
            engine.record_nonce_replay(i * 10);
        }
        let state = engine.state();
        assert_eq!(state.mode, GovernanceMode::SoftLock);
        assert_eq!(state.lock_expires_at, 30 + DEFAULT_SOFT_LOCK_DURATION_MS);

        let gate = engine.is_execution_allowed(state.lock_expires_at);
        assert!(!gate.allowed);
        let gate = engine.is_execution_allowed(state.lock_expires_at + 1100);
        assert!(gate.allowed);
        assert_eq!(engine.state().mode, GovernanceMode::Normal);
    }

    #[test]
    fn s5_integrity_failure_hard_freezes_and_override_restores() {
        let engine = GovernanceEngine::new(0);
        engine.evaluate_integrity(
            IntegrityCheck {
                hash_valid: false,
                kernel_frozen: true,
                has_error_codes: false,
            },
            100,
        );
        assert_eq!(engine.state().mode, GovernanceMode::HardFreeze);
        assert!(!engine.is_execution_allowed(200).allowed);

        engine.owner_override(GovernanceMode::Normal, "owner cleared freeze", 300);
        assert_eq!(engine.state().mode, GovernanceMode::Normal);
        assert!(engine.is_execution_allowed(400).allowed);
        assert_eq!(engine.state().violation_counts.policy_deny, 0);
    }

    #[test]
    fn triggers_never_reduce_mode_rank() {
        let engine = GovernanceEngine::new(0);
        engine.evaluate_integrity(
            IntegrityCheck {
                hash_valid: false,
                kernel_frozen: true,
                has_error_codes: false,
            },
            0,
        );
        assert_eq!(engine.state().mode, GovernanceMode::HardFreeze);
        engine.record_policy_deny(10);
        engine.record_nonce_replay(20);
        assert_eq!(engine.state().mode, GovernanceMode::HardFreeze);
    }

    #[test]
    fn ledger_mismatch_blocks_promotion_without_changing_mode() {
        let engine = GovernanceEngine::new(0);
        engine.check_ledger_parity("deadbeef", "cafebabe", 10);
        let state = engine.state();
        assert!(state.promotion_blocked);
        assert_eq!(state.mode, GovernanceMode::Normal);
        engine.check_ledger_parity("deadbeef", "deadbeef", 20);
        assert!(!engine.state().promotion_blocked);
    }

    #[test]
    fn reaction_ring_buffer_is_bounded() {
        let engine = GovernanceEngine::new(0);
        for i in 0..(REACTION_RING_CAPACITY as u64 + 10) {
            engine.check_ledger_parity("a", "b", i);
        }
        assert_eq!(engine.reactions().len(), REACTION_RING_CAPACITY);
    }

    #[test]
    fn reaction_sink_fires_exactly_once_per_reaction() {
        use std::sync::{Arc, Mutex as StdMutex};

        let seen: Arc<StdMutex<Vec<GovernanceTrigger>>> = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let engine = GovernanceEngine::new(0)
            .with_reaction_sink(Box::new(move |reaction| {
                seen_clone.lock().unwrap().push(reaction.trigger);
            }));

        // five policy denies stay under the burst threshold: no reaction yet.
        for i in 0..5u64 {
            engine.record_policy_deny(i * 100);
        }
        assert!(seen.lock().unwrap().is_empty());

        // the sixth crosses the threshold and fires exactly one reaction.
        engine.record_policy_deny(500);
        assert_eq!(*seen.lock().unwrap(), vec![GovernanceTrigger::PolicyBurst]);

        engine.owner_override(GovernanceMode::Normal, "reset", 600);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![GovernanceTrigger::PolicyBurst, GovernanceTrigger::OwnerOverride]
        );
    }
}
