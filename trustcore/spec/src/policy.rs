//! Policy engine decision and explanation data model (§3, §4.5, §6).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::session::Role;
use crate::Timestamp;

/// A step-up (elevated authentication) challenge identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepupChallenge {
    /// Challenge identifier the caller must complete.
    pub challenge_id: String,
    /// Human-readable description of what is required.
    pub description: String,
}

/// Tagged decision returned by capability and space evaluation (§3
/// `PolicyDecision`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyDecision {
    /// Permitted.
    Allow,
    /// Denied, with a human-readable reason.
    Deny {
        /// Why the request was denied.
        reason: String,
    },
    /// Requires an elevated-auth step-up before it can proceed.
    RequireStepup {
        /// The challenge the caller must complete.
        challenge: StepupChallenge,
    },
    /// Permitted in a degraded/fallback form.
    Degrade {
        /// Identifier of the fallback behavior granted instead.
        fallback: String,
    },
}

impl PolicyDecision {
    /// Shorthand to build a deny decision.
    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
        }
    }

    /// Whether this decision permits the caller to proceed (fully or in
    /// degraded form).
    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow | PolicyDecision::Degrade { .. })
    }
}

/// Cognitive/operating mode gating capability evaluation (§4.5 step 2).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveMode {
    /// Normal operation.
    Active,
    /// System is locked; all capability checks deny.
    Locked,
}

/// An active, possibly-expired step-up grant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepupGrant {
    /// When the grant expires, epoch milliseconds.
    pub expires_at: Timestamp,
}

impl StepupGrant {
    /// Whether this grant is still active at `now`.
    pub fn is_active(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// A capability definition in the capability graph (§4.5, §GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDefinition {
    /// Capability identifier.
    pub id: String,
    /// Policy tags the caller must hold all of.
    #[serde(default)]
    pub required_policies: BTreeSet<String>,
    /// Whether this capability requires an active, non-expired step-up.
    #[serde(default)]
    pub requires_stepup: bool,
    /// Challenge presented when step-up is required but absent.
    pub stepup_challenge: Option<StepupChallenge>,
}

/// Inputs to capability evaluation (§4.5 `evaluate`).
#[derive(Debug, Clone)]
pub struct CapabilityRequest<'a> {
    /// Capability being requested.
    pub capability_id: &'a str,
    /// Whether the caller is authenticated at all.
    pub authenticated: bool,
    /// Policy tags held by the caller.
    pub held_policies: &'a BTreeSet<String>,
    /// Active step-up grant, if any.
    pub stepup: Option<StepupGrant>,
    /// Correlation id for the resulting explanation.
    pub correlation_id: String,
    /// Evaluation timestamp, epoch milliseconds.
    pub now: Timestamp,
}

/// Space-scoped action kinds (§4.5 `evaluateSpaceAccess`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpaceAction {
    /// Access the space at all.
    Access,
    /// Open a new window within the space.
    OpenWindow,
    /// Bring an existing window in the space into focus.
    FocusWindow,
    /// Move a window into or within the space.
    MoveWindow,
}

/// Per-space permission bits (§3 `SpacePolicy`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpacePermissions {
    /// May access the space at all.
    pub can_access: bool,
    /// May open a window in the space.
    pub can_open_window: bool,
    /// May focus a window in the space.
    pub can_focus_window: bool,
    /// May move a window into/within the space.
    pub can_move_window: bool,
}

impl SpacePermissions {
    /// All permissions granted; the default for unregistered spaces
    /// (§4.5: "Default policy for unregistered spaces permits all actions
    /// to authenticated users").
    pub fn all() -> Self {
        Self {
            can_access: true,
            can_open_window: true,
            can_focus_window: true,
            can_move_window: true,
        }
    }

    /// The permission bit governing `action`.
    pub fn bit_for(self, action: SpaceAction) -> bool {
        match action {
            SpaceAction::Access => self.can_access,
            SpaceAction::OpenWindow => self.can_open_window,
            SpaceAction::FocusWindow => self.can_focus_window,
            SpaceAction::MoveWindow => self.can_move_window,
        }
    }
}

/// A virtual desktop's registered policy (§3 `SpacePolicy`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpacePolicy {
    /// Space identifier.
    pub space_id: String,
    /// Per-action permission bits.
    pub permissions: SpacePermissions,
    /// Minimum role required to access the space at all, if any.
    pub required_role: Option<Role>,
    /// Policy tags the caller must hold all of, if any.
    #[serde(default)]
    pub required_policies: BTreeSet<String>,
}

/// Inputs to [`crate::policy`]'s `evaluateSpaceAccess` (§4.5).
#[derive(Debug, Clone)]
pub struct SpaceAccessRequest<'a> {
    /// Space being accessed.
    pub space_id: &'a str,
    /// Action being attempted.
    pub action: SpaceAction,
    /// Whether the caller is authenticated.
    pub authenticated: bool,
    /// Caller's role, if authenticated.
    pub role: Option<Role>,
    /// Policy tags held by the caller.
    pub held_policies: &'a BTreeSet<String>,
    /// Window id, if the action concerns a specific window.
    pub window_id: Option<String>,
    /// Correlation id for the resulting explanation.
    pub correlation_id: String,
    /// Evaluation timestamp, epoch milliseconds.
    pub now: Timestamp,
}

/// The domain a policy explanation concerns (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum PolicyDomain {
    /// Space (virtual desktop) access decisions.
    SpacePolicy,
    /// Capability-graph access decisions.
    CapabilityPolicy,
    /// Window-manager visibility/focus decisions.
    WindowManager,
}

/// The coarse outcome carried in an [`Explanation`] (§6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExplanationDecision {
    /// The request was allowed.
    Allow,
    /// The request was denied.
    Deny,
    /// The request was not evaluated (e.g. a pure visibility predicate
    /// that short-circuited before reaching a rule).
    Skip,
}

/// A pure, replayable record of how a decision was reached (§4.5, §6).
/// Deterministic given the same inputs; safe to render directly in an
/// audit UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Explanation {
    /// Coarse outcome.
    pub decision: ExplanationDecision,
    /// What kind of intent was evaluated (e.g. `"capability_access"`).
    pub intent_type: String,
    /// Correlation id threaded through from the request.
    pub correlation_id: String,
    /// Capability evaluated, if any.
    pub capability_id: Option<String>,
    /// Space evaluated, if any.
    pub space_id: Option<String>,
    /// Window evaluated, if any.
    pub window_id: Option<String>,
    /// Which policy domain this explanation belongs to.
    pub policy_domain: PolicyDomain,
    /// The specific rule that produced a denial, if any.
    pub failed_rule: Option<String>,
    /// Ordered trace of reasoning steps taken to reach the decision.
    pub reason_chain: Vec<String>,
    /// When the explanation was produced, epoch milliseconds.
    pub timestamp: Timestamp,
}
