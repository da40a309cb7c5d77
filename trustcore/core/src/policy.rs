//! Deterministic capability and space authorization engine (§4.5).
//!
//! Pure with respect to in-memory state: no suspension points, no
//! timeouts, never throws. Every outcome is carried in the returned
//! [`PolicyDecision`]/[`Explanation`] pair.

use std::collections::HashMap;

use trustcore_spec::policy::{
    CapabilityDefinition, CapabilityRequest, CognitiveMode, Explanation, ExplanationDecision,
    PolicyDecision, PolicyDomain, SpaceAccessRequest, SpaceAction, SpacePolicy, StepupChallenge,
};
use trustcore_spec::session::Role;

/// A registered capability graph plus space registry, evaluated
/// deterministically against a request (§4.5).
#[derive(Debug, Default)]
pub struct PolicyEngine {
    capabilities: HashMap<String, CapabilityDefinition>,
    spaces: HashMap<String, SpacePolicy>,
}

impl PolicyEngine {
    /// An engine with no registered capabilities or spaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability definition.
    pub fn register_capability(&mut self, capability: CapabilityDefinition) {
        self.capabilities.insert(capability.id.clone(), capability);
    }

    /// Register (or replace) a space's policy.
    pub fn register_space(&mut self, space: SpacePolicy) {
        self.spaces.insert(space.space_id.clone(), space);
    }

    /// Resolve capability access per the ordered procedure in §4.5:
    /// unknown capability → locked mode → unauthenticated → missing
    /// policies → step-up required → allow.
    pub fn evaluate(
        &self,
        request: &CapabilityRequest<'_>,
        cognitive_mode: CognitiveMode,
    ) -> (PolicyDecision, Explanation) {
        let mut reason_chain = Vec::new();

        let Some(capability) = self.capabilities.get(request.capability_id) else {
            reason_chain.push(format!("capability {:?} is not registered", request.capability_id));
            return self.deny(
                request,
                "Unknown capability",
                Some("unknown_capability".to_string()),
                reason_chain,
            );
        };
        reason_chain.push(format!("capability {:?} resolved", request.capability_id));

        if cognitive_mode == CognitiveMode::Locked {
            reason_chain.push("cognitive mode is locked".to_string());
            return self.deny(
                request,
                "System is locked",
                Some("cognitive_mode_locked".to_string()),
                reason_chain,
            );
        }

        if !request.authenticated {
            reason_chain.push("caller is not authenticated".to_string());
            return self.deny(
                request,
                "Authentication required",
                Some("not_authenticated".to_string()),
                reason_chain,
            );
        }

        let missing: Vec<&String> = capability
            .required_policies
            .iter()
            .filter(|p| !request.held_policies.contains(p.as_str()))
            .collect();
        if !missing.is_empty() {
            let missing_list = missing
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            reason_chain.push(format!("missing required policies: {missing_list}"));
            return self.deny(
                request,
                format!("Missing policies: {missing_list}"),
                Some("missing_policies".to_string()),
                reason_chain,
            );
        }

        if capability.requires_stepup {
            let active = request.stepup.is_some_and(|g| g.is_active(request.now));
            if !active {
                reason_chain.push("capability requires an active step-up grant".to_string());
                let challenge = capability.stepup_challenge.clone().unwrap_or(StepupChallenge {
                    challenge_id: format!("stepup:{}", capability.id),
                    description: "elevated authentication required".to_string(),
                });
                let explanation = Explanation {
                    decision: ExplanationDecision::Deny,
                    intent_type: "capability_access".to_string(),
                    correlation_id: request.correlation_id.clone(),
                    capability_id: Some(request.capability_id.to_string()),
                    space_id: None,
                    window_id: None,
                    policy_domain: PolicyDomain::CapabilityPolicy,
                    failed_rule: Some("requires_stepup".to_string()),
                    reason_chain,
                    timestamp: request.now,
                };
                return (PolicyDecision::RequireStepup { challenge }, explanation);
            }
            reason_chain.push("active step-up grant present".to_string());
        }

        reason_chain.push("all checks passed".to_string());
        let explanation = Explanation {
            decision: ExplanationDecision::Allow,
            intent_type: "capability_access".to_string(),
            correlation_id: request.correlation_id.clone(),
            capability_id: Some(request.capability_id.to_string()),
            space_id: None,
            window_id: None,
            policy_domain: PolicyDomain::CapabilityPolicy,
            failed_rule: None,
            reason_chain,
            timestamp: request.now,
        };
        (PolicyDecision::Allow, explanation)
    }

    fn deny(
        &self,
        request: &CapabilityRequest<'_>,
        reason: impl Into<String>,
        failed_rule: Option<String>,
        reason_chain: Vec<String>,
    ) -> (PolicyDecision, Explanation) {
        let explanation = Explanation {
            decision: ExplanationDecision::Deny,
            intent_type: "capability_access".to_string(),
            correlation_id: request.correlation_id.clone(),
            capability_id: Some(request.capability_id.to_string()),
            space_id: None,
            window_id: None,
            policy_domain: PolicyDomain::CapabilityPolicy,
            failed_rule,
            reason_chain,
            timestamp: request.now,
        };
        (PolicyDecision::deny(reason), explanation)
    }

    /// Resolve space access per §4.5's ordered procedure: unauthenticated
    /// → required-role hierarchy → required-policies subset → action bit
    /// → allow. Unregistered spaces default-permit every action to
    /// authenticated callers.
    pub fn evaluate_space_access(
        &self,
        request: &SpaceAccessRequest<'_>,
    ) -> (PolicyDecision, Explanation) {
        let mut reason_chain = Vec::new();
        let base = |reason_chain: Vec<String>, failed_rule: Option<&str>, decision: ExplanationDecision| {
            Explanation {
                decision,
                intent_type: "space_access".to_string(),
                correlation_id: request.correlation_id.clone(),
                capability_id: None,
                space_id: Some(request.space_id.to_string()),
                window_id: request.window_id.clone(),
                policy_domain: PolicyDomain::SpacePolicy,
                failed_rule: failed_rule.map(str::to_string),
                reason_chain,
                timestamp: request.now,
            }
        };

        if !request.authenticated {
            reason_chain.push("caller is not authenticated".to_string());
            let explanation = base(reason_chain, Some("not_authenticated"), ExplanationDecision::Deny);
            return (PolicyDecision::deny("Authentication required"), explanation);
        }

        let policy = self.spaces.get(request.space_id);
        reason_chain.push(match policy {
            Some(_) => format!("space {:?} has a registered policy", request.space_id),
            None => format!(
                "space {:?} is unregistered; default-allow applies",
                request.space_id
            ),
        });

        if let Some(policy) = policy {
            if let Some(required_role) = policy.required_role {
                let role = request.role.unwrap_or(Role::Viewer);
                if !role.satisfies(required_role) {
                    reason_chain.push(format!(
                        "role {role:?} does not satisfy required role {required_role:?}"
                    ));
                    let explanation =
                        base(reason_chain, Some("required_role"), ExplanationDecision::Deny);
                    return (PolicyDecision::deny("Insufficient role"), explanation);
                }
            }

            let missing: Vec<&String> = policy
                .required_policies
                .iter()
                .filter(|p| !request.held_policies.contains(p.as_str()))
                .collect();
            if !missing.is_empty() {
                let missing_list = missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                reason_chain.push(format!("missing required policies: {missing_list}"));
                let explanation =
                    base(reason_chain, Some("required_policies"), ExplanationDecision::Deny);
                return (
                    PolicyDecision::deny(format!("Missing policies: {missing_list}")),
                    explanation,
                );
            }

            if !policy.permissions.bit_for(request.action) {
                reason_chain.push(format!("{:?} is not permitted in this space", request.action));
                let explanation =
                    base(reason_chain, Some("action_permission"), ExplanationDecision::Deny);
                return (PolicyDecision::deny("Action not permitted"), explanation);
            }
        }

        reason_chain.push("all checks passed".to_string());
        let explanation = base(reason_chain, None, ExplanationDecision::Allow);
        (PolicyDecision::Allow, explanation)
    }

    /// Whether `capability_id` can be discovered (listed) within
    /// `space_id` by the current caller. Pure predicate, no side effects.
    pub fn can_discover_capability_in_space(
        &self,
        capability_id: &str,
        space_access: &PolicyDecision,
    ) -> bool {
        self.capabilities.contains_key(capability_id) && space_access.is_allowed()
    }

    /// Whether a window belonging to `window_space_id` is visible while
    /// `active_space_id` is focused, given a prior space-access decision
    /// for `active_space_id` (§4.5: requires `window.spaceId ==
    /// activeSpaceId` AND `canAccess`).
    pub fn is_window_visible_in_space(
        &self,
        window_space_id: &str,
        active_space_id: &str,
        can_access_active_space: bool,
    ) -> bool {
        window_space_id == active_space_id && can_access_active_space
    }

    /// Whether a window can be focused: visible, plus the space's
    /// `can_focus_window` permission (default-allow for unregistered
    /// spaces).
    pub fn can_focus_window_in_space(
        &self,
        window_space_id: &str,
        active_space_id: &str,
        can_access_active_space: bool,
    ) -> bool {
        if !self.is_window_visible_in_space(window_space_id, active_space_id, can_access_active_space) {
            return false;
        }
        self.spaces
            .get(active_space_id)
            .map(|p| p.permissions.can_focus_window)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use trustcore_spec::policy::{SpacePermissions, StepupGrant};

    fn cap(id: &str) -> CapabilityDefinition {
        CapabilityDefinition {
            id: id.to_string(),
            required_policies: BTreeSet::new(),
            requires_stepup: false,
            stepup_challenge: None,
        }
    }

    #[test]
    fn unknown_capability_denies() {
        let engine = PolicyEngine::new();
        let held = BTreeSet::new();
        let req = CapabilityRequest {
            capability_id: "nope",
            authenticated: true,
            held_policies: &held,
            stepup: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (decision, explanation) = engine.evaluate(&req, CognitiveMode::Active);
        assert_eq!(decision, PolicyDecision::deny("Unknown capability"));
        assert_eq!(explanation.failed_rule.as_deref(), Some("unknown_capability"));
    }

    #[test]
    fn s6_locked_mode_denies_regardless_of_auth() {
        let mut engine = PolicyEngine::new();
        engine.register_capability(cap("system.configure"));
        let held = BTreeSet::new();
        let req = CapabilityRequest {
            capability_id: "system.configure",
            authenticated: true,
            held_policies: &held,
            stepup: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (decision, _) = engine.evaluate(&req, CognitiveMode::Locked);
        assert_eq!(decision, PolicyDecision::deny("System is locked"));
    }

    #[test]
    fn evaluate_is_deterministic_for_fixed_inputs() {
        let mut engine = PolicyEngine::new();
        engine.register_capability(cap("basic.read"));
        let held = BTreeSet::new();
        let req = CapabilityRequest {
            capability_id: "basic.read",
            authenticated: true,
            held_policies: &held,
            stepup: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (d1, e1) = engine.evaluate(&req, CognitiveMode::Active);
        let (d2, e2) = engine.evaluate(&req, CognitiveMode::Active);
        assert_eq!(d1, d2);
        assert_eq!(e1.reason_chain, e2.reason_chain);
    }

    #[test]
    fn requires_stepup_when_no_active_grant() {
        let mut engine = PolicyEngine::new();
        engine.register_capability(CapabilityDefinition {
            id: "admin.delete".to_string(),
            required_policies: BTreeSet::new(),
            requires_stepup: true,
            stepup_challenge: None,
        });
        let held = BTreeSet::new();
        let req = CapabilityRequest {
            capability_id: "admin.delete",
            authenticated: true,
            held_policies: &held,
            stepup: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (decision, _) = engine.evaluate(&req, CognitiveMode::Active);
        assert!(matches!(decision, PolicyDecision::RequireStepup { .. }));

        let req_with_grant = CapabilityRequest {
            stepup: Some(StepupGrant { expires_at: 1000 }),
            ..req
        };
        let (decision, _) = engine.evaluate(&req_with_grant, CognitiveMode::Active);
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn unregistered_space_default_allows_authenticated_caller() {
        let engine = PolicyEngine::new();
        let held = BTreeSet::new();
        let req = SpaceAccessRequest {
            space_id: "space-9",
            action: SpaceAction::OpenWindow,
            authenticated: true,
            role: Some(Role::User),
            held_policies: &held,
            window_id: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (decision, _) = engine.evaluate_space_access(&req);
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn space_role_requirement_denies_insufficient_role() {
        let mut engine = PolicyEngine::new();
        engine.register_space(SpacePolicy {
            space_id: "admin-space".to_string(),
            permissions: SpacePermissions::all(),
            required_role: Some(Role::Admin),
            required_policies: BTreeSet::new(),
        });
        let held = BTreeSet::new();
        let req = SpaceAccessRequest {
            space_id: "admin-space",
            action: SpaceAction::Access,
            authenticated: true,
            role: Some(Role::User),
            held_policies: &held,
            window_id: None,
            correlation_id: "c1".into(),
            now: 0,
        };
        let (decision, _) = engine.evaluate_space_access(&req);
        assert_eq!(decision, PolicyDecision::deny("Insufficient role"));
    }

    #[test]
    fn window_visibility_requires_matching_space_and_access() {
        let engine = PolicyEngine::new();
        assert!(engine.is_window_visible_in_space("a", "a", true));
        assert!(!engine.is_window_visible_in_space("a", "b", true));
        assert!(!engine.is_window_visible_in_space("a", "a", false));
    }
}
