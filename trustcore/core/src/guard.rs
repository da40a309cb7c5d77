//! Multi-tenant session resolution and authority binding (§4.7).
//!
//! Single-tenant deployments bypass all header/session checks and hand
//! back a synthetic owner context. Multi-tenant deployments resolve a
//! [`SessionContext`] from request headers through an ordered sequence
//! of checks, touching `lastSeenAt` best-effort on success.

use std::collections::HashMap;

use parking_lot::RwLock;
use trustcore_spec::session::{
    AuthMode, GuardError, Membership, Role, SessionContext, SessionRecord,
    SESSION_INACTIVITY_TIMEOUT_MS,
};

/// Whether the guard resolves a single synthetic tenant or enforces
/// full multi-tenant header/session/membership checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardMode {
    /// All requests resolve to `tenantId = "default"`, `role = owner`.
    SingleTenant,
    /// Requests must carry tenancy headers and an active session.
    MultiTenant,
}

/// Request-side inputs the guard resolves against.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    /// `x-tenant-id` header value, if present.
    pub tenant_id: Option<String>,
    /// `x-session-id` header value, if present.
    pub session_id: Option<String>,
    /// Platform-identity user id, if the caller is authenticated.
    pub user_id: Option<String>,
    /// Device id, if known.
    pub device_id: Option<String>,
}

/// Resolves [`SessionContext`]s from request headers against an
/// in-memory membership and session store.
pub struct SessionGuard {
    mode: GuardMode,
    sessions: RwLock<HashMap<String, SessionRecord>>,
    memberships: RwLock<HashMap<(String, String), Membership>>,
}

impl SessionGuard {
    /// A guard in [`GuardMode::SingleTenant`] mode.
    pub fn single_tenant() -> Self {
        Self {
            mode: GuardMode::SingleTenant,
            sessions: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// A guard in [`GuardMode::MultiTenant`] mode with an empty store.
    pub fn multi_tenant() -> Self {
        Self {
            mode: GuardMode::MultiTenant,
            sessions: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// Register an active tenant membership.
    pub fn add_membership(&self, membership: Membership) {
        let key = (membership.tenant_id.clone(), membership.user_id.clone());
        self.memberships.write().insert(key, membership);
    }

    /// Register a session record.
    pub fn add_session(&self, record: SessionRecord) {
        self.sessions.write().insert(record.session_id.clone(), record);
    }

    /// Resolve a [`SessionContext`] from `headers` at time `now`, per
    /// §4.7's ordered checks: headers present → platform identity
    /// present → active membership → session valid and not revoked and
    /// not expired from inactivity.
    pub fn resolve(&self, headers: &RequestHeaders, now: u64) -> Result<SessionContext, GuardError> {
        if self.mode == GuardMode::SingleTenant {
            return Ok(SessionContext {
                tenant_id: "default".to_string(),
                user_id: headers.user_id.clone().unwrap_or_else(|| "local".to_string()),
                session_id: headers.session_id.clone().unwrap_or_else(|| "local".to_string()),
                role: Role::Owner,
                issued_at: now,
                auth_mode: AuthMode::Dev,
                device_id: headers.device_id.clone(),
            });
        }

        let (tenant_id, session_id) = match (&headers.tenant_id, &headers.session_id) {
            (Some(t), Some(s)) => (t.clone(), s.clone()),
            _ => return Err(GuardError::HeadersMissing),
        };

        let user_id = headers.user_id.clone().ok_or(GuardError::AuthRequired)?;

        let membership = {
            let memberships = self.memberships.read();
            memberships
                .get(&(tenant_id.clone(), user_id.clone()))
                .filter(|m| m.active)
                .cloned()
        };
        let membership = membership.ok_or(GuardError::MemberRequired)?;

        let record = {
            let sessions = self.sessions.read();
            sessions.get(&session_id).cloned()
        };
        let record = record.ok_or(GuardError::SessionInvalid)?;

        if record.tenant_id != tenant_id || record.user_id != user_id {
            return Err(GuardError::SessionInvalid);
        }
        if record.revoked {
            return Err(GuardError::SessionRevoked);
        }
        if now.saturating_sub(record.last_seen_at) > SESSION_INACTIVITY_TIMEOUT_MS {
            return Err(GuardError::SessionInvalid);
        }

        self.touch(&session_id, now);

        Ok(SessionContext {
            tenant_id,
            user_id,
            session_id,
            role: membership.role,
            issued_at: record.issued_at,
            auth_mode: AuthMode::Real,
            device_id: record.device_id.clone(),
        })
    }

    /// Assert that `ctx`'s role satisfies at least `required`, per
    /// §4.7's role-hierarchy check.
    pub fn assert_min_role(ctx: &SessionContext, required: Role) -> Result<(), GuardError> {
        if ctx.role.satisfies(required) {
            Ok(())
        } else {
            Err(GuardError::InsufficientRole)
        }
    }

    /// Best-effort `lastSeenAt` touch. Never surfaces a failure to the
    /// caller; a missing session here just means nothing to touch.
    fn touch(&self, session_id: &str, now: u64) {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.last_seen_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn membership(tenant: &str, user: &str, role: Role) -> Membership {
        Membership {
            tenant_id: tenant.to_string(),
            user_id: user.to_string(),
            role,
            active: true,
        }
    }

    fn session(id: &str, tenant: &str, user: &str, last_seen_at: u64) -> SessionRecord {
        SessionRecord {
            session_id: id.to_string(),
            tenant_id: tenant.to_string(),
            user_id: user.to_string(),
            device_id: None,
            issued_at: 0,
            last_seen_at,
            revoked: false,
        }
    }

    #[test]
    fn single_tenant_mode_synthesizes_owner_context() {
        let guard = SessionGuard::single_tenant();
        let ctx = guard.resolve(&RequestHeaders::default(), 0).unwrap();
        assert_eq!(ctx.tenant_id, "default");
        assert_eq!(ctx.role, Role::Owner);
    }

    #[test]
    fn missing_headers_fail_first() {
        let guard = SessionGuard::multi_tenant();
        let err = guard.resolve(&RequestHeaders::default(), 0).unwrap_err();
        assert_eq!(err, GuardError::HeadersMissing);
    }

    #[test]
    fn missing_identity_after_headers_fails_auth_required() {
        let guard = SessionGuard::multi_tenant();
        let headers = RequestHeaders {
            tenant_id: Some("t1".into()),
            session_id: Some("s1".into()),
            user_id: None,
            device_id: None,
        };
        let err = guard.resolve(&headers, 0).unwrap_err();
        assert_eq!(err, GuardError::AuthRequired);
    }

    #[test]
    fn missing_membership_fails_member_required() {
        let guard = SessionGuard::multi_tenant();
        let headers = RequestHeaders {
            tenant_id: Some("t1".into()),
            session_id: Some("s1".into()),
            user_id: Some("u1".into()),
            device_id: None,
        };
        let err = guard.resolve(&headers, 0).unwrap_err();
        assert_eq!(err, GuardError::MemberRequired);
    }

    #[test]
    fn valid_session_resolves_and_touches_last_seen() {
        let guard = SessionGuard::multi_tenant();
        guard.add_membership(membership("t1", "u1", Role::Admin));
        guard.add_session(session("s1", "t1", "u1", 0));
        let headers = RequestHeaders {
            tenant_id: Some("t1".into()),
            session_id: Some("s1".into()),
            user_id: Some("u1".into()),
            device_id: None,
        };
        let ctx = guard.resolve(&headers, 1_000).unwrap();
        assert_eq!(ctx.role, Role::Admin);
        assert_eq!(guard.sessions.read().get("s1").unwrap().last_seen_at, 1_000);
    }

    #[test]
    fn revoked_session_fails_session_revoked() {
        let guard = SessionGuard::multi_tenant();
        guard.add_membership(membership("t1", "u1", Role::User));
        let mut rec = session("s1", "t1", "u1", 0);
        rec.revoked = true;
        guard.add_session(rec);
        let headers = RequestHeaders {
            tenant_id: Some("t1".into()),
            session_id: Some("s1".into()),
            user_id: Some("u1".into()),
            device_id: None,
        };
        let err = guard.resolve(&headers, 0).unwrap_err();
        assert_eq!(err, GuardError::SessionRevoked);
    }

    #[test]
    fn inactive_session_past_24h_is_invalid() {
        let guard = SessionGuard::multi_tenant();
        guard.add_membership(membership("t1", "u1", Role::User));
        guard.add_session(session("s1", "t1", "u1", 0));
        let headers = RequestHeaders {
            tenant_id: Some("t1".into()),
            session_id: Some("s1".into()),
            user_id: Some("u1".into()),
            device_id: None,
        };
        let err = guard
            .resolve(&headers, SESSION_INACTIVITY_TIMEOUT_MS + 1)
            .unwrap_err();
        assert_eq!(err, GuardError::SessionInvalid);
    }

    #[test]
    fn assert_min_role_enforces_hierarchy() {
        let ctx = SessionContext {
            tenant_id: "t1".into(),
            user_id: "u1".into(),
            session_id: "s1".into(),
            role: Role::User,
            issued_at: 0,
            auth_mode: AuthMode::Real,
            device_id: None,
        };
        assert!(SessionGuard::assert_min_role(&ctx, Role::Viewer).is_ok());
        assert_eq!(
            SessionGuard::assert_min_role(&ctx, Role::Admin).unwrap_err(),
            GuardError::InsufficientRole
        );
    }
}
