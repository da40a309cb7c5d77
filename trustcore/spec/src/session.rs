//! Multi-tenant session context data model (§3 `SessionContext`, §4.7).

use serde::{Deserialize, Serialize};

use crate::Timestamp;

/// Role hierarchy position. Ordering is `viewer < user < admin < owner`;
/// the derived [`Ord`] impl follows declaration order below.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only access.
    Viewer,
    /// Standard authenticated user.
    User,
    /// Tenant administrator.
    Admin,
    /// Tenant owner; only role that may issue a governance override.
    Owner,
}

impl Role {
    /// The full hierarchy, lowest to highest.
    pub const HIERARCHY: &'static [Role] = &[Role::Viewer, Role::User, Role::Admin, Role::Owner];

    /// Whether this role satisfies at least `required`.
    pub fn satisfies(&self, required: Role) -> bool {
        *self >= required
    }
}

/// How the session's identity was established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuthMode {
    /// Backed by a real platform identity provider.
    Real,
    /// Developer/local bypass identity.
    Dev,
}

/// Resolved authority binding every gated operation to a tenant, user,
/// session, and role (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionContext {
    /// Tenant the session belongs to (`"default"` in single-tenant mode).
    pub tenant_id: String,
    /// Resolved user id.
    pub user_id: String,
    /// Session id.
    pub session_id: String,
    /// Role granted to this user within this tenant.
    pub role: Role,
    /// When the session was issued, epoch milliseconds.
    pub issued_at: Timestamp,
    /// How identity was established.
    pub auth_mode: AuthMode,
    /// Originating device, if known.
    pub device_id: Option<String>,
}

/// A tenant membership record: does `(tenant_id, user_id)` have an active
/// role binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Membership {
    /// Tenant id.
    pub tenant_id: String,
    /// User id.
    pub user_id: String,
    /// Granted role.
    pub role: Role,
    /// Whether the membership is currently active.
    pub active: bool,
}

/// A durable session record backing [`SessionContext`] resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session id.
    pub session_id: String,
    /// Tenant id.
    pub tenant_id: String,
    /// User id.
    pub user_id: String,
    /// Device id, if known.
    pub device_id: Option<String>,
    /// When the session was created, epoch milliseconds.
    pub issued_at: Timestamp,
    /// Last time this session was used, epoch milliseconds.
    pub last_seen_at: Timestamp,
    /// Whether the session has been explicitly revoked.
    pub revoked: bool,
}

/// Inactivity window after which a session is treated as invalid (24h).
pub const SESSION_INACTIVITY_TIMEOUT_MS: u64 = 24 * 60 * 60 * 1000;

/// Closed set of guard failure codes (§6, §4.7).
#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum GuardError {
    /// Required tenancy headers were absent.
    #[error("TENANT_HEADERS_MISSING")]
    HeadersMissing,
    /// No platform identity was present on the request.
    #[error("AUTH_REQUIRED")]
    AuthRequired,
    /// No active membership exists for `(tenant, user)`.
    #[error("TENANT_MEMBER_REQUIRED")]
    MemberRequired,
    /// Session does not exist or has expired from inactivity.
    #[error("TENANT_SESSION_INVALID")]
    SessionInvalid,
    /// Session was explicitly revoked.
    #[error("TENANT_SESSION_REVOKED")]
    SessionRevoked,
    /// Caller's role does not meet the minimum required role.
    #[error("INSUFFICIENT_ROLE")]
    InsufficientRole,
}

impl GuardError {
    /// HTTP status code this error maps to (§4.7).
    pub fn status_code(&self) -> u16 {
        match self {
            GuardError::InsufficientRole => 403,
            GuardError::MemberRequired => 403,
            _ => 401,
        }
    }

    /// The closed wire error code string (§6).
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::HeadersMissing => "TENANT_HEADERS_MISSING",
            GuardError::AuthRequired => "AUTH_REQUIRED",
            GuardError::MemberRequired => "TENANT_MEMBER_REQUIRED",
            GuardError::SessionInvalid => "TENANT_SESSION_INVALID",
            GuardError::SessionRevoked => "TENANT_SESSION_REVOKED",
            GuardError::InsufficientRole => "INSUFFICIENT_ROLE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy_orders_correctly() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::User);
        assert!(Role::User > Role::Viewer);
        assert!(Role::Admin.satisfies(Role::User));
        assert!(!Role::Viewer.satisfies(Role::Admin));
    }

    #[test]
    fn error_codes_match_wire_contract() {
        assert_eq!(GuardError::HeadersMissing.code(), "TENANT_HEADERS_MISSING");
        assert_eq!(GuardError::HeadersMissing.status_code(), 401);
        assert_eq!(GuardError::MemberRequired.status_code(), 403);
        assert_eq!(GuardError::InsufficientRole.status_code(), 403);
    }
}
