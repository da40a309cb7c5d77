//! Stateful engines for the governance, audit & trust core: the
//! hash-chained ledger, segment attestor, governance reaction engine,
//! policy engine, alert dispatcher, multi-tenant session guard, and VFS
//! constraint/conflict layer.
#![deny(missing_docs)]

/// Hash-chained append-only audit ledger (§4.2).
pub mod ledger;
/// Segment signing and offline verification (§4.3).
pub mod attestor;
/// Autonomous governance reaction state machine (§4.4).
pub mod governance;
/// Deterministic capability/space authorization engine (§4.5).
pub mod policy;
/// Dedup + escalation alert dispatcher (§4.6).
pub mod alerts;
/// Multi-tenant session resolution and authority binding (§4.7).
pub mod guard;
/// VFS path normalization, uniqueness invariant, and conflict store (§4.8).
pub mod vfs;

/// The error taxonomy shared across the engines (§7). Each engine also
/// exposes narrower, specific error types for its own fallible operations
/// (e.g. [`ledger::AppendError`], [`trustcore_spec::session::GuardError`]); this enum is
/// for call sites that need to reason about the taxonomy uniformly, such
/// as HTTP status mapping in `governd`.
#[derive(Debug, thiserror::Error)]
pub enum CoreErrorKind {
    /// Bad input or a missing required field.
    #[error("validation: {0}")]
    Validation(String),
    /// A referenced tenant, session, capability, or path was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A uniqueness or ordering invariant was violated.
    #[error("conflict: {0}")]
    Conflict(String),
    /// The caller is not authenticated.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The caller is authenticated but lacks sufficient authority.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// A cryptographic or chain-continuity check failed.
    #[error("integrity violation: {0}")]
    Integrity(String),
    /// The current governance mode or feature flag blocks this operation.
    #[error("governance block: {0}")]
    GovernanceBlock(String),
    /// A transient failure in a best-effort side channel (sink delivery,
    /// session touch); callers may ignore or retry, never escalate.
    #[error("transient failure: {0}")]
    Transient(String),
}
