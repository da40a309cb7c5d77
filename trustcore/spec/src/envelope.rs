//! Audit actor/severity types and the envelope factory (§4.1).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::taxonomy::AuditEvent;
use crate::Timestamp;

/// Fixed schema version stamped on every envelope produced by this build.
pub const AUDIT_VERSION: u16 = 1;

/// Who or what originated an audited action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human, session-authenticated user.
    User,
    /// A background worker process.
    Worker,
    /// The platform itself (no human or worker in the loop).
    System,
    /// An autonomous model/agent actor.
    Brain,
}

/// The actor that originated an audited action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditActor {
    /// Actor kind.
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// Actor identifier (opaque to this layer).
    pub id: String,
}

/// Severity of an audited event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditSeverity {
    /// Informational, no action required.
    Info,
    /// Worth noting, no immediate action required.
    Warn,
    /// An operation failed.
    Error,
    /// A condition requiring immediate attention (drives governance escalation).
    Critical,
}

/// Opaque, free-form context attached to an envelope. Values are JSON scalars
/// or nested JSON; this layer never interprets them beyond redaction (§4.2).
pub type EnvelopeContext = BTreeMap<String, serde_json::Value>;

/// The canonical record shape every subsystem emits before it is appended to
/// the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEventEnvelope {
    /// Schema version (`AUDIT_VERSION` at construction time).
    pub version: u16,
    /// Taxonomy-registered dotted-path event value.
    pub event: String,
    /// Required non-empty trace correlation id.
    pub trace_id: String,
    /// Unix epoch milliseconds.
    pub timestamp: Timestamp,
    /// Severity of the event.
    pub severity: AuditSeverity,
    /// Originating actor, if known.
    pub actor: Option<AuditActor>,
    /// Opaque context map, subject to redaction.
    pub context: Option<EnvelopeContext>,
}

/// Errors constructing an [`AuditEventEnvelope`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `traceId` was empty.
    #[error("traceId must be non-empty")]
    MissingTrace,
    /// `event` value is not a member of the taxonomy.
    #[error("event {0:?} is not a registered taxonomy value")]
    UnknownEvent(String),
}

/// Inputs to the envelope factory. `timestamp` defaults to wall-clock `now`
/// when absent.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeInput {
    /// Correlation id, required non-empty.
    pub trace_id: String,
    /// Event severity.
    pub severity: Option<AuditSeverity>,
    /// Originating actor.
    pub actor: Option<AuditActor>,
    /// Opaque context map.
    pub context: Option<EnvelopeContext>,
    /// Explicit timestamp override (tests / replay); `None` means "now".
    pub timestamp: Option<Timestamp>,
}

/// Construct an [`AuditEventEnvelope`] from a taxonomy event and input
/// fields. Pure: the only "side effect" is reading the wall clock when
/// `input.timestamp` is absent.
///
/// Fails with [`EnvelopeError::MissingTrace`] when `trace_id` is empty, and
/// with [`EnvelopeError::UnknownEvent`] when `event` is not a taxonomy
/// member (the type system already prevents this for `AuditEvent` values,
/// so this path exists for string-origin input at the UX boundary).
pub fn create_envelope(
    event: AuditEvent,
    input: EnvelopeInput,
) -> Result<AuditEventEnvelope, EnvelopeError> {
    if input.trace_id.is_empty() {
        return Err(EnvelopeError::MissingTrace);
    }
    Ok(AuditEventEnvelope {
        version: AUDIT_VERSION,
        event: event.as_str().to_string(),
        trace_id: input.trace_id,
        timestamp: input.timestamp.unwrap_or_else(now_millis),
        severity: input.severity.unwrap_or(AuditSeverity::Info),
        actor: input.actor,
        context: input.context,
    })
}

/// Construct an envelope from a raw dotted-path string, validating taxonomy
/// membership. This is the boundary function UX-origin call sites go
/// through; internal call sites should prefer [`create_envelope`] with a
/// typed [`AuditEvent`] so unknown values are rejected at compile time.
pub fn create_envelope_from_str(
    event: &str,
    input: EnvelopeInput,
) -> Result<AuditEventEnvelope, EnvelopeError> {
    let known = AuditEvent::from_str_strict(event)
        .ok_or_else(|| EnvelopeError::UnknownEvent(event.to_string()))?;
    create_envelope(known, input)
}

fn now_millis() -> Timestamp {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(trace_id: &str) -> EnvelopeInput {
        EnvelopeInput {
            trace_id: trace_id.into(),
            timestamp: Some(1_700_000_000_000),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_trace_id() {
        let err = create_envelope(AuditEvent::SystemStartup, input("")).unwrap_err();
        assert_eq!(err, EnvelopeError::MissingTrace);
    }

    #[test]
    fn builds_envelope_with_defaults() {
        let env = create_envelope(AuditEvent::SystemStartup, input("t1")).unwrap();
        assert_eq!(env.version, AUDIT_VERSION);
        assert_eq!(env.event, "system.startup");
        assert_eq!(env.severity, AuditSeverity::Info);
        assert_eq!(env.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn string_boundary_rejects_unknown_event() {
        let err = create_envelope_from_str("not.a.real.event", input("t1")).unwrap_err();
        assert!(matches!(err, EnvelopeError::UnknownEvent(_)));
    }

    #[test]
    fn string_boundary_accepts_known_event() {
        let env = create_envelope_from_str("auth.login", input("t2")).unwrap();
        assert_eq!(env.event, "auth.login");
    }
}
