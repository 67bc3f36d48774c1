//! Audit events and the sink they are handed to.
//!
//! Components emit an [`AuditEvent`] at fixed points: every failed connect
//! attempt, every failed send, every established session and every range
//! mutation. The event is handed to an injected [`AuditSink`] and never
//! retained by the emitter. Persisting or signing the records is the sink's
//! business.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Actor recorded for events raised by the system itself.
pub const SYSTEM_ACTOR: &str = "SYSTEM";

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    /// A candidate address refused or timed out during connect.
    ConnectFailure,
    /// A request could not be written or its reply not read.
    SendFailure,
    /// A session completed its transport handshake with a candidate.
    SessionEstablished,
    /// A range pointer was advanced in the repository.
    RangeExtended,
    /// A range extension gave up after its retry budget.
    RangeExtensionFailed,
}

impl AuditEventKind {
    /// Stable name used in rendered records.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventKind::ConnectFailure => "connect-failure",
            AuditEventKind::SendFailure => "send-failure",
            AuditEventKind::SessionEstablished => "session-established",
            AuditEventKind::RangeExtended => "range-extended",
            AuditEventKind::RangeExtensionFailed => "range-extension-failed",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event kind.
    pub kind: AuditEventKind,
    /// Address of the emitting instance.
    pub local_address: String,
    /// Remote host (peer candidate, or repository location for range events).
    pub peer_address: Option<String>,
    /// Remote port, when there is one.
    pub peer_port: Option<u16>,
    /// Who caused the event.
    pub actor: String,
    /// Free-form detail, e.g. `connect:connection refused`.
    pub detail: String,
    /// Wall-clock time the event was created.
    pub timestamp: SystemTime,
}

impl AuditEvent {
    /// Create an event attributed to [`SYSTEM_ACTOR`], stamped now.
    pub fn system(
        kind: AuditEventKind,
        local_address: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            local_address: local_address.into(),
            peer_address: None,
            peer_port: None,
            actor: SYSTEM_ACTOR.to_string(),
            detail: detail.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// Attach the remote endpoint.
    pub fn with_peer(mut self, host: impl Into<String>, port: Option<u16>) -> Self {
        self.peer_address = Some(host.into());
        self.peer_port = port;
        self
    }
}

/// Receiver of audit events.
///
/// Passed into every component at construction; there is no global audit
/// logger. Implementations must not block for long, emitters call them on
/// the request path.
pub trait AuditSink: Send + Sync {
    /// Accept one event.
    fn emit(&self, event: AuditEvent);
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn emit(&self, event: AuditEvent) {
        (**self).emit(event)
    }
}

/// Sink that renders events as `tracing` records under the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            kind = %event.kind,
            local = %event.local_address,
            peer = ?event.peer_address,
            port = ?event.peer_port,
            actor = %event.actor,
            detail = %event.detail,
            "audit event"
        );
    }
}

/// Sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardAuditSink;

impl AuditSink for DiscardAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_are_kebab_case() {
        assert_eq!(AuditEventKind::ConnectFailure.to_string(), "connect-failure");
        let json = serde_json::to_string(&AuditEventKind::RangeExtensionFailed).expect("json");
        assert_eq!(json, "\"range-extension-failed\"");
    }

    #[test]
    fn test_system_event_with_peer() {
        let event = AuditEvent::system(AuditEventKind::SendFailure, "10.0.0.5", "send:reset")
            .with_peer("kra.example.com", Some(8443));
        assert_eq!(event.actor, SYSTEM_ACTOR);
        assert_eq!(event.peer_address.as_deref(), Some("kra.example.com"));
        assert_eq!(event.peer_port, Some(8443));
    }
}
