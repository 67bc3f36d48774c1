//! Audit sink that keeps what it is given.

use parking_lot::Mutex;
use rangelink_core::{AuditEvent, AuditEventKind, AuditSink};

/// Records every event in emission order.
#[derive(Debug, Default)]
pub struct CapturingAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl CapturingAuditSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything emitted so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Events of one kind, in emission order.
    pub fn events_of(&self, kind: AuditEventKind) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// Number of events of one kind.
    pub fn count(&self, kind: AuditEventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for CapturingAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_filter() {
        let sink = CapturingAuditSink::new();
        sink.emit(AuditEvent::system(AuditEventKind::ConnectFailure, "ca", "connect:refused"));
        sink.emit(AuditEvent::system(AuditEventKind::SessionEstablished, "ca", "ok"));

        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.count(AuditEventKind::ConnectFailure), 1);
        assert_eq!(
            sink.events_of(AuditEventKind::SessionEstablished)[0].detail,
            "ok"
        );

        sink.clear();
        assert!(sink.events().is_empty());
    }
}
