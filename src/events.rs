//! Event propagation (spec.md §7: "All errors are surfaced as events on
//! SB's event bus with per-component base event ids").
//!
//! The real SB event bus is out of scope (spec.md §1), so this models the
//! observable signal as an `SbnEvent` funneled through an `EventSink`
//! trait. The default sink logs at the matching level via the `log`
//! facade, which is how a caller without a real event bus still sees
//! every condition §7 requires to be surfaced.

use log::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// One reportable condition, tagged with the emitting component's
/// `base_event_id` (spec.md §3: protocol/filter modules "hold base event
/// id") plus an offset identifying which condition within that component.
#[derive(Debug, Clone)]
pub struct SbnEvent {
    pub component: &'static str,
    pub base_event_id: u32,
    pub offset: u32,
    pub severity: Severity,
    pub message: String,
}

impl SbnEvent {
    pub fn new(component: &'static str, base_event_id: u32, offset: u32, severity: Severity, message: impl Into<String>) -> SbnEvent {
        SbnEvent {
            component,
            base_event_id,
            offset,
            severity,
            message: message.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.base_event_id + self.offset
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SbnEvent);
}

/// Default sink: routes each event to the matching `log` macro, prefixed
/// with its component and numeric event id so log consumers can filter or
/// correlate against the same ids a real SB event bus would have used.
#[derive(Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: SbnEvent) {
        let id = event.id();
        match event.severity {
            Severity::Debug => debug!("[{}:{id}] {}", event.component, event.message),
            Severity::Info => info!("[{}:{id}] {}", event.component, event.message),
            Severity::Warning => warn!("[{}:{id}] {}", event.component, event.message),
            Severity::Error => error!("[{}:{id}] {}", event.component, event.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<SbnEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: SbnEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[test]
    fn event_id_combines_base_and_offset() {
        let event = SbnEvent::new("udp", 100, 3, Severity::Warning, "peer timed out");
        assert_eq!(event.id(), 103);
    }

    #[test]
    fn recording_sink_observes_emitted_events() {
        let sink = Arc::new(RecordingSink::default());
        sink.emit(SbnEvent::new("core", 0, 1, Severity::Error, "config error"));
        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }
}
