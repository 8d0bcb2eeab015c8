//! Build-time diagnostic events.
//!
//! Events are informational: decisions taken and resources skipped while a
//! pipeline was built. They never affect the outcome of a build; they are kept
//! on the finished pipeline for later inspection and mirrored to `tracing`.

use std::fmt::Write as _;

use serde::Serialize;
use tracing::debug;

use deliverykit_shared::Descriptor;

use crate::classified::ClassifiedHandlers;
use crate::strategy::Strategy;

/// One recorded build event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticEvent {
    /// Descriptor the event is about, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<Descriptor>,
    pub message: String,
    /// Underlying failure, when the event records one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

/// Append-only event log for one build.
#[derive(Debug, Default)]
pub struct Diagnostics {
    events: Vec<DiagnosticEvent>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a build-wide note.
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(%message, "build event");
        self.events.push(DiagnosticEvent {
            descriptor: None,
            message,
            cause: None,
        });
    }

    /// Record an event about one descriptor.
    pub fn record(&mut self, descriptor: &Descriptor, message: impl Into<String>) {
        let message = message.into();
        debug!(%descriptor, %message, "build event");
        self.events.push(DiagnosticEvent {
            descriptor: Some(descriptor.clone()),
            message,
            cause: None,
        });
    }

    /// Record a failure about one descriptor, with its cause.
    pub fn record_failure(
        &mut self,
        descriptor: &Descriptor,
        message: impl Into<String>,
        cause: impl Into<String>,
    ) {
        let message = message.into();
        let cause = cause.into();
        debug!(%descriptor, %message, %cause, "build event");
        self.events.push(DiagnosticEvent {
            descriptor: Some(descriptor.clone()),
            message,
            cause: Some(cause),
        });
    }

    pub fn events(&self) -> &[DiagnosticEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<DiagnosticEvent> {
        self.events
    }
}

/// Table of which strategies each classified handler supports.
///
/// ```text
///     tree  stream  handler
///     ------------------------------------------------------------
///      x      x     para (selector=p type=handler)
///      x            toc (selector=body resource=acme::Toc)
/// ```
pub fn characteristics_report(handlers: &ClassifiedHandlers) -> String {
    let mut report = String::new();
    let _ = writeln!(report, "    tree  stream  handler  ('x' = supported)");
    let _ = writeln!(report, "    {}", "-".repeat(60));

    for entry in handlers.entries() {
        let caps = entry.handler.capabilities();
        let mark = |strategy: Strategy| if caps.supports(strategy) { "x" } else { " " };
        let _ = writeln!(
            report,
            "     {}      {}     {} ({})",
            mark(Strategy::Tree),
            mark(Strategy::Stream),
            entry.handler.name(),
            entry.descriptor
        );
    }

    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::handler::{Capabilities, ContentHandler, Role};

    #[derive(Debug)]
    struct Named(&'static str, Capabilities);

    impl ContentHandler for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn capabilities(&self) -> &Capabilities {
            &self.1
        }
    }

    #[test]
    fn records_in_order_with_causes() {
        let mut diagnostics = Diagnostics::new();
        let descriptor = Descriptor::new("p").with_type("xsl");

        diagnostics.note("starting");
        diagnostics.record(&descriptor, "no factory");
        diagnostics.record_failure(&descriptor, "creation failed", "boom");

        let events = diagnostics.into_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].descriptor, None);
        assert_eq!(events[1].descriptor.as_ref(), Some(&descriptor));
        assert_eq!(events[2].cause.as_deref(), Some("boom"));
    }

    #[test]
    fn report_lists_each_handler_once() {
        let mut handlers = ClassifiedHandlers::new();
        handlers.add(
            Arc::new(Named(
                "tree-only",
                Capabilities::new()
                    .with_strategy(Strategy::Tree)
                    .with_role(Role::Serialize),
            )),
            Arc::new(Descriptor::new("p")),
            &["p".to_string(), "br".to_string()],
        );

        let report = characteristics_report(&handlers);
        assert_eq!(report.matches("tree-only").count(), 1);
        assert!(report.contains("     x            tree-only (selector=p)"));
    }

    #[test]
    fn events_serialize_without_empty_fields() {
        let event = DiagnosticEvent {
            descriptor: None,
            message: "using stream strategy".into(),
            cause: None,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"message":"using stream strategy"}"#);
    }
}
