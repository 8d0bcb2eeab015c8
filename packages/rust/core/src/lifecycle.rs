//! Build lifecycle notifications.
//!
//! Listeners are registered on the [`ListenerRegistry`] before any pipeline is
//! built and are only read while building. Handlers created during a build
//! may listen too (see [`ContentHandler::as_listener`]).
//!
//! [`ContentHandler::as_listener`]: crate::handler::ContentHandler::as_listener

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use deliverykit_shared::{ProfileSet, Result};

use crate::handler::Handler;

/// Stage reached by a pipeline build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Every descriptor has been turned into handlers (or skipped).
    HandlersCreated,
    /// The pipeline is assembled and about to be published.
    PipelineCreated,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandlersCreated => f.write_str("handlers-created"),
            Self::PipelineCreated => f.write_str("pipeline-created"),
        }
    }
}

/// Receives lifecycle events. An error aborts the build being notified.
pub trait LifecycleListener: Send + Sync {
    fn handle(&self, event: LifecycleEvent, profile: &ProfileSet) -> Result<()>;
}

/// Listeners notified on every build, in registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn LifecycleListener>) {
        self.listeners.write().push(listener);
    }

    /// Drop every listener. Intended for shutdown and test teardown.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Notify registered listeners, then every created handler that listens.
    pub(crate) fn fire(
        &self,
        event: LifecycleEvent,
        profile: &ProfileSet,
        created: &[Handler],
    ) -> Result<()> {
        let listeners = self.listeners.read().clone();
        trace!(%event, listeners = listeners.len(), "firing lifecycle event");

        for listener in &listeners {
            listener.handle(event, profile)?;
        }
        for handler in created {
            if let Some(listener) = handler.as_listener() {
                listener.handle(event, profile)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::handler::{Capabilities, ContentHandler};
    use deliverykit_shared::DeliveryError;

    struct Recorder {
        tag: &'static str,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl LifecycleListener for Recorder {
        fn handle(&self, event: LifecycleEvent, _profile: &ProfileSet) -> Result<()> {
            self.seen.lock().push(format!("{}:{event}", self.tag));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct ListeningHandler {
        caps: Capabilities,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ContentHandler for ListeningHandler {
        fn name(&self) -> &str {
            "listening"
        }
        fn capabilities(&self) -> &Capabilities {
            &self.caps
        }
        fn as_listener(&self) -> Option<&dyn LifecycleListener> {
            Some(self)
        }
    }

    impl LifecycleListener for ListeningHandler {
        fn handle(&self, event: LifecycleEvent, _profile: &ProfileSet) -> Result<()> {
            self.seen.lock().push(format!("handler:{event}"));
            Ok(())
        }
    }

    struct Failing;

    impl LifecycleListener for Failing {
        fn handle(&self, _event: LifecycleEvent, _profile: &ProfileSet) -> Result<()> {
            Err(DeliveryError::Listener("listener exploded".into()))
        }
    }

    #[test]
    fn notifies_registered_then_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = ListenerRegistry::new();
        registry.register(Arc::new(Recorder { tag: "a", seen: seen.clone() }));
        registry.register(Arc::new(Recorder { tag: "b", seen: seen.clone() }));

        let handler: Handler = Arc::new(ListeningHandler {
            caps: Capabilities::new(),
            seen: seen.clone(),
        });

        registry
            .fire(LifecycleEvent::HandlersCreated, &ProfileSet::new("p"), &[handler])
            .expect("fire");

        assert_eq!(
            *seen.lock(),
            vec![
                "a:handlers-created".to_string(),
                "b:handlers-created".to_string(),
                "handler:handlers-created".to_string(),
            ]
        );
    }

    #[test]
    fn listener_error_propagates() {
        let registry = ListenerRegistry::new();
        registry.register(Arc::new(Failing));

        let err = registry
            .fire(LifecycleEvent::PipelineCreated, &ProfileSet::new("p"), &[])
            .expect_err("must fail");
        assert!(matches!(err, DeliveryError::Listener(_)));

        registry.clear();
        assert!(registry.is_empty());
    }
}
