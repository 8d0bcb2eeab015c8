//! Handler extraction: turns descriptor table entries into classified handlers.
//!
//! Work is driven by an explicit stack seeded with every distinct descriptor
//! in table order. Self-expanding handlers push the descriptors they yield on
//! top of it, so expansions are handled depth-first and bounded by
//! `max_expansions` instead of recursing.
//!
//! Descriptors listed only under the `schema` target carry schema payloads
//! and never produce handlers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use deliverykit_schema::SchemaClassifier;
use deliverykit_shared::{
    DeliveryError, Descriptor, NATIVE_RESOURCE_TYPE, ProfileSet, Result, SCHEMA_TARGET,
};

use crate::classified::ClassifiedHandlers;
use crate::diagnostics::Diagnostics;
use crate::handler::{FactoryError, FactoryRegistry, Handler, HandlerFactory};
use crate::table::{DescriptorTable, TableBuilder};

/// Default cap on descriptors processed through self-expansion in one build.
pub const DEFAULT_MAX_EXPANSIONS: usize = 10_000;

/// Result of one extraction run.
#[derive(Debug, Default)]
pub struct Extraction {
    pub handlers: ClassifiedHandlers,
    /// Every handler created, in creation order, classified or not.
    pub created: Vec<Handler>,
    pub diagnostics: Diagnostics,
}

struct WorkItem {
    descriptor: Arc<Descriptor>,
    targets: Vec<String>,
    expanded: bool,
}

/// Creates handlers for the descriptors of one profile set.
pub struct HandlerExtractor<'a> {
    registry: &'a FactoryRegistry,
    profiles: &'a ProfileSet,
    schema: Option<&'a dyn SchemaClassifier>,
    max_expansions: usize,
}

impl<'a> HandlerExtractor<'a> {
    pub fn new(registry: &'a FactoryRegistry, profiles: &'a ProfileSet) -> Self {
        Self {
            registry,
            profiles,
            schema: None,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }

    /// Schema used to resolve macro selectors on expanded descriptors.
    pub fn with_schema(mut self, schema: Option<&'a dyn SchemaClassifier>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_max_expansions(mut self, max: usize) -> Self {
        self.max_expansions = max;
        self
    }

    /// Create and classify a handler for every descriptor in `table`.
    ///
    /// Expanded descriptors that yield no handler are added to `table` as
    /// plain entries under their targets.
    #[instrument(skip_all, fields(profile = %self.profiles.base, targets = table.len()))]
    pub fn extract(&self, table: &mut DescriptorTable) -> Result<Extraction> {
        let mut out = Extraction::default();
        let mut expansions = 0usize;

        let mut stack: Vec<WorkItem> = table
            .bindings()
            .into_iter()
            .filter(|(_, targets)| targets.iter().any(|t| t != SCHEMA_TARGET))
            .rev()
            .map(|(descriptor, targets)| WorkItem {
                descriptor,
                targets,
                expanded: false,
            })
            .collect();

        while let Some(item) = stack.pop() {
            let handler = self.create(&item.descriptor, &mut out.diagnostics)?;

            let Some(handler) = handler else {
                if item.expanded {
                    for target in &item.targets {
                        table.insert(target, item.descriptor.clone());
                    }
                    trace!(descriptor = %item.descriptor, "expanded descriptor kept as table entry");
                }
                continue;
            };

            trace!(handler = handler.name(), descriptor = %item.descriptor, "handler created");
            out.created.push(handler.clone());
            out.handlers
                .add(handler.clone(), item.descriptor.clone(), &item.targets);

            let capabilities = handler.capabilities();
            if capabilities.is_self_expanding() {
                let yielded = handler.expand();
                expansions += yielded.len();
                if expansions > self.max_expansions {
                    return Err(DeliveryError::config(format!(
                        "resource expansion exceeded {} descriptors (last expanded by {})",
                        self.max_expansions, item.descriptor
                    )));
                }

                let resolver = TableBuilder::new(self.profiles).with_schema(self.schema);
                let mut pending = Vec::with_capacity(yielded.len());
                for descriptor in yielded {
                    pending.push(WorkItem {
                        targets: resolver.targets_for(&descriptor)?,
                        descriptor: Arc::new(descriptor),
                        expanded: true,
                    });
                }
                debug!(handler = handler.name(), yielded = pending.len(), "handler expanded");
                stack.extend(pending.into_iter().rev());
            }

            if capabilities.is_self_registering() {
                let before = out.handlers.len();
                handler.register(&mut out.handlers);
                debug!(
                    handler = handler.name(),
                    added = out.handlers.len().saturating_sub(before),
                    "handler registered further handlers"
                );
            }
        }

        debug!(
            created = out.created.len(),
            classified = out.handlers.len(),
            events = out.diagnostics.len(),
            "handler extraction finished"
        );
        Ok(out)
    }

    /// Create the handler for one descriptor, or `None` when it is skipped.
    fn create(&self, descriptor: &Descriptor, diagnostics: &mut Diagnostics) -> Result<Option<Handler>> {
        let native = descriptor.is_native_reference();
        if native {
            let factory = self.registry.factory_for(NATIVE_RESOURCE_TYPE).ok_or_else(|| {
                DeliveryError::config(format!(
                    "resource [{descriptor}] names a native handler but no native factory is registered"
                ))
            })?;
            if let Some(handler) = self.run(factory.as_ref(), descriptor, diagnostics)? {
                return Ok(Some(handler));
            }
        }

        let Some(resource_type) = descriptor.resource_type() else {
            if descriptor.resource.is_some() && !native {
                diagnostics.record(descriptor, "resource type could not be determined");
            }
            return Ok(None);
        };
        if native && resource_type.eq_ignore_ascii_case(NATIVE_RESOURCE_TYPE) {
            return Ok(None);
        }

        let Some(factory) = self.registry.factory_for(&resource_type) else {
            diagnostics.record(
                descriptor,
                format!("no handler factory registered for resource type '{resource_type}'"),
            );
            return Ok(None);
        };
        self.run(factory.as_ref(), descriptor, diagnostics)
    }

    fn run(
        &self,
        factory: &dyn HandlerFactory,
        descriptor: &Descriptor,
        diagnostics: &mut Diagnostics,
    ) -> Result<Option<Handler>> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| factory.create(descriptor)));

        match outcome {
            Ok(Ok(handler)) => Ok(Some(handler)),
            Ok(Err(FactoryError::Configuration(message))) => {
                Err(DeliveryError::factory(descriptor.to_string(), message))
            }
            Ok(Err(FactoryError::Creation(cause))) => {
                diagnostics.record_failure(
                    descriptor,
                    format!("'{}' factory could not create a handler", factory.name()),
                    cause,
                );
                Ok(None)
            }
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                warn!(factory = factory.name(), %descriptor, %cause, "handler factory panicked");
                diagnostics.record_failure(
                    descriptor,
                    format!("'{}' factory panicked", factory.name()),
                    cause,
                );
                Ok(None)
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
