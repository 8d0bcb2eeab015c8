//! Pipeline assembly for one profile set.
//!
//! [`PipelineBuilder::build`] runs the full build:
//! 1. Read the profile's descriptors from the resource store
//! 2. Resolve the schema classifier (registered, or from a `schema` descriptor)
//! 3. Build the descriptor table
//! 4. Extract and classify handlers, then fire `HandlersCreated`
//! 5. Merge caller-supplied handlers
//! 6. Resolve the execution strategy
//! 7. Optionally sort handler lists (`handlers.sort`)
//! 8. Assemble the [`Pipeline`] and fire `PipelineCreated`

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use deliverykit_schema::{DtdSchema, SchemaClassifier, SchemaStore};
use deliverykit_shared::{
    DeliveryError, Descriptor, ProfileSet, Result, SCHEMA_TARGET, descriptor_digest,
};
use deliverykit_store::ResourceStore;

use crate::classified::{ClassifiedHandlers, RoleTables};
use crate::diagnostics::{DiagnosticEvent, characteristics_report};
use crate::extract::{DEFAULT_MAX_EXPANSIONS, HandlerExtractor};
use crate::handler::FactoryRegistry;
use crate::lifecycle::{LifecycleEvent, ListenerRegistry};
use crate::strategy::{self, Strategy};
use crate::table::{DescriptorTable, TableBuilder};

/// Global parameter enabling the specificity sort of handler lists.
pub const SORT_HANDLERS_PARAM: &str = "handlers.sort";

/// Descriptor parameter holding an inline schema payload.
pub const INLINE_SCHEMA_PARAM: &str = "inline";

/// Immutable, fully-resolved processing pipeline for one profile set.
pub struct Pipeline {
    id: Uuid,
    profile: ProfileSet,
    built_at: DateTime<Utc>,
    strategy: Strategy,
    handlers: ClassifiedHandlers,
    table: DescriptorTable,
    schema: Option<Arc<dyn SchemaClassifier>>,
    digest: String,
    events: Vec<DiagnosticEvent>,
}

impl Pipeline {
    /// Build id (UUID v7, time-ordered).
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn profile(&self) -> &ProfileSet {
        &self.profile
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Per-role handler tables for the resolved strategy.
    pub fn role_tables(&self) -> &RoleTables {
        self.handlers.tables(self.strategy)
    }

    /// Every handler of the build, classified and unclassified.
    pub fn handlers(&self) -> &ClassifiedHandlers {
        &self.handlers
    }

    pub fn table(&self) -> &DescriptorTable {
        &self.table
    }

    pub fn schema(&self) -> Option<&Arc<dyn SchemaClassifier>> {
        self.schema.as_ref()
    }

    /// SHA-256 of the descriptors the pipeline was built from.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn events(&self) -> &[DiagnosticEvent] {
        &self.events
    }

    /// Serializable snapshot for reporting.
    pub fn summary(&self) -> PipelineSummary {
        let targets = self
            .table
            .iter()
            .map(|(target, list)| TargetSummary {
                target: target.to_string(),
                descriptors: list.iter().map(|d| d.as_ref().clone()).collect(),
            })
            .collect();

        let handlers = self
            .handlers
            .entries()
            .iter()
            .map(|entry| {
                let caps = entry.handler.capabilities();
                HandlerSummary {
                    name: entry.handler.name().to_string(),
                    stream: caps.supports(Strategy::Stream),
                    tree: caps.supports(Strategy::Tree),
                    roles: caps.roles().iter().map(|r| r.to_string()).collect(),
                    targets: entry.targets.clone(),
                }
            })
            .collect();

        PipelineSummary {
            id: self.id,
            profile: self.profile.clone(),
            built_at: self.built_at,
            strategy: self.strategy,
            digest: self.digest.clone(),
            targets,
            handlers,
            unclassified: self.handlers.unclassified().len(),
            events: self.events.clone(),
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("profile", &self.profile)
            .field("strategy", &self.strategy)
            .field("handlers", &self.handlers.len())
            .field("targets", &self.table.len())
            .field("schema", &self.schema.is_some())
            .field("digest", &self.digest)
            .finish()
    }
}

/// Serializable view of a [`Pipeline`].
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub profile: ProfileSet,
    pub built_at: DateTime<Utc>,
    pub strategy: Strategy,
    pub digest: String,
    pub targets: Vec<TargetSummary>,
    pub handlers: Vec<HandlerSummary>,
    pub unclassified: usize,
    pub events: Vec<DiagnosticEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetSummary {
    pub target: String,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HandlerSummary {
    pub name: String,
    pub stream: bool,
    pub tree: bool,
    pub roles: Vec<String>,
    pub targets: Vec<String>,
}

/// Runs one pipeline build against borrowed collaborators.
pub struct PipelineBuilder<'a> {
    store: &'a dyn ResourceStore,
    factories: &'a FactoryRegistry,
    schemas: &'a SchemaStore,
    listeners: &'a ListenerRegistry,
    max_expansions: usize,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(
        store: &'a dyn ResourceStore,
        factories: &'a FactoryRegistry,
        schemas: &'a SchemaStore,
        listeners: &'a ListenerRegistry,
    ) -> Self {
        Self {
            store,
            factories,
            schemas,
            listeners,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
        }
    }

    pub fn with_max_expansions(mut self, max: usize) -> Self {
        self.max_expansions = max;
        self
    }

    /// Build a pipeline for `profiles`, merging `extra` handlers before
    /// strategy resolution.
    #[instrument(skip_all, fields(profile = %profiles))]
    pub fn build(
        &self,
        profiles: &ProfileSet,
        extra: Option<&ClassifiedHandlers>,
    ) -> Result<Pipeline> {
        let descriptors = self.store.descriptors(profiles)?;
        let digest = descriptor_digest(descriptors.iter().map(Arc::as_ref));

        let schema = self.resolve_schema(profiles, &descriptors)?;
        let schema_ref = schema.as_deref();

        let mut table = TableBuilder::new(profiles)
            .with_schema(schema_ref)
            .build(&descriptors)?;

        let extraction = HandlerExtractor::new(self.factories, profiles)
            .with_schema(schema_ref)
            .with_max_expansions(self.max_expansions)
            .extract(&mut table)?;
        let mut handlers = extraction.handlers;
        let created = extraction.created;
        let mut diagnostics = extraction.diagnostics;

        self.listeners
            .fire(LifecycleEvent::HandlersCreated, profiles, &created)?;
        debug!(table = ?table, "descriptor table");

        if let Some(extra) = extra {
            handlers.merge(extra);
        }

        let requested = strategy::configured_override(&table)?;
        diagnostics.note(format!(
            "handler characteristics:\n{}",
            characteristics_report(&handlers)
        ));
        let strategy = strategy::resolve(&handlers, requested)?;
        diagnostics.note(format!("using {strategy} strategy"));

        if table.global_flag(SORT_HANDLERS_PARAM, true) {
            handlers.sort(profiles);
        }

        let pipeline = Pipeline {
            id: Uuid::now_v7(),
            profile: profiles.clone(),
            built_at: Utc::now(),
            strategy,
            handlers,
            table,
            schema,
            digest,
            events: diagnostics.into_events(),
        };

        self.listeners
            .fire(LifecycleEvent::PipelineCreated, profiles, &created)?;

        info!(
            id = %pipeline.id,
            %strategy,
            handlers = pipeline.handlers.len(),
            targets = pipeline.table.len(),
            "pipeline built"
        );
        Ok(pipeline)
    }

    /// The registered schema for the base profile, else the first `schema`
    /// descriptor carrying a payload.
    ///
    /// A descriptor schema is never registered in the schema store. It lives
    /// only on the pipeline this build produces.
    fn resolve_schema(
        &self,
        profiles: &ProfileSet,
        descriptors: &[Arc<Descriptor>],
    ) -> Result<Option<Arc<dyn SchemaClassifier>>> {
        if let Some(schema) = self.schemas.get(&profiles.base) {
            return Ok(Some(schema));
        }

        let candidates = descriptors
            .iter()
            .filter(|d| d.parsed_selector().target() == Some(SCHEMA_TARGET));

        for descriptor in candidates {
            let payload = descriptor
                .parameter(INLINE_SCHEMA_PARAM)
                .or(descriptor.resource.as_deref())
                .filter(|text| !text.trim().is_empty());

            let Some(text) = payload else {
                error!(%descriptor, "schema resource has no payload; ignored");
                continue;
            };

            let schema = DtdSchema::parse(text).map_err(|e| {
                DeliveryError::config(format!("invalid schema in [{descriptor}]: {e}"))
            })?;
            debug!(%descriptor, profile = %profiles.base, "schema taken from descriptor");
            return Ok(Some(Arc::new(schema)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::handler::{Capabilities, ContentHandler, DECLARED_RESOURCE_TYPE, Handler, Role};
    use crate::lifecycle::LifecycleListener;
    use crate::strategy::STRATEGY_OVERRIDE_PARAM;
    use deliverykit_shared::GLOBAL_PARAMETERS;
    use deliverykit_store::MemoryStore;

    const DTD: &str = "<!ELEMENT br EMPTY>\n<!ELEMENT p (#PCDATA)>";

    fn declared(selector: &str, modes: &str, roles: &str) -> Descriptor {
        Descriptor::new(selector)
            .with_type(DECLARED_RESOURCE_TYPE)
            .with_param("modes", modes)
            .with_param("roles", roles)
            .with_param("name", selector)
    }

    struct Parts {
        store: MemoryStore,
        factories: FactoryRegistry,
        schemas: SchemaStore,
        listeners: ListenerRegistry,
    }

    impl Parts {
        fn new(descriptors: Vec<Descriptor>) -> Self {
            Self {
                store: MemoryStore::from_descriptors(descriptors),
                factories: FactoryRegistry::with_builtins(),
                schemas: SchemaStore::new(),
                listeners: ListenerRegistry::new(),
            }
        }

        fn build(&self, profiles: &ProfileSet) -> Result<Pipeline> {
            PipelineBuilder::new(&self.store, &self.factories, &self.schemas, &self.listeners)
                .build(profiles, None)
        }
    }

    #[test]
    fn builds_stream_pipeline_by_default() {
        let parts = Parts::new(vec![
            declared("p", "stream,tree", "processing-pre"),
            declared("b", "stream,tree", "assembly-pre"),
        ]);

        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");

        assert_eq!(pipeline.strategy(), Strategy::Stream);
        assert_eq!(pipeline.role_tables().handlers(Role::ProcessingPre, "b").len(), 1);
        assert_eq!(pipeline.digest().len(), 64);
        assert!(pipeline
            .events()
            .iter()
            .any(|e| e.message == "using stream strategy"));
    }

    #[test]
    fn override_selects_tree() {
        let parts = Parts::new(vec![
            Descriptor::new(GLOBAL_PARAMETERS).with_param(STRATEGY_OVERRIDE_PARAM, "tree"),
            declared("p", "stream,tree", "assembly-pre"),
        ]);

        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");

        assert_eq!(pipeline.strategy(), Strategy::Tree);
        assert_eq!(pipeline.role_tables().handlers(Role::AssemblyPre, "p").len(), 1);
    }

    #[test]
    fn schema_descriptor_supplies_classifier_for_macros() {
        let parts = Parts::new(vec![
            Descriptor::new(SCHEMA_TARGET).with_param(INLINE_SCHEMA_PARAM, DTD),
            declared("macro:empty", "stream", "serialize"),
        ]);

        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");

        assert!(pipeline.schema().is_some());
        assert_eq!(pipeline.role_tables().handlers(Role::Serialize, "br").len(), 1);
        assert!(parts.schemas.get("html4").is_none());
    }

    #[test]
    fn registered_schema_wins_over_descriptor() {
        let parts = Parts::new(vec![
            Descriptor::new(SCHEMA_TARGET).with_param(INLINE_SCHEMA_PARAM, DTD),
            declared("macro:empty", "stream", "serialize"),
        ]);
        parts.schemas.register(
            "html4",
            Arc::new(DtdSchema::parse("<!ELEMENT hr EMPTY>").expect("dtd")),
        );

        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");

        assert_eq!(pipeline.role_tables().handlers(Role::Serialize, "hr").len(), 1);
        assert!(pipeline.role_tables().handlers(Role::Serialize, "br").is_empty());
    }

    #[test]
    fn malformed_schema_is_configuration_error() {
        let parts = Parts::new(vec![
            Descriptor::new(SCHEMA_TARGET).with_param(INLINE_SCHEMA_PARAM, "<!-- nothing -->"),
        ]);

        let err = parts.build(&ProfileSet::new("html4")).expect_err("must fail");
        assert!(matches!(err, DeliveryError::Config { .. }));
    }

    #[test]
    fn schema_descriptor_without_payload_is_ignored() {
        let parts = Parts::new(vec![
            Descriptor::new(SCHEMA_TARGET),
            declared("p", "tree", "serialize"),
        ]);

        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");
        assert!(pipeline.schema().is_none());
        assert_eq!(pipeline.strategy(), Strategy::Tree);
    }

    #[test]
    fn extra_handlers_take_part_in_resolution() {
        let parts = Parts::new(vec![declared("p", "stream,tree", "processing-pre")]);

        #[derive(Debug)]
        struct TreeOnly(Capabilities);
        impl ContentHandler for TreeOnly {
            fn name(&self) -> &str {
                "tree-only"
            }
            fn capabilities(&self) -> &Capabilities {
                &self.0
            }
        }

        let mut extra = ClassifiedHandlers::new();
        let handler: Handler = Arc::new(TreeOnly(
            Capabilities::new()
                .with_strategy(Strategy::Tree)
                .with_role(Role::Cleanup),
        ));
        extra.add(handler, Arc::new(Descriptor::new("*")), &["*".to_string()]);

        let pipeline = PipelineBuilder::new(
            &parts.store,
            &parts.factories,
            &parts.schemas,
            &parts.listeners,
        )
        .build(&ProfileSet::new("html4"), Some(&extra))
        .expect("build");

        assert_eq!(pipeline.strategy(), Strategy::Tree);
        assert_eq!(pipeline.handlers().len(), 2);
    }

    #[test]
    fn handler_sort_can_be_disabled() {
        let qualified = declared("p", "tree", "serialize").with_param("name", "qualified");
        let plain = declared("p", "tree", "serialize").with_param("name", "plain");

        let sorted = Parts::new(vec![plain.clone(), qualified.clone().with_profile("html4")]);
        let pipeline = sorted.build(&ProfileSet::new("html4")).expect("build");
        let names: Vec<_> = pipeline
            .role_tables()
            .handlers(Role::Serialize, "p")
            .iter()
            .map(|b| b.handler.name().to_string())
            .collect();
        assert_eq!(names, vec!["qualified", "plain"]);

        let unsorted = Parts::new(vec![
            Descriptor::new(GLOBAL_PARAMETERS).with_param(SORT_HANDLERS_PARAM, "false"),
            plain,
            qualified.with_profile("html4"),
        ]);
        let pipeline = unsorted.build(&ProfileSet::new("html4")).expect("build");
        let names: Vec<_> = pipeline
            .role_tables()
            .handlers(Role::Serialize, "p")
            .iter()
            .map(|b| b.handler.name().to_string())
            .collect();
        assert_eq!(names, vec!["plain", "qualified"]);
    }

    #[test]
    fn lifecycle_events_fire_in_order() {
        struct Recorder(Arc<Mutex<Vec<LifecycleEvent>>>);
        impl LifecycleListener for Recorder {
            fn handle(&self, event: LifecycleEvent, _profile: &ProfileSet) -> Result<()> {
                self.0.lock().push(event);
                Ok(())
            }
        }

        let parts = Parts::new(vec![declared("p", "stream", "serialize")]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        parts.listeners.register(Arc::new(Recorder(seen.clone())));

        parts.build(&ProfileSet::new("html4")).expect("build");
        assert_eq!(
            *seen.lock(),
            vec![LifecycleEvent::HandlersCreated, LifecycleEvent::PipelineCreated]
        );
    }

    #[test]
    fn summary_serializes() {
        let parts = Parts::new(vec![declared("p", "stream", "serialize")]);
        let pipeline = parts.build(&ProfileSet::new("html4")).expect("build");

        let json = serde_json::to_value(pipeline.summary()).expect("serialize");
        assert_eq!(json["strategy"], "stream");
        assert_eq!(json["handlers"][0]["name"], "p");
        assert_eq!(json["targets"][0]["target"], "p");
    }
}
