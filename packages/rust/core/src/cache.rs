//! Per-profile pipeline cache and the context that owns it.
//!
//! A key moves from absent to published exactly once per successful build.
//! Builds for one key are serialized on a per-key lock; unrelated keys build
//! in parallel. Failed builds publish nothing, so the next request retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument, warn};

use deliverykit_schema::SchemaStore;
use deliverykit_shared::{BuildConfig, ProfileSet, Result};
use deliverykit_store::ResourceStore;

use crate::classified::ClassifiedHandlers;
use crate::handler::FactoryRegistry;
use crate::lifecycle::ListenerRegistry;
use crate::pipeline::{Pipeline, PipelineBuilder};

/// Published pipelines keyed by base profile.
///
/// A per-key build lock lives only while its key is unpublished; it is
/// dropped from the map as soon as the pipeline is published.
#[derive(Debug, Default)]
pub struct PipelineCache {
    published: RwLock<HashMap<String, Arc<Pipeline>>>,
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    builds: AtomicUsize,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Pipeline>> {
        self.published.read().get(key).cloned()
    }

    /// Return the published pipeline for `key`, running `build` if there is none.
    ///
    /// At most one `build` runs per key at a time. Its result is published
    /// only when it succeeds.
    pub fn get_or_insert_with<F>(&self, key: &str, build: F) -> Result<Arc<Pipeline>>
    where
        F: FnOnce() -> Result<Pipeline>,
    {
        if let Some(pipeline) = self.get(key) {
            return Ok(pipeline);
        }

        let lock = self
            .build_locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone();
        let _guard = lock.lock();

        if let Some(pipeline) = self.get(key) {
            debug!(key, "pipeline published while waiting");
            return Ok(pipeline);
        }

        self.builds.fetch_add(1, Ordering::Relaxed);
        let pipeline = Arc::new(build()?);
        self.published
            .write()
            .insert(key.to_string(), pipeline.clone());
        // Later callers hit the published map, and waiters re-check it.
        // A failed build keeps its lock so retries stay serialized.
        self.build_locks.lock().remove(key);
        Ok(pipeline)
    }

    /// Number of builds started, successful or not.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    /// Number of published pipelines.
    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.published.read().is_empty()
    }
}

/// Cache key for a profile set: the base profile name.
///
/// Sub-profiles select descriptors within a build but share the base
/// profile's pipeline.
pub fn cache_key(profiles: &ProfileSet) -> String {
    profiles.base.clone()
}

/// Everything a pipeline build needs, plus the cache of finished builds.
///
/// Register factories, schemas and listeners before the first request; the
/// registries are only read while building.
pub struct DeliveryContext {
    store: Arc<dyn ResourceStore>,
    factories: FactoryRegistry,
    schemas: SchemaStore,
    listeners: ListenerRegistry,
    config: BuildConfig,
    cache: OnceLock<PipelineCache>,
}

impl DeliveryContext {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            store,
            factories: FactoryRegistry::with_builtins(),
            schemas: SchemaStore::new(),
            listeners: ListenerRegistry::new(),
            config: BuildConfig::default(),
            cache: OnceLock::new(),
        }
    }

    pub fn with_factories(mut self, factories: FactoryRegistry) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_config(mut self, config: BuildConfig) -> Self {
        self.config = config;
        self
    }

    pub fn factories_mut(&mut self) -> &mut FactoryRegistry {
        &mut self.factories
    }

    pub fn schemas(&self) -> &SchemaStore {
        &self.schemas
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn cache(&self) -> &PipelineCache {
        self.cache.get_or_init(PipelineCache::new)
    }

    /// The pipeline for `profiles`, building and publishing it on first use.
    ///
    /// `extra` handlers are merged into the classification of a new build.
    /// They are ignored when the pipeline is already published.
    #[instrument(skip_all, fields(profile = %profiles))]
    pub fn get_or_build(
        &self,
        profiles: &ProfileSet,
        extra: Option<&ClassifiedHandlers>,
    ) -> Result<Arc<Pipeline>> {
        let key = cache_key(profiles);
        let result = self.cache().get_or_insert_with(&key, || {
            PipelineBuilder::new(
                self.store.as_ref(),
                &self.factories,
                &self.schemas,
                &self.listeners,
            )
            .with_max_expansions(self.config.max_expansions)
            .build(profiles, extra)
        });

        if let Err(e) = &result {
            warn!(key = %key, error = %e, "pipeline build failed");
        }
        result
    }
}

impl std::fmt::Debug for DeliveryContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryContext")
            .field("factories", &self.factories)
            .field("schemas", &self.schemas)
            .field("listeners", &self.listeners)
            .field("config", &self.config)
            .field("published", &self.cache.get().map_or(0, PipelineCache::len))
            .finish()
    }
}
