//! Content handlers, their capability declarations, and the factories that create them.
//!
//! A handler states what it can do up front through [`Capabilities`]: the
//! execution strategies it runs under, the processing roles it fills, and
//! whether it expands into more descriptors or registers further handlers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use deliverykit_shared::{DeliveryError, Descriptor, NATIVE_RESOURCE_TYPE, Result};

use crate::classified::ClassifiedHandlers;
use crate::lifecycle::LifecycleListener;
use crate::strategy::Strategy;

/// Resource type served by [`DeclaredHandlerFactory`].
pub const DECLARED_RESOURCE_TYPE: &str = "handler";

// ---------------------------------------------------------------------------
// Roles & capabilities
// ---------------------------------------------------------------------------

/// Processing phase a handler takes part in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    AssemblyPre,
    AssemblyPost,
    ProcessingPre,
    ProcessingPost,
    Serialize,
    Cleanup,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Self::AssemblyPre,
        Self::AssemblyPost,
        Self::ProcessingPre,
        Self::ProcessingPost,
        Self::Serialize,
        Self::Cleanup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AssemblyPre => "assembly-pre",
            Self::AssemblyPost => "assembly-post",
            Self::ProcessingPre => "processing-pre",
            Self::ProcessingPost => "processing-post",
            Self::Serialize => "serialize",
            Self::Cleanup => "cleanup",
        }
    }

    /// Role used in stream mode, which has no separate assembly phase.
    pub fn in_stream_mode(self) -> Self {
        match self {
            Self::AssemblyPre => Self::ProcessingPre,
            Self::AssemblyPost => Self::ProcessingPost,
            other => other,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DeliveryError::config(format!("unknown handler role '{s}'")))
    }
}

/// Explicit capability declaration carried by every handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    stream: bool,
    tree: bool,
    roles: Vec<Role>,
    self_expanding: bool,
    self_registering: bool,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        match strategy {
            Strategy::Stream => self.stream = true,
            Strategy::Tree => self.tree = true,
        }
        self
    }

    /// Supports both stream and tree mode.
    pub fn with_both_strategies(self) -> Self {
        self.with_strategy(Strategy::Stream)
            .with_strategy(Strategy::Tree)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
        self
    }

    pub fn self_expanding(mut self) -> Self {
        self.self_expanding = true;
        self
    }

    pub fn self_registering(mut self) -> Self {
        self.self_registering = true;
        self
    }

    pub fn supports(&self, strategy: Strategy) -> bool {
        match strategy {
            Strategy::Stream => self.stream,
            Strategy::Tree => self.tree,
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn is_self_expanding(&self) -> bool {
        self.self_expanding
    }

    pub fn is_self_registering(&self) -> bool {
        self.self_registering
    }
}

// ---------------------------------------------------------------------------
// Handler trait
// ---------------------------------------------------------------------------

/// A resource-processing object created from one descriptor.
pub trait ContentHandler: Send + Sync + fmt::Debug {
    /// Human-readable name for reports and tracing.
    fn name(&self) -> &str;

    fn capabilities(&self) -> &Capabilities;

    /// Extra descriptors yielded at creation time. Called only when
    /// [`Capabilities::is_self_expanding`] is set.
    fn expand(&self) -> Vec<Descriptor> {
        Vec::new()
    }

    /// Insert further handlers directly. Called only when
    /// [`Capabilities::is_self_registering`] is set.
    fn register(&self, _handlers: &mut ClassifiedHandlers) {}

    /// Handlers that also want build lifecycle notifications return themselves here.
    fn as_listener(&self) -> Option<&dyn LifecycleListener> {
        None
    }
}

/// Shared handle to a created handler.
pub type Handler = Arc<dyn ContentHandler>;

/// Address-based identity; two handles to the same handler are equal.
pub(crate) fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Failure to create a handler.
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The descriptor itself is invalid. Aborts the whole build.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The handler could not be created. The descriptor is skipped.
    #[error("creation failed: {0}")]
    Creation(String),
}

/// Creates handlers for one resource type.
pub trait HandlerFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, descriptor: &Descriptor) -> std::result::Result<Handler, FactoryError>;
}

/// Resource type → factory lookup.
#[derive(Default, Clone)]
pub struct FactoryRegistry {
    factories: HashMap<String, Arc<dyn HandlerFactory>>,
}

impl FactoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the declarative `handler` factory.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(DECLARED_RESOURCE_TYPE, Arc::new(DeclaredHandlerFactory));
        registry
    }

    /// Register (or replace) the factory for a resource type. Types are case-insensitive.
    pub fn register(&mut self, resource_type: &str, factory: Arc<dyn HandlerFactory>) {
        self.factories
            .insert(resource_type.trim().to_ascii_lowercase(), factory);
    }

    /// Register the identity-based factory for native handler paths.
    pub fn register_native(&mut self, factory: NativeHandlerFactory) {
        self.register(NATIVE_RESOURCE_TYPE, Arc::new(factory));
    }

    pub fn factory_for(&self, resource_type: &str) -> Option<Arc<dyn HandlerFactory>> {
        self.factories
            .get(&resource_type.trim().to_ascii_lowercase())
            .cloned()
    }
}

impl fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("FactoryRegistry").field("types", &types).finish()
    }
}

/// Constructor registered for one native handler path.
pub type NativeConstructor =
    Arc<dyn Fn(&Descriptor) -> std::result::Result<Handler, FactoryError> + Send + Sync>;

/// Identity-based factory: maps native paths such as `acme::Upper` to constructors.
#[derive(Default, Clone)]
pub struct NativeHandlerFactory {
    constructors: HashMap<String, NativeConstructor>,
}

impl NativeHandlerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, path: &str, constructor: F)
    where
        F: Fn(&Descriptor) -> std::result::Result<Handler, FactoryError> + Send + Sync + 'static,
    {
        self.constructors
            .insert(path.trim().to_string(), Arc::new(constructor));
    }

    pub fn with<F>(mut self, path: &str, constructor: F) -> Self
    where
        F: Fn(&Descriptor) -> std::result::Result<Handler, FactoryError> + Send + Sync + 'static,
    {
        self.register(path, constructor);
        self
    }
}

impl HandlerFactory for NativeHandlerFactory {
    fn name(&self) -> &str {
        NATIVE_RESOURCE_TYPE
    }

    fn create(&self, descriptor: &Descriptor) -> std::result::Result<Handler, FactoryError> {
        let path = descriptor.resource.as_deref().unwrap_or_default().trim();
        let constructor = self.constructors.get(path).ok_or_else(|| {
            FactoryError::Creation(format!("no native handler registered for '{path}'"))
        })?;
        constructor(descriptor)
    }
}

// ---------------------------------------------------------------------------
// Declared handlers
// ---------------------------------------------------------------------------

/// Handler whose capabilities come entirely from descriptor parameters.
#[derive(Debug, Clone)]
pub struct DeclaredHandler {
    name: String,
    capabilities: Capabilities,
}

impl ContentHandler for DeclaredHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
}

/// Factory for `type = "handler"` descriptors.
///
/// Parameters:
/// - `modes`: comma list of `stream` / `tree`
/// - `roles`: comma list of role names (`processing-pre`, `cleanup`, ...)
/// - `name`: optional display name
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredHandlerFactory;

impl HandlerFactory for DeclaredHandlerFactory {
    fn name(&self) -> &str {
        DECLARED_RESOURCE_TYPE
    }

    fn create(&self, descriptor: &Descriptor) -> std::result::Result<Handler, FactoryError> {
        let mut capabilities = Capabilities::new();

        for mode in split_list(descriptor.parameter("modes")) {
            let strategy: Strategy = mode
                .parse()
                .map_err(|e: DeliveryError| FactoryError::Configuration(e.to_string()))?;
            capabilities = capabilities.with_strategy(strategy);
        }
        for role in split_list(descriptor.parameter("roles")) {
            let role: Role = role
                .parse()
                .map_err(|e: DeliveryError| FactoryError::Configuration(e.to_string()))?;
            capabilities = capabilities.with_role(role);
        }

        let name = descriptor
            .parameter("name")
            .map(str::to_string)
            .or_else(|| descriptor.resource.clone())
            .unwrap_or_else(|| format!("{}:{DECLARED_RESOURCE_TYPE}", descriptor.selector));

        Ok(Arc::new(DeclaredHandler { name, capabilities }))
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
