//! Core pipeline configuration for DeliveryKit.
//!
//! This crate turns the resource descriptors of a profile into a cached,
//! immutable [`Pipeline`]: descriptor table, classified handlers, and the
//! execution strategy they all support.

pub mod cache;
pub mod classified;
pub mod diagnostics;
pub mod extract;
pub mod handler;
pub mod lifecycle;
pub mod pipeline;
pub mod specificity;
pub mod strategy;
pub mod table;

pub use cache::{DeliveryContext, PipelineCache, cache_key};
pub use classified::{ClassifiedHandlers, HandlerBinding, RoleTables};
pub use diagnostics::{DiagnosticEvent, Diagnostics, characteristics_report};
pub use extract::{Extraction, HandlerExtractor};
pub use handler::{
    Capabilities, ContentHandler, DeclaredHandlerFactory, FactoryError, FactoryRegistry, Handler,
    HandlerFactory, NativeHandlerFactory, Role,
};
pub use lifecycle::{LifecycleEvent, LifecycleListener, ListenerRegistry};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineSummary};
pub use strategy::Strategy;
pub use table::{DescriptorTable, TableBuilder};
