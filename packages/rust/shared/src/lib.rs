//! Shared types, error model, and configuration for DeliveryKit.
//!
//! This crate is the foundation depended on by all other DeliveryKit crates.
//! It provides:
//! - [`DeliveryError`]: the unified error type
//! - Domain types ([`Descriptor`], [`Selector`], [`ProfileSet`], [`ProfileExpression`])
//! - Configuration ([`AppConfig`], [`BuildConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuildConfig, BuildSection, DefaultsConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{DeliveryError, Result};
pub use types::{
    Descriptor, GLOBAL_PARAMETERS, MACRO_PREFIX, NATIVE_RESOURCE_TYPE, ProfileExpression,
    ProfileSet, SCHEMA_TARGET, Selector, WILDCARD, descriptor_digest,
};
