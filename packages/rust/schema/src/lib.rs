//! Schema classification for macro-selector expansion.
//!
//! This crate provides:
//! - [`SchemaClassifier`]: the contract the delivery builder needs from a schema
//! - [`ElementCategory`]: the eight fixed element categories
//! - [`DtdSchema`]: a classifier backed by DTD element declarations
//! - [`SchemaStore`]: per-profile classifier registry

mod dtd;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use deliverykit_shared::{DeliveryError, Result};
use parking_lot::RwLock;

pub use dtd::{ContentModel, DtdSchema};

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Element categories a macro selector can name (`macro:<category>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementCategory {
    Empty,
    NotEmpty,
    Any,
    NotAny,
    Mixed,
    NotMixed,
    TextOnly,
    NotTextOnly,
}

impl ElementCategory {
    pub const ALL: [ElementCategory; 8] = [
        Self::Empty,
        Self::NotEmpty,
        Self::Any,
        Self::NotAny,
        Self::Mixed,
        Self::NotMixed,
        Self::TextOnly,
        Self::NotTextOnly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::NotEmpty => "not-empty",
            Self::Any => "any",
            Self::NotAny => "not-any",
            Self::Mixed => "mixed",
            Self::NotMixed => "not-mixed",
            Self::TextOnly => "text-only",
            Self::NotTextOnly => "not-text-only",
        }
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementCategory {
    type Err = DeliveryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s.trim())
            .ok_or_else(|| {
                DeliveryError::config(format!(
                    "unsupported macro category '{s}' (expected one of: {})",
                    Self::ALL.map(Self::as_str).join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Supplies element-name lists for each [`ElementCategory`] of one profile's schema.
pub trait SchemaClassifier: Send + Sync + fmt::Debug {
    /// Element names in `category`, in schema declaration order.
    fn classify(&self, category: ElementCategory) -> Vec<String>;
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Process-wide map of base profile name to schema classifier.
#[derive(Default)]
pub struct SchemaStore {
    schemas: RwLock<HashMap<String, Arc<dyn SchemaClassifier>>>,
}

impl SchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the classifier for a base profile.
    pub fn register(&self, profile: impl Into<String>, schema: Arc<dyn SchemaClassifier>) {
        self.schemas.write().insert(profile.into(), schema);
    }

    pub fn get(&self, profile: &str) -> Option<Arc<dyn SchemaClassifier>> {
        self.schemas.read().get(profile).cloned()
    }
}

impl fmt::Debug for SchemaStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schemas = self.schemas.read();
        let mut profiles: Vec<&String> = schemas.keys().collect();
        profiles.sort();
        f.debug_struct("SchemaStore")
            .field("profiles", &profiles)
            .finish()
    }
}
