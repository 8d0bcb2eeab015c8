//! Descriptor table: descriptors grouped by the target they apply to.
//!
//! The [`TableBuilder`]:
//! 1. Resolves each selector to its target (`global-parameters` for globals)
//! 2. Groups descriptors per target, dropping duplicates
//! 3. Optionally sorts every list by specificity (`sort.resources`)
//! 4. Expands `macro:<category>` selectors through the schema classifier
//! 5. Re-sorts so expanded entries take part in the ordering

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, instrument};

use deliverykit_schema::{ElementCategory, SchemaClassifier};
use deliverykit_shared::{
    DeliveryError, Descriptor, GLOBAL_PARAMETERS, ProfileSet, Result, Selector,
};

use crate::specificity;

/// Global parameter enabling the specificity sort of descriptor lists.
pub const SORT_RESOURCES_PARAM: &str = "sort.resources";

// ---------------------------------------------------------------------------
// DescriptorTable
// ---------------------------------------------------------------------------

/// Ordered map of target name to the descriptors that apply to it.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTable {
    entries: IndexMap<String, Vec<Arc<Descriptor>>>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `descriptor` under `target` unless it is already listed there.
    pub fn insert(&mut self, target: &str, descriptor: Arc<Descriptor>) -> bool {
        let list = self.entries.entry(target.to_string()).or_default();
        if list.iter().any(|d| **d == *descriptor) {
            return false;
        }
        list.push(descriptor);
        true
    }

    pub fn get(&self, target: &str) -> &[Arc<Descriptor>] {
        self.entries.get(target).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, target: &str, descriptor: &Descriptor) -> bool {
        self.get(target).iter().any(|d| **d == *descriptor)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Arc<Descriptor>])> {
        self.entries
            .iter()
            .map(|(target, list)| (target.as_str(), list.as_slice()))
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Each distinct descriptor once, in table order, with every target it is listed under.
    pub fn bindings(&self) -> Vec<(Arc<Descriptor>, Vec<String>)> {
        let mut bindings: IndexMap<&Descriptor, (Arc<Descriptor>, Vec<String>)> = IndexMap::new();

        for (target, list) in &self.entries {
            for descriptor in list {
                bindings
                    .entry(descriptor.as_ref())
                    .or_insert_with(|| (descriptor.clone(), Vec::new()))
                    .1
                    .push(target.clone());
            }
        }

        bindings.into_values().collect()
    }

    /// First value of a parameter declared on the `global-parameters` target.
    pub fn global_parameter(&self, name: &str) -> Option<&str> {
        self.get(GLOBAL_PARAMETERS)
            .iter()
            .find_map(|d| d.parameter(name))
    }

    /// Boolean global parameter; only a case-insensitive `true` enables it.
    pub fn global_flag(&self, name: &str, default: bool) -> bool {
        match self.global_parameter(name) {
            Some(value) => value.trim().eq_ignore_ascii_case("true"),
            None => default,
        }
    }

    /// Stable specificity sort of every target's list.
    pub fn sort(&mut self, profiles: &ProfileSet) {
        for list in self.entries.values_mut() {
            specificity::sort_by_specificity(list, profiles, |d| d.as_ref());
        }
    }
}

// ---------------------------------------------------------------------------
// TableBuilder
// ---------------------------------------------------------------------------

/// Builds a [`DescriptorTable`] for one profile set.
pub struct TableBuilder<'a> {
    profiles: &'a ProfileSet,
    schema: Option<&'a dyn SchemaClassifier>,
}

impl<'a> TableBuilder<'a> {
    pub fn new(profiles: &'a ProfileSet) -> Self {
        Self {
            profiles,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: Option<&'a dyn SchemaClassifier>) -> Self {
        self.schema = schema;
        self
    }

    #[instrument(skip_all, fields(profile = %self.profiles.base, descriptors = descriptors.len()))]
    pub fn build(&self, descriptors: &[Arc<Descriptor>]) -> Result<DescriptorTable> {
        let mut table = DescriptorTable::new();
        let mut macros = Vec::new();

        for descriptor in descriptors {
            match descriptor.parsed_selector().target() {
                Some(target) => {
                    table.insert(target, descriptor.clone());
                }
                None => macros.push(descriptor.clone()),
            }
        }

        let sort = table.global_flag(SORT_RESOURCES_PARAM, false);
        if sort {
            table.sort(self.profiles);
        }

        for descriptor in &macros {
            for element in self.targets_for(descriptor)? {
                table.insert(&element, descriptor.clone());
            }
        }

        if sort {
            table.sort(self.profiles);
        }

        debug!(
            targets = table.len(),
            macros = macros.len(),
            sorted = sort,
            "descriptor table built"
        );
        Ok(table)
    }

    /// Targets a single descriptor applies to, expanding macro selectors.
    pub fn targets_for(&self, descriptor: &Descriptor) -> Result<Vec<String>> {
        match descriptor.parsed_selector() {
            Selector::Macro { category } => {
                let category: ElementCategory = category.parse()?;
                let schema = self.schema.ok_or_else(|| {
                    DeliveryError::config(format!(
                        "selector '{}' needs a schema, but none is available for profile '{}'",
                        descriptor.selector, self.profiles.base
                    ))
                })?;
                let elements = schema.classify(category);
                debug!(%category, elements = elements.len(), "expanded macro selector");
                Ok(elements)
            }
            other => Ok(other.target().map(str::to_string).into_iter().collect()),
        }
    }
}
