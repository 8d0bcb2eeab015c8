//! Resource descriptor storage.
//!
//! The [`ResourceStore`] trait is what the pipeline builder reads raw
//! descriptors from. [`MemoryStore`] is the bundled implementation; it is
//! filled programmatically or from TOML resource files:
//!
//! ```toml
//! [[resource]]
//! selector = "global-parameters"
//! parameters = { "sort.resources" = "true" }
//!
//! [[resource]]
//! selector = "order item"
//! type = "handler"
//! profile = "html4"
//! parameters = { modes = "stream,tree", roles = "processing-pre" }
//! ```

use std::path::Path;
use std::sync::Arc;

use deliverykit_shared::{DeliveryError, Descriptor, ProfileSet, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

/// Supplies the raw descriptors that apply to a profile set.
pub trait ResourceStore: Send + Sync {
    /// Descriptors applicable to `profiles`, in declaration order.
    fn descriptors(&self, profiles: &ProfileSet) -> Result<Vec<Arc<Descriptor>>>;
}

/// On-disk shape of a resource file.
#[derive(Debug, Deserialize)]
struct ResourceFile {
    #[serde(default, rename = "resource")]
    resources: Vec<Descriptor>,
}

/// Parse the `[[resource]]` tables of a TOML document.
pub fn parse_resources(content: &str) -> Result<Vec<Descriptor>> {
    let file: ResourceFile = toml::from_str(content)
        .map_err(|e| DeliveryError::parse(format!("invalid resource file: {e}")))?;
    Ok(file.resources)
}

/// Read and parse a resource file.
pub fn load_resources(path: &Path) -> Result<Vec<Descriptor>> {
    let content = std::fs::read_to_string(path).map_err(|e| DeliveryError::io(path, e))?;
    let resources = parse_resources(&content).map_err(|e| {
        DeliveryError::parse(format!("{}: {e}", path.display()))
    })?;
    debug!(path = %path.display(), count = resources.len(), "loaded resource file");
    Ok(resources)
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory descriptor store, filtered by profile on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    descriptors: RwLock<Vec<Arc<Descriptor>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = Descriptor>) -> Self {
        let store = Self::new();
        store.extend(descriptors);
        store
    }

    /// Load every listed resource file, in order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let store = Self::new();
        for path in paths {
            store.extend(load_resources(path.as_ref())?);
        }
        info!(count = store.len(), "resource store loaded");
        Ok(store)
    }

    pub fn add(&self, descriptor: Descriptor) {
        self.descriptors.write().push(Arc::new(descriptor));
    }

    pub fn extend(&self, descriptors: impl IntoIterator<Item = Descriptor>) {
        self.descriptors
            .write()
            .extend(descriptors.into_iter().map(Arc::new));
    }

    /// Swap the whole descriptor set.
    pub fn replace(&self, descriptors: impl IntoIterator<Item = Descriptor>) {
        *self.descriptors.write() = descriptors.into_iter().map(Arc::new).collect();
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.read().is_empty()
    }
}

impl ResourceStore for MemoryStore {
    fn descriptors(&self, profiles: &ProfileSet) -> Result<Vec<Arc<Descriptor>>> {
        Ok(self
            .descriptors
            .read()
            .iter()
            .filter(|d| d.profile_expression().applies_to(profiles))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCES: &str = r#"
[[resource]]
selector = "global-parameters"
parameters = { "sort.resources" = "true" }

[[resource]]
selector = "order item"
type = "handler"
profile = "html4"
parameters = { modes = "stream,tree", roles = "processing-pre" }

[[resource]]
selector = "br"
resource = "acme::LineBreak"
profile = "wml"
"#;

    #[test]
    fn parses_resource_tables() {
        let resources = parse_resources(RESOURCES).expect("parse");
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].parameter("sort.resources"), Some("true"));
        assert_eq!(resources[1].resource_type.as_deref(), Some("handler"));
        assert!(resources[2].is_native_reference());
    }

    #[test]
    fn filters_by_profile() {
        let store = MemoryStore::from_descriptors(parse_resources(RESOURCES).expect("parse"));

        let html = store.descriptors(&ProfileSet::new("html4")).expect("read");
        assert_eq!(html.len(), 2);
        assert!(html.iter().all(|d| d.profile != "wml"));

        let wml = store
            .descriptors(&ProfileSet::new("phone").with_sub_profile("wml"))
            .expect("read");
        assert_eq!(wml.len(), 2);
        assert_eq!(wml[1].selector, "br");
    }

    #[test]
    fn loads_files_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("base.toml");
        let second = dir.path().join("extra.toml");
        std::fs::write(&first, RESOURCES).expect("write");
        std::fs::write(
            &second,
            "[[resource]]\nselector = \"p\"\nresource = \"acme::Para\"\n",
        )
        .expect("write");

        let store = MemoryStore::from_files(&[&first, &second]).expect("load");
        assert_eq!(store.len(), 4);

        let all = store.descriptors(&ProfileSet::new("html4")).expect("read");
        assert_eq!(all.last().map(|d| d.selector.as_str()), Some("p"));
    }

    #[test]
    fn reports_path_on_bad_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[[resource]\nselector = ").expect("write");

        let err = load_resources(&path).expect_err("must fail");
        assert!(err.to_string().contains("broken.toml"));

        let missing = load_resources(&dir.path().join("missing.toml")).expect_err("must fail");
        assert!(matches!(missing, DeliveryError::Io { .. }));
    }

    #[test]
    fn replace_swaps_descriptor_set() {
        let store = MemoryStore::from_descriptors([Descriptor::new("a")]);
        store.replace([Descriptor::new("b"), Descriptor::new("c")]);
        let all = store.descriptors(&ProfileSet::new("any")).expect("read");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].selector, "b");
    }
}
