//! Handlers sorted into per-strategy, per-role, per-target tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use deliverykit_shared::{Descriptor, ProfileSet};

use crate::handler::{Handler, Role, same_handler};
use crate::specificity;
use crate::strategy::Strategy;

/// A handler together with the descriptor it was created from.
#[derive(Debug, Clone)]
pub struct HandlerBinding {
    pub handler: Handler,
    pub descriptor: Arc<Descriptor>,
}

/// Target name → handlers applied to it, in order.
pub type HandlerTable = IndexMap<String, Vec<HandlerBinding>>;

/// One handler table per role.
#[derive(Debug, Clone, Default)]
pub struct RoleTables {
    tables: BTreeMap<Role, HandlerTable>,
}

impl RoleTables {
    pub fn table(&self, role: Role) -> Option<&HandlerTable> {
        self.tables.get(&role)
    }

    /// Handlers for `role` on `target`, in application order.
    pub fn handlers(&self, role: Role, target: &str) -> &[HandlerBinding] {
        self.tables
            .get(&role)
            .and_then(|t| t.get(target))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn roles(&self) -> impl Iterator<Item = (Role, &HandlerTable)> {
        self.tables.iter().map(|(role, table)| (*role, table))
    }

    /// Total number of (role, target, handler) bindings.
    pub fn binding_count(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.values())
            .map(Vec::len)
            .sum()
    }

    fn push(&mut self, role: Role, target: &str, binding: HandlerBinding) {
        self.tables
            .entry(role)
            .or_default()
            .entry(target.to_string())
            .or_default()
            .push(binding);
    }

    fn sort(&mut self, profiles: &ProfileSet) {
        for list in self.tables.values_mut().flat_map(|t| t.values_mut()) {
            specificity::sort_by_specificity(list, profiles, |b| b.descriptor.as_ref());
        }
    }
}

/// A classified handler and every target it is bound to.
#[derive(Debug, Clone)]
pub struct ClassifiedEntry {
    pub handler: Handler,
    pub descriptor: Arc<Descriptor>,
    pub targets: Vec<String>,
}

/// The accumulated classification of one build.
///
/// Each handler is recorded once. Handlers declaring at least one role are
/// "classified" and placed in the role tables of every strategy they
/// support; handlers without roles are only remembered as unclassified.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedHandlers {
    entries: Vec<ClassifiedEntry>,
    unclassified: Vec<HandlerBinding>,
    stream: RoleTables,
    tree: RoleTables,
}

impl ClassifiedHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handler`, bound to `targets`. Returns `false` when it has no role
    /// or was already recorded.
    pub fn add(&mut self, handler: Handler, descriptor: Arc<Descriptor>, targets: &[String]) -> bool {
        if self.contains(&handler) {
            return false;
        }

        let capabilities = handler.capabilities();
        if capabilities.roles().is_empty() {
            trace!(handler = handler.name(), "handler declares no role");
            self.unclassified.push(HandlerBinding { handler, descriptor });
            return false;
        }

        for role in capabilities.roles() {
            for target in targets {
                let binding = HandlerBinding {
                    handler: handler.clone(),
                    descriptor: descriptor.clone(),
                };
                if capabilities.supports(Strategy::Tree) {
                    self.tree.push(*role, target, binding.clone());
                }
                if capabilities.supports(Strategy::Stream) {
                    self.stream.push(role.in_stream_mode(), target, binding);
                }
            }
        }

        self.entries.push(ClassifiedEntry {
            handler,
            descriptor,
            targets: targets.to_vec(),
        });
        true
    }

    /// Add every handler of `other` that is not already present.
    pub fn merge(&mut self, other: &ClassifiedHandlers) {
        for entry in &other.entries {
            self.add(entry.handler.clone(), entry.descriptor.clone(), &entry.targets);
        }
        for binding in &other.unclassified {
            self.add(binding.handler.clone(), binding.descriptor.clone(), &[]);
        }
    }

    pub fn contains(&self, handler: &Handler) -> bool {
        self.entries.iter().any(|e| same_handler(&e.handler, handler))
            || self
                .unclassified
                .iter()
                .any(|b| same_handler(&b.handler, handler))
    }

    pub fn entries(&self) -> &[ClassifiedEntry] {
        &self.entries
    }

    pub fn unclassified(&self) -> &[HandlerBinding] {
        &self.unclassified
    }

    /// Number of classified handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of classified handlers able to run under `strategy`.
    pub fn capable_of(&self, strategy: Strategy) -> usize {
        self.entries
            .iter()
            .filter(|e| e.handler.capabilities().supports(strategy))
            .count()
    }

    pub fn tables(&self, strategy: Strategy) -> &RoleTables {
        match strategy {
            Strategy::Stream => &self.stream,
            Strategy::Tree => &self.tree,
        }
    }

    pub fn into_tables(self, strategy: Strategy) -> RoleTables {
        match strategy {
            Strategy::Stream => self.stream,
            Strategy::Tree => self.tree,
        }
    }

    /// Stable specificity sort of every target's handler list.
    pub fn sort(&mut self, profiles: &ProfileSet) {
        self.stream.sort(profiles);
        self.tree.sort(profiles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{Capabilities, ContentHandler};

    #[derive(Debug)]
    struct Fixed(&'static str, Capabilities);

    impl ContentHandler for Fixed {
        fn name(&self) -> &str {
            self.0
        }
        fn capabilities(&self) -> &Capabilities {
            &self.1
        }
    }

    fn handler(name: &'static str, caps: Capabilities) -> Handler {
        Arc::new(Fixed(name, caps))
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn places_handler_in_every_supported_table() {
        let mut classified = ClassifiedHandlers::new();
        let h = handler(
            "both",
            Capabilities::new()
                .with_both_strategies()
                .with_role(Role::AssemblyPre),
        );

        assert!(classified.add(h, Arc::new(Descriptor::new("p")), &targets(&["p", "br"])));

        assert_eq!(classified.tables(Strategy::Tree).handlers(Role::AssemblyPre, "br").len(), 1);
        assert_eq!(
            classified.tables(Strategy::Stream).handlers(Role::ProcessingPre, "p").len(),
            1
        );
        assert!(classified
            .tables(Strategy::Stream)
            .table(Role::AssemblyPre)
            .is_none());
        assert_eq!(classified.len(), 1);
    }

    #[test]
    fn roleless_handlers_are_unclassified() {
        let mut classified = ClassifiedHandlers::new();
        let h = handler("plain", Capabilities::new().with_both_strategies());

        assert!(!classified.add(h, Arc::new(Descriptor::new("p")), &targets(&["p"])));
        assert_eq!(classified.len(), 0);
        assert_eq!(classified.unclassified().len(), 1);
    }

    #[test]
    fn same_handler_is_recorded_once() {
        let mut classified = ClassifiedHandlers::new();
        let h = handler("h", Capabilities::new().with_strategy(Strategy::Tree).with_role(Role::Cleanup));
        let d = Arc::new(Descriptor::new("p"));

        assert!(classified.add(h.clone(), d.clone(), &targets(&["p"])));
        assert!(!classified.add(h, d, &targets(&["p"])));
        assert_eq!(classified.capable_of(Strategy::Tree), 1);
        assert_eq!(classified.capable_of(Strategy::Stream), 0);
    }

    #[test]
    fn merge_skips_known_handlers() {
        let shared = handler("shared", Capabilities::new().with_both_strategies().with_role(Role::Serialize));
        let d = Arc::new(Descriptor::new("p"));

        let mut left = ClassifiedHandlers::new();
        left.add(shared.clone(), d.clone(), &targets(&["p"]));

        let mut right = ClassifiedHandlers::new();
        right.add(shared, d.clone(), &targets(&["p"]));
        right.add(
            handler("extra", Capabilities::new().with_both_strategies().with_role(Role::Serialize)),
            d,
            &targets(&["p"]),
        );

        left.merge(&right);
        assert_eq!(left.len(), 2);
        assert_eq!(left.tables(Strategy::Tree).binding_count(), 2);
    }

    #[test]
    fn sort_orders_handlers_by_descriptor_specificity() {
        let profiles = ProfileSet::new("html4");
        let caps = || Capabilities::new().with_strategy(Strategy::Tree).with_role(Role::ProcessingPre);
        let mut classified = ClassifiedHandlers::new();

        classified.add(handler("generic", caps()), Arc::new(Descriptor::new("p")), &targets(&["p"]));
        classified.add(
            handler("qualified", caps()),
            Arc::new(Descriptor::new("p").with_profile("html4")),
            &targets(&["p"]),
        );
        classified.sort(&profiles);

        let names: Vec<&str> = classified
            .tables(Strategy::Tree)
            .handlers(Role::ProcessingPre, "p")
            .iter()
            .map(|b| b.handler.name())
            .collect();
        assert_eq!(names, vec!["qualified", "generic"]);
    }
}
