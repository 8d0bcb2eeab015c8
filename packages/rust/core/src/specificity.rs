//! Specificity ordering of descriptors.
//!
//! Rank, highest first:
//! 1. selector kind: literal element > schema macro > wildcard / global
//! 2. profile qualification: base profile > sub-profile > unqualified
//! 3. contextual depth: `order item price` > `item price` > `price`
//!
//! Equal ranks keep their declaration order.

use std::cmp::Ordering;

use deliverykit_shared::{Descriptor, ProfileSet, Selector};

/// Comparable rank of one descriptor for a given profile set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    selector: u8,
    profile: u8,
    depth: usize,
}

impl Specificity {
    pub fn of(descriptor: &Descriptor, profiles: &ProfileSet) -> Self {
        let selector = descriptor.parsed_selector();
        let rank = match &selector {
            Selector::Element { .. } if selector.is_exact() => 2,
            Selector::Macro { .. } => 1,
            _ => 0,
        };

        Self {
            selector: rank,
            profile: descriptor.profile_expression().specificity(profiles),
            depth: selector.depth(),
        }
    }
}

/// Orders `a` before `b` when `a` is more specific.
pub fn compare(a: &Descriptor, b: &Descriptor, profiles: &ProfileSet) -> Ordering {
    Specificity::of(b, profiles).cmp(&Specificity::of(a, profiles))
}

/// Stable sort, most specific first.
pub fn sort_by_specificity<T>(
    items: &mut [T],
    profiles: &ProfileSet,
    descriptor: impl Fn(&T) -> &Descriptor,
) {
    items.sort_by_cached_key(|item| std::cmp::Reverse(Specificity::of(descriptor(item), profiles)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profiles() -> ProfileSet {
        ProfileSet::new("html4").with_sub_profile("msie")
    }

    #[test]
    fn exact_outranks_wildcard() {
        let exact = Descriptor::new("p");
        let wildcard = Descriptor::new("*").with_profile("html4");
        assert_eq!(compare(&exact, &wildcard, &profiles()), Ordering::Less);
        assert_eq!(compare(&wildcard, &exact, &profiles()), Ordering::Greater);
    }

    #[test]
    fn profile_qualification_breaks_exact_ties() {
        let plain = Descriptor::new("p");
        let sub = Descriptor::new("p").with_profile("msie");
        let base = Descriptor::new("p").with_profile("html4");

        let mut items = vec![plain.clone(), sub.clone(), base.clone()];
        sort_by_specificity(&mut items, &profiles(), |d| d);
        assert_eq!(items, vec![base, sub, plain]);
    }

    #[test]
    fn deeper_context_breaks_profile_ties() {
        let shallow = Descriptor::new("price");
        let deep = Descriptor::new("order item price");
        assert_eq!(compare(&deep, &shallow, &profiles()), Ordering::Less);
    }

    #[test]
    fn equal_ranks_keep_declaration_order() {
        let first = Descriptor::new("p").with_resource("acme::First");
        let second = Descriptor::new("p").with_resource("acme::Second");
        let wildcard = Descriptor::new("*").with_resource("acme::Any");

        let mut items = vec![wildcard.clone(), first.clone(), second.clone()];
        sort_by_specificity(&mut items, &profiles(), |d| d);
        assert_eq!(items, vec![first, second, wildcard]);
    }

    #[test]
    fn sorting_is_idempotent() {
        let mut items = vec![
            Descriptor::new("*"),
            Descriptor::new("b").with_profile("msie"),
            Descriptor::new("a b"),
            Descriptor::new("b"),
            Descriptor::new("macro:empty"),
            Descriptor::new("b").with_profile("html4"),
        ];
        sort_by_specificity(&mut items, &profiles(), |d| d);
        let once = items.clone();
        sort_by_specificity(&mut items, &profiles(), |d| d);
        assert_eq!(items, once);
    }
}
