//! Core domain types for DeliveryKit resource configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Reserved pseudo-target holding process-wide parameters.
pub const GLOBAL_PARAMETERS: &str = "global-parameters";

/// Selector matching any element.
pub const WILDCARD: &str = "*";

/// Prefix of schema-derived macro selectors (`macro:empty`).
pub const MACRO_PREFIX: &str = "macro:";

/// Reserved target whose descriptor carries the profile's schema payload.
pub const SCHEMA_TARGET: &str = "schema";

/// Resource type of the identity-based factory for native handler paths.
pub const NATIVE_RESOURCE_TYPE: &str = "native";

/// Matches native handler paths such as `acme::filters::Upper`.
static NATIVE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(::[A-Za-z_][A-Za-z0-9_]*)+$").expect("native path regex")
});

// ---------------------------------------------------------------------------
// Selector
// ---------------------------------------------------------------------------

/// Parsed form of a descriptor's selector string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// The reserved `global-parameters` pseudo-target.
    Global,
    /// `*`: applies to every element.
    Wildcard,
    /// `macro:<category>`: expanded from the profile's schema.
    Macro { category: String },
    /// One or more element names; the last step is the target.
    Element { path: Vec<String> },
}

impl Selector {
    /// Parse a raw selector. Blank selectors are treated as the wildcard.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();

        if raw.is_empty() || raw == WILDCARD {
            return Self::Wildcard;
        }
        if raw.eq_ignore_ascii_case(GLOBAL_PARAMETERS) {
            return Self::Global;
        }
        if let Some(category) = raw.strip_prefix(MACRO_PREFIX) {
            return Self::Macro {
                category: category.trim().to_string(),
            };
        }

        let path: Vec<String> = raw
            .split(|c: char| c.is_whitespace() || c == '/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        match path.last().map(String::as_str) {
            Some(WILDCARD) if path.len() == 1 => Self::Wildcard,
            _ => Self::Element { path },
        }
    }

    /// The table key this selector resolves to. Macros have no single target.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Global => Some(GLOBAL_PARAMETERS),
            Self::Wildcard => Some(WILDCARD),
            Self::Macro { .. } => None,
            Self::Element { path } => path.last().map(String::as_str),
        }
    }

    /// Number of context steps (1 for a bare element name).
    pub fn depth(&self) -> usize {
        match self {
            Self::Element { path } => path.len(),
            _ => 0,
        }
    }

    /// Whether the selector names a concrete element (as opposed to `*`).
    pub fn is_exact(&self) -> bool {
        match self {
            Self::Element { path } => path.last().is_some_and(|s| s != WILDCARD),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Profiles
// ---------------------------------------------------------------------------

/// A base profile plus optional sub-profiles. The base profile is the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileSet {
    /// Base profile name.
    pub base: String,
    /// Additional profiles the base profile is a member of.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_profiles: Vec<String>,
}

impl ProfileSet {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            sub_profiles: Vec::new(),
        }
    }

    pub fn with_sub_profile(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.sub_profiles.contains(&name) {
            self.sub_profiles.push(name);
        }
        self
    }

    /// Whether `name` is the base profile or one of the sub-profiles.
    pub fn contains(&self, name: &str) -> bool {
        self.base == name || self.sub_profiles.iter().any(|p| p == name)
    }
}

impl fmt::Display for ProfileSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if !self.sub_profiles.is_empty() {
            write!(f, " [{}]", self.sub_profiles.join(", "))?;
        }
        Ok(())
    }
}

/// Parsed profile applicability of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileExpression {
    /// Applies to every profile.
    Any,
    /// Applies when any listed profile is in the profile set.
    OneOf(Vec<String>),
}

impl ProfileExpression {
    /// Parse a comma-separated expression; empty or `*` means every profile.
    pub fn parse(raw: &str) -> Self {
        let names: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() || names.iter().any(|n| n == WILDCARD) {
            Self::Any
        } else {
            Self::OneOf(names)
        }
    }

    pub fn applies_to(&self, profiles: &ProfileSet) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(names) => names.iter().any(|n| profiles.contains(n)),
        }
    }

    /// 2 = names the base profile, 1 = names a sub-profile, 0 = unqualified or no match.
    pub fn specificity(&self, profiles: &ProfileSet) -> u8 {
        match self {
            Self::Any => 0,
            Self::OneOf(names) => {
                if names.iter().any(|n| *n == profiles.base) {
                    2
                } else if names.iter().any(|n| profiles.contains(n)) {
                    1
                } else {
                    0
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Declarative record describing one resource and where it applies.
///
/// Loaded from `[[resource]]` tables; immutable once loaded. Two descriptors
/// with identical fields are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Target selector (element, contextual path, `*`, `macro:..`, `global-parameters`).
    #[serde(default)]
    pub selector: String,
    /// Declared resource type. Derived from the resource extension when absent.
    #[serde(
        default,
        rename = "type",
        alias = "resource_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub resource_type: Option<String>,
    /// Resource identity: native handler path, file name, or inline payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Free-form parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
    /// Profile expression (comma-separated names, empty for all).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub profile: String,
}

impl Descriptor {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            resource_type: None,
            resource: None,
            parameters: BTreeMap::new(),
            profile: String::new(),
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn parsed_selector(&self) -> Selector {
        Selector::parse(&self.selector)
    }

    pub fn profile_expression(&self) -> ProfileExpression {
        ProfileExpression::parse(&self.profile)
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    /// Declared type, or the lowercased extension of a file-like resource.
    pub fn resource_type(&self) -> Option<String> {
        if let Some(declared) = self.resource_type.as_deref().map(str::trim) {
            if !declared.is_empty() {
                return Some(declared.to_string());
            }
        }

        let resource = self.resource.as_deref()?.trim();
        if resource.contains(char::is_whitespace) || resource.contains("::") {
            return None;
        }
        let file_name = resource.rsplit('/').next().unwrap_or(resource);
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Whether the resource identity is a native handler path (`crate::Type`).
    pub fn is_native_reference(&self) -> bool {
        self.resource
            .as_deref()
            .is_some_and(|r| NATIVE_PATH_RE.is_match(r.trim()))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "selector={}", self.selector)?;
        if let Some(resource) = &self.resource {
            let shown: String = resource.chars().take(60).collect();
            write!(f, " resource={shown}")?;
        }
        if let Some(kind) = &self.resource_type {
            write!(f, " type={kind}")?;
        }
        if !self.profile.is_empty() {
            write!(f, " profile={}", self.profile)?;
        }
        Ok(())
    }
}

/// SHA-256 over the descriptors in iteration order, hex encoded.
pub fn descriptor_digest<'a>(descriptors: impl IntoIterator<Item = &'a Descriptor>) -> String {
    let mut hasher = Sha256::new();
    for d in descriptors {
        hasher.update(d.selector.as_bytes());
        hasher.update([0x1f]);
        hasher.update(d.resource_type.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1f]);
        hasher.update(d.resource.as_deref().unwrap_or_default().as_bytes());
        hasher.update([0x1f]);
        for (name, value) in &d.parameters {
            hasher.update(name.as_bytes());
            hasher.update([b'=']);
            hasher.update(value.as_bytes());
            hasher.update([0x1f]);
        }
        hasher.update(d.profile.as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_forms() {
        assert_eq!(Selector::parse("global-parameters"), Selector::Global);
        assert_eq!(Selector::parse("*"), Selector::Wildcard);
        assert_eq!(Selector::parse("  "), Selector::Wildcard);
        assert_eq!(
            Selector::parse("macro:empty"),
            Selector::Macro {
                category: "empty".into()
            }
        );

        let contextual = Selector::parse("order item price");
        assert_eq!(contextual.target(), Some("price"));
        assert_eq!(contextual.depth(), 3);
        assert!(contextual.is_exact());

        let slashed = Selector::parse("order/item");
        assert_eq!(slashed.target(), Some("item"));
    }

    #[test]
    fn contextual_wildcard_is_not_exact() {
        let selector = Selector::parse("order *");
        assert_eq!(selector.target(), Some("*"));
        assert!(!selector.is_exact());
    }

    #[test]
    fn profile_expression_matching() {
        let profiles = ProfileSet::new("html4").with_sub_profile("msie");

        let any = ProfileExpression::parse("");
        assert!(any.applies_to(&profiles));
        assert_eq!(any.specificity(&profiles), 0);

        let base = ProfileExpression::parse("html4, wml");
        assert!(base.applies_to(&profiles));
        assert_eq!(base.specificity(&profiles), 2);

        let sub = ProfileExpression::parse("msie");
        assert_eq!(sub.specificity(&profiles), 1);

        let other = ProfileExpression::parse("wml");
        assert!(!other.applies_to(&profiles));
    }

    #[test]
    fn resource_type_derivation() {
        let explicit = Descriptor::new("a").with_resource("x.xsl").with_type("groovy");
        assert_eq!(explicit.resource_type().as_deref(), Some("groovy"));

        let derived = Descriptor::new("a").with_resource("/templates/Page.XSL");
        assert_eq!(derived.resource_type().as_deref(), Some("xsl"));

        let native = Descriptor::new("a").with_resource("acme::Upper");
        assert_eq!(native.resource_type(), None);
        assert!(native.is_native_reference());

        let inline = Descriptor::new("a").with_resource("<b>hello world.</b>");
        assert_eq!(inline.resource_type(), None);
        assert!(!inline.is_native_reference());
    }

    #[test]
    fn descriptor_equality_is_by_content() {
        let a = Descriptor::new("b").with_resource("acme::Bold").with_param("k", "v");
        let b = Descriptor::new("b").with_resource("acme::Bold").with_param("k", "v");
        assert_eq!(a, b);
        assert_ne!(a, b.clone().with_profile("html4"));
    }

    #[test]
    fn descriptor_toml_roundtrip() {
        let toml_str = r#"
selector = "order item"
type = "handler"
profile = "html4"

[parameters]
modes = "stream,tree"
"#;
        let parsed: Descriptor = toml::from_str(toml_str).expect("parse");
        assert_eq!(parsed.resource_type.as_deref(), Some("handler"));
        assert_eq!(parsed.parameter("modes"), Some("stream,tree"));
        assert_eq!(parsed.parsed_selector().target(), Some("item"));
    }

    #[test]
    fn digest_is_order_sensitive() {
        let a = Descriptor::new("a");
        let b = Descriptor::new("b");
        assert_eq!(descriptor_digest([&a, &b]), descriptor_digest([&a, &b]));
        assert_ne!(descriptor_digest([&a, &b]), descriptor_digest([&b, &a]));
        assert_eq!(descriptor_digest([&a]).len(), 64);
    }
}
