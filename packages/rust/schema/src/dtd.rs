//! DTD-backed schema classifier.
//!
//! Only `<!ELEMENT name content>` declarations are read:
//! - `EMPTY` → empty
//! - `ANY` → any
//! - `(#PCDATA)` → text-only
//! - `(#PCDATA | a | b)*` → mixed
//! - anything else → element content
//!
//! Attribute lists, entities and notations are ignored.

use std::collections::HashSet;
use std::sync::LazyLock;

use deliverykit_shared::{DeliveryError, Result};
use regex::Regex;

use crate::{ElementCategory, SchemaClassifier};

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches `<!-- ... -->` comments, across lines.
static COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment regex"));

/// Matches `<!ELEMENT name content>`.
static ELEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!ELEMENT\s+([^\s>]+)\s+([^>]+)>").expect("element regex")
});

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Content model of one declared element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentModel {
    Empty,
    Any,
    TextOnly,
    Mixed,
    Children,
}

impl ContentModel {
    fn from_declaration(content: &str) -> Self {
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        let upper = compact.to_ascii_uppercase();

        match upper.as_str() {
            "EMPTY" => Self::Empty,
            "ANY" => Self::Any,
            "(#PCDATA)" | "(#PCDATA)*" => Self::TextOnly,
            _ if upper.starts_with("(#PCDATA|") => Self::Mixed,
            _ => Self::Children,
        }
    }
}

/// Parsed element declarations, in declaration order.
#[derive(Debug, Clone)]
pub struct DtdSchema {
    elements: Vec<(String, ContentModel)>,
}

impl DtdSchema {
    /// Parse DTD text. Fails when no element is declared or one is declared twice.
    pub fn parse(text: &str) -> Result<Self> {
        let without_comments = COMMENT_RE.replace_all(text, "");
        let mut seen = HashSet::new();
        let mut elements = Vec::new();

        for caps in ELEMENT_RE.captures_iter(&without_comments) {
            let name = caps[1].trim().to_string();
            if !seen.insert(name.clone()) {
                return Err(DeliveryError::parse(format!(
                    "element '{name}' is declared more than once"
                )));
            }
            elements.push((name, ContentModel::from_declaration(&caps[2])));
        }

        if elements.is_empty() {
            return Err(DeliveryError::parse("schema declares no elements"));
        }

        tracing::debug!(elements = elements.len(), "parsed DTD schema");
        Ok(Self { elements })
    }

    pub fn content_model(&self, element: &str) -> Option<ContentModel> {
        self.elements
            .iter()
            .find(|(name, _)| name == element)
            .map(|(_, model)| *model)
    }

    fn names_where(&self, predicate: impl Fn(ContentModel) -> bool) -> Vec<String> {
        self.elements
            .iter()
            .filter(|(_, model)| predicate(*model))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl SchemaClassifier for DtdSchema {
    fn classify(&self, category: ElementCategory) -> Vec<String> {
        use ContentModel as M;

        match category {
            ElementCategory::Empty => self.names_where(|m| m == M::Empty),
            ElementCategory::NotEmpty => self.names_where(|m| m != M::Empty),
            ElementCategory::Any => self.names_where(|m| m == M::Any),
            ElementCategory::NotAny => self.names_where(|m| m != M::Any),
            ElementCategory::Mixed => self.names_where(|m| m == M::Mixed),
            ElementCategory::NotMixed => self.names_where(|m| m != M::Mixed),
            ElementCategory::TextOnly => self.names_where(|m| m == M::TextOnly),
            ElementCategory::NotTextOnly => self.names_where(|m| m != M::TextOnly),
        }
    }
}
