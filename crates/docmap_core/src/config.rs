//! Collection configuration.
//!
//! # Responsibility
//! - Describe how a collection maps onto the backing store.
//! - Derive default collection names from Rust type names.
//!
//! # Invariants
//! - Derived names are never empty for a non-empty type name.
//! - Bulk writes default to unordered execution.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tracking::change_store::DEFAULT_IDENTITY_FIELD;

static COLLECTION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)collection$").expect("valid collection suffix regex"));
static ES_PLURAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:s|x|z|ch|sh)$").expect("valid plural regex"));
static Y_PLURAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^aeiou]y$").expect("valid y-plural regex"));

/// Options forwarded with every bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkWriteOptions {
    /// Stop at the first failing operation.
    pub ordered: bool,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self { ordered: false }
    }
}

/// How one collection maps onto the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    pub name: String,
    pub identity_field: String,
    pub bulk_write: BulkWriteOptions,
}

impl Default for CollectionOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            bulk_write: BulkWriteOptions::default(),
        }
    }
}

impl CollectionOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Options named after `T`, e.g. `UserCollection` -> `users`.
    pub fn for_type<T: ?Sized>() -> Self {
        let full = std::any::type_name::<T>();
        let short = full
            .split('<')
            .next()
            .and_then(|path| path.rsplit("::").next())
            .unwrap_or(full);
        Self::named(derive_collection_name(short))
    }

    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    pub fn with_bulk_write(mut self, options: BulkWriteOptions) -> Self {
        self.bulk_write = options;
        self
    }
}

/// Derives a storage collection name from a type name.
///
/// Strips a trailing `Collection` (any case), lower-cases the first
/// character and pluralizes the result.
pub fn derive_collection_name(type_name: &str) -> String {
    let stem = COLLECTION_SUFFIX_RE.replace(type_name, "");
    let mut chars = stem.chars();
    let stem = match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect::<String>(),
        None => return String::new(),
    };
    pluralize(&stem)
}

fn pluralize(word: &str) -> String {
    if Y_PLURAL_RE.is_match(word) {
        format!("{}ies", &word[..word.len() - 1])
    } else if ES_PLURAL_RE.is_match(word) {
        format!("{word}es")
    } else {
        format!("{word}s")
    }
}
