//! Entry selection for collection-relative references.
//!
//! `<$ref_tool_chains[].path>` names a collection, not an entry. Which entry
//! applies to the issuing scope is decided by a [`CollectionSelector`].

use serde_json::Value;
use std::fmt;

use forge_core::ScopePath;

/// What the selector knows about the scope issuing the reference.
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    pub scope: &'a ScopePath,
    /// Resolved value of the scope's identity key, or its scope name.
    pub identity: &'a str,
}

/// Picks the entry of a resolved collection that applies to a scope.
pub trait CollectionSelector: Send + Sync + fmt::Debug {
    /// Key read from the issuing scope to build its identity.
    fn identity_key(&self) -> &str;

    /// Select one entry of `collection` (a resolved list or object).
    fn select<'v>(&self, collection: &'v Value, ctx: &SelectionContext<'_>) -> Option<&'v Value>;
}

/// Default selector: the entry whose identity field (or map key) equals the
/// issuing scope's identity.
#[derive(Debug, Clone)]
pub struct MatchByIdentity {
    field: String,
}

impl MatchByIdentity {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl Default for MatchByIdentity {
    fn default() -> Self {
        Self::new("name")
    }
}

impl CollectionSelector for MatchByIdentity {
    fn identity_key(&self) -> &str {
        &self.field
    }

    fn select<'v>(&self, collection: &'v Value, ctx: &SelectionContext<'_>) -> Option<&'v Value> {
        let matches = |entry: &&Value| {
            entry.get(&self.field).and_then(Value::as_str) == Some(ctx.identity)
        };
        match collection {
            Value::Array(items) => items.iter().find(matches),
            Value::Object(map) => map
                .get(ctx.identity)
                .or_else(|| map.values().find(matches)),
            _ => None,
        }
    }
}
