//! Identifier types for simulated identities.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use ulid::Ulid;

/// Attribute names that the backend reserves inside a context.
///
/// `key` carries the generated identity token; `kind` is implied by the
/// position of the context inside a multi-context.
pub const RESERVED_ATTRIBUTES: &[&str] = &["key", "kind"];

/// Kind value that tags a composite identity.
pub const MULTI_KIND: &str = "multi";

/// Kind values the backend refuses for a single context.
pub const RESERVED_KINDS: &[&str] = &[MULTI_KIND, "kind"];

/// Unique identity token for one facet of a simulated entity.
///
/// Backed by a ULID: 48 bits of millisecond timestamp followed by 80 bits
/// from the thread-local CSPRNG, so collisions within a run are negligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextKey(Ulid);

impl ContextKey {
    /// Generate a fresh key.
    pub fn generate() -> Self {
        ContextKey(Ulid::new())
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for ContextKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Kind of a context facet, e.g. `user` or `org`.
///
/// Only built from a validated [`ContextTemplate`](crate::ContextTemplate),
/// so it is always non-empty and never one of [`RESERVED_KINDS`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKind(String);

impl ContextKind {
    pub(crate) fn new_unchecked(kind: impl Into<String>) -> Self {
        ContextKind(kind.into())
    }

    /// Get the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether a raw kind uses only the characters a backend accepts.
    pub fn is_well_formed(kind: &str) -> bool {
        !kind.is_empty()
            && kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }
}

impl Borrow<str> for ContextKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
