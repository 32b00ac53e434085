//! Composite identities built from context templates.
//!
//! A [`MultiContext`] holds one [`Context`] per template kind. Each context
//! carries a freshly generated [`ContextKey`] plus the template's attributes.
//! It serializes to the multi-context JSON shape flagging backends expect:
//!
//! ```text
//! {
//!   "kind": "multi",
//!   "user": { "key": "01J...", "country": "US" },
//!   "org":  { "key": "01J...", "tier": "gold" }
//! }
//! ```

use crate::identifiers::{ContextKey, ContextKind, MULTI_KIND};
use crate::spec::ContextTemplate;
use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// One facet of a simulated entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Context {
    key: ContextKey,
    #[serde(flatten)]
    attributes: IndexMap<String, String>,
}

impl Context {
    /// Build a context from a template with a fresh key.
    ///
    /// A later attribute with the same key overwrites an earlier one.
    pub fn from_template(template: &ContextTemplate) -> Self {
        let attributes = template
            .attributes
            .iter()
            .map(|attr| (attr.key.clone(), attr.value.clone()))
            .collect();

        Self {
            key: ContextKey::generate(),
            attributes,
        }
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    /// Get a template attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }
}

/// Composite identity of one simulated entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiContext {
    contexts: IndexMap<ContextKind, Context>,
}

impl MultiContext {
    /// Build an entity from validated templates, generating one key per template.
    ///
    /// Template kinds are unique after validation; the order of templates is kept.
    pub fn generate(templates: &[ContextTemplate]) -> Self {
        let contexts = templates
            .iter()
            .map(|template| {
                (
                    ContextKind::new_unchecked(template.kind.as_str()),
                    Context::from_template(template),
                )
            })
            .collect();

        Self { contexts }
    }

    /// Get the context for a kind.
    pub fn get(&self, kind: &str) -> Option<&Context> {
        self.contexts.get(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &ContextKind> {
        self.contexts.keys()
    }

    /// All generated keys, in template order.
    pub fn keys(&self) -> impl Iterator<Item = ContextKey> + '_ {
        self.contexts.values().map(Context::key)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Render the multi-context JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        // Keys and attribute values are strings; this cannot fail.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for MultiContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.contexts.len() + 1))?;
        map.serialize_entry("kind", MULTI_KIND)?;
        for (kind, context) in &self.contexts {
            map.serialize_entry(kind.as_str(), context)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn templates() -> Vec<ContextTemplate> {
        vec![
            ContextTemplate::new("user").with_attribute("country", "US"),
            ContextTemplate::new("org")
                .with_attribute("tier", "gold")
                .with_attribute("region", "eu"),
        ]
    }

    #[test]
    fn test_generate_one_context_per_template() {
        let entity = MultiContext::generate(&templates());

        assert_eq!(entity.len(), 2);
        let kinds: Vec<&str> = entity.kinds().map(ContextKind::as_str).collect();
        assert_eq!(kinds, vec!["user", "org"]);

        let user = entity.get("user").unwrap();
        assert_eq!(user.attribute("country"), Some("US"));
        assert_eq!(entity.get("org").unwrap().attribute("region"), Some("eu"));
        assert!(entity.get("device").is_none());
    }

    #[test]
    fn test_keys_are_unique_across_kinds_and_entities() {
        let templates = templates();
        let mut keys = HashSet::new();
        for _ in 0..500 {
            let entity = MultiContext::generate(&templates);
            keys.extend(entity.keys());
        }
        assert_eq!(keys.len(), 1000);
    }

    #[test]
    fn test_later_attribute_wins() {
        let template = ContextTemplate::new("user")
            .with_attribute("plan", "free")
            .with_attribute("plan", "pro");
        let context = Context::from_template(&template);
        assert_eq!(context.attribute("plan"), Some("pro"));
        assert_eq!(context.attributes().len(), 1);
    }

    #[test]
    fn test_multi_context_json_shape() {
        let entity = MultiContext::generate(&templates());
        let user_key = entity.get("user").unwrap().key().to_string();
        let org_key = entity.get("org").unwrap().key().to_string();

        assert_eq!(
            entity.to_json(),
            json!({
                "kind": "multi",
                "user": { "key": user_key, "country": "US" },
                "org": { "key": org_key, "tier": "gold", "region": "eu" },
            })
        );
    }
}
