//! Type metadata declared up front.
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::traits::TypeMetadataProvider;
use crate::types::TypeMetadata;

/// Fixed type metadata per logical cache, typically deserialized from a configuration document:
///
/// ```json
/// {
///   "default": [ { "key_type": "PersonKey", "value_type": "Person", "table": "person", ... } ],
///   "caches": { "orders": [ ... ] }
/// }
/// ```
///
/// A cache without its own list gets an empty one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StaticTypeMetadata {
    /// Types of the unnamed cache.
    #[serde(default)]
    pub default: Vec<TypeMetadata>,

    #[serde(default)]
    pub caches: HashMap<String, Vec<TypeMetadata>>,
}

impl StaticTypeMetadata {
    pub fn from_default(types: Vec<TypeMetadata>) -> Self {
        Self {
            default: types,
            caches:  HashMap::new(),
        }
    }

    pub fn with_cache<S: Into<String>>(mut self, cache_name: S, types: Vec<TypeMetadata>) -> Self {
        self.caches.insert(cache_name.into(), types);
        self
    }

    pub fn types(&self, cache_name: Option<&str>) -> &[TypeMetadata] {
        match cache_name {
            None => &self.default,
            Some(name) => self.caches.get(name).map(Vec::as_slice).unwrap_or_default(),
        }
    }
}

#[async_trait]
impl TypeMetadataProvider for StaticTypeMetadata {
    async fn type_metadata(&self, cache_name: Option<&str>) -> Result<Vec<TypeMetadata>> {
        Ok(self.types(cache_name).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DbType;

    #[tokio::test]
    async fn metadata_from_document() {
        let doc = r#"{
            "caches": {
                "people": [{
                    "key_type": "PersonKey",
                    "value_type": "Person",
                    "table": "person",
                    "key_fields": [{ "field": "id", "column": "id", "db_type": "integer" }],
                    "value_fields": [{ "field": "name", "column": "name", "db_type": "text" }]
                }]
            }
        }"#;

        let provider: StaticTypeMetadata = serde_json::from_str(doc).unwrap();
        let people = provider.type_metadata(Some("people")).await.unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].schema, "");
        assert_eq!(people[0].key_fields[0].db_type, DbType::Integer);
        assert!(provider.type_metadata(None).await.unwrap().is_empty());
        assert!(provider.type_metadata(Some("nobody")).await.unwrap().is_empty());
    }
}
