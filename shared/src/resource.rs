//! Resource references and the catalog that hands them out
//!
//! Resources (maps, skins, sounds) are served to clients out of band; on the
//! wire only their numeric id travels.

use crate::error::CodecError;
use crate::value::{TypeDescriptor, Value, WireType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: i64,
    pub version: i64,
}

impl ResourceRef {
    pub fn new(id: i64, version: i64) -> Self {
        Self { id, version }
    }
}

impl WireType for ResourceRef {
    fn descriptor() -> TypeDescriptor {
        TypeDescriptor::Resource
    }

    fn to_value(&self) -> Value {
        Value::Resource(self.id)
    }

    fn from_value(value: Value) -> Result<Self, CodecError> {
        match value {
            Value::Resource(id) => Ok(Self { id, version: 0 }),
            other => Err(other.mismatch("Resource")),
        }
    }
}

/// Looks resources up by name and namespace filters
///
/// A namespace filter matches an entry only when the entry carries the same
/// key with the same value; an empty filter matches any entry of that name.
pub trait ResourceCatalog: Send + Sync {
    fn find(&self, name: &str, namespaces: &[(&str, &str)]) -> Option<ResourceRef>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read resource catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid resource catalog: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
    pub id: i64,
    #[serde(default)]
    pub version: i64,
}

impl CatalogEntry {
    fn matches(&self, name: &str, namespaces: &[(&str, &str)]) -> bool {
        self.name == name
            && namespaces
                .iter()
                .all(|(key, value)| self.namespaces.get(*key).map(String::as_str) == Some(*value))
    }
}

/// Catalog backed by a JSON document of the form
/// `{"resources": [{"name": ..., "namespaces": {...}, "id": ..., "version": ...}]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonResourceCatalog {
    #[serde(default)]
    pub resources: Vec<CatalogEntry>,
}

impl JsonResourceCatalog {
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl ResourceCatalog for JsonResourceCatalog {
    fn find(&self, name: &str, namespaces: &[(&str, &str)]) -> Option<ResourceRef> {
        self.resources
            .iter()
            .find(|entry| entry.matches(name, namespaces))
            .map(|entry| ResourceRef::new(entry.id, entry.version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"{
        "resources": [
            {"name": "map.sandbox", "namespaces": {"gen": "1.0"}, "id": 100, "version": 3},
            {"name": "map.sandbox", "namespaces": {"gen": "2.0"}, "id": 101},
            {"name": "sound.shot", "id": 7, "version": 1}
        ]
    }"#;

    #[test]
    fn test_find_by_namespace() {
        let catalog = JsonResourceCatalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(
            catalog.find("map.sandbox", &[("gen", "2.0")]),
            Some(ResourceRef::new(101, 0))
        );
        assert_eq!(
            catalog.find("map.sandbox", &[]),
            Some(ResourceRef::new(100, 3))
        );
        assert_eq!(catalog.find("map.sandbox", &[("gen", "3.0")]), None);
        assert_eq!(catalog.find("sound.shot", &[]), Some(ResourceRef::new(7, 1)));
    }

    #[test]
    fn test_invalid_catalog() {
        assert!(matches!(
            JsonResourceCatalog::from_json("{\"resources\": 5}"),
            Err(CatalogError::Json(_))
        ));
    }

    #[test]
    fn test_wire_value_is_id_only() {
        assert_eq!(ResourceRef::new(9, 4).to_value(), Value::Resource(9));
    }
}
