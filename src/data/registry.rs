//! The closed set of entity types this client knows about

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::core::errors::{CrudError, CrudResult};

/// One registered entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Type tag, e.g. `Advert`
    pub name: String,
    /// Server endpoint; defaults to the lowercased type name
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl TypeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        TypeSpec { name: name.into(), endpoint: None }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn endpoint(&self) -> String {
        self.endpoint.clone().unwrap_or_else(|| self.name.to_lowercase())
    }
}

/// Registry of valid type tags
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeSpec>,
}

impl TypeRegistry {
    pub fn new(specs: impl IntoIterator<Item = TypeSpec>) -> Self {
        TypeRegistry {
            types: specs.into_iter().map(|spec| (spec.name.clone(), spec)).collect(),
        }
    }

    /// Look up a type, failing on anything unregistered
    pub fn check(&self, type_tag: &str) -> CrudResult<&TypeSpec> {
        self.types
            .get(type_tag)
            .ok_or_else(|| CrudError::UnknownType(type_tag.to_string()))
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.types.contains_key(type_tag)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }
}
