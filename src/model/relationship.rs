//! Relationship (edge) in the property graph.

use super::{OrderedMap, Value};

/// A directed edge between two nodes, addressed by source-side identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: i64,
    pub start: i64,
    pub end: i64,
    pub rel_type: String,
    pub properties: OrderedMap,
}

impl Relationship {
    pub fn new(id: i64, start: i64, end: i64, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            start,
            end,
            rel_type: rel_type.into(),
            properties: OrderedMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A relationship without endpoint identities, as it appears inside a
/// [`Path`](super::Path).
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    pub id: i64,
    pub rel_type: String,
    pub properties: OrderedMap,
}

impl UnboundRelationship {
    pub fn new(id: i64, rel_type: impl Into<String>) -> Self {
        Self {
            id,
            rel_type: rel_type.into(),
            properties: OrderedMap::new(),
        }
    }
}
