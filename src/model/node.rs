//! Node in the property graph.

use super::{OrderedMap, Value};

/// A node read from the source graph.
///
/// The identity is the source database's internal int64. It is opaque to
/// the migration, only ever echoed back into matcher maps, and is never
/// persisted in the destination.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: i64,
    pub labels: Vec<String>,
    pub properties: OrderedMap,
}

impl Node {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            labels: Vec::new(),
            properties: OrderedMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

/// Label order is irrelevant for equality; property order likewise (via
/// `OrderedMap`'s equality).
impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.labels.len() == other.labels.len()
            && self.labels.iter().all(|l| other.has_label(l))
            && other.labels.iter().all(|l| self.has_label(l))
            && self.properties == other.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_is_irrelevant() {
        let a = Node::new(1).with_labels(["x", "y"]).with_property("p", 1i64);
        let b = Node::new(1).with_labels(["y", "x"]).with_property("p", 1i64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_and_labels_matter() {
        let a = Node::new(1).with_labels(["x"]);
        assert_ne!(a, Node::new(2).with_labels(["x"]));
        assert_ne!(a, Node::new(1).with_labels(["x", "y"]));
    }
}
