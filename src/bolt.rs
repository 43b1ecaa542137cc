//! Marshaling between the value model and the Bolt driver, plus connection
//! setup and the production [`BoltRunner`].
//!
//! Everything driver-specific lives here: the rest of the crate only ever
//! sees [`Value`] and friends.

use async_trait::async_trait;
use neo4rs::{BoltList, BoltMap, BoltNull, BoltType, ConfigBuilder, Graph, Query};

use crate::destination::BoltRunner;
use crate::model::{Node, OrderedMap, Relationship, Value};
use crate::{Error, Result};

// ============================================================================
// Connection setup
// ============================================================================

/// Connect to a Bolt endpoint. The pool is capped at a single connection:
/// every adapter scopes exactly one connection for its lifetime.
pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    use_ssl: bool,
) -> Result<Graph> {
    let scheme = if use_ssl { "bolt+s" } else { "bolt" };
    let uri = format!("{scheme}://{host}:{port}");
    let config = ConfigBuilder::default()
        .uri(&uri)
        .user(username)
        .password(password)
        .max_connections(1)
        .build()
        .map_err(|e| Error::Connect(format!("invalid Bolt configuration for {uri}: {e}")))?;
    Graph::connect(config)
        .await
        .map_err(|e| Error::Connect(format!("unable to connect to {uri}: {e}")))
}

// ============================================================================
// Value -> driver
// ============================================================================

/// Convert a model value into a Bolt parameter value. Graph-typed values
/// never appear in parameters: property maps carry scalars and containers
/// only.
pub fn value_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Int(i) => BoltType::from(*i),
        Value::Float(f) => BoltType::from(*f),
        Value::String(s) => BoltType::from(s.as_str()),
        Value::List(items) => {
            let list: BoltList = items.iter().map(value_to_bolt).collect::<Vec<_>>().into();
            BoltType::List(list)
        }
        Value::Map(map) => {
            let mut out = BoltMap::default();
            for (k, v) in map.iter() {
                out.put(k.into(), value_to_bolt(v));
            }
            BoltType::Map(out)
        }
        Value::Node(_) | Value::Relationship(_) | Value::UnboundRelationship(_) | Value::Path(_) => {
            BoltType::Null(BoltNull)
        }
    }
}

/// Build a parameterized query from a statement and its bound parameters.
pub fn build_query(statement: &str, params: &OrderedMap) -> Query {
    let mut query = neo4rs::query(statement);
    for (key, value) in params.iter() {
        query = query.param(key, value_to_bolt(value));
    }
    query
}

// ============================================================================
// Driver -> Value
// ============================================================================

fn shape_err(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Protocol(format!("{context}: {e}"))
}

/// Bolt properties are self-describing scalars and containers; they come
/// out of the driver as JSON-shaped values and convert losslessly (Bolt
/// integers are i64, which `serde_json` preserves).
fn json_to_value(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => {
            let mut map = OrderedMap::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert_unchecked(k, json_to_value(v));
            }
            Value::Map(map)
        }
    }
}

/// Convert a driver node into a model node.
pub fn node_from_bolt(node: &neo4rs::Node) -> Result<Node> {
    let mut properties = OrderedMap::new();
    for key in node.keys() {
        let value: serde_json::Value = node
            .get(key)
            .map_err(|e| shape_err("unexpected node property", e))?;
        properties.insert_unchecked(key, json_to_value(value));
    }
    Ok(Node {
        id: node.id(),
        labels: node.labels().into_iter().map(str::to_owned).collect(),
        properties,
    })
}

/// Convert a driver relationship into a model relationship.
pub fn relationship_from_bolt(rel: &neo4rs::Relation) -> Result<Relationship> {
    let mut properties = OrderedMap::new();
    for key in rel.keys() {
        let value: serde_json::Value = rel
            .get(key)
            .map_err(|e| shape_err("unexpected relationship property", e))?;
        properties.insert_unchecked(key, json_to_value(value));
    }
    Ok(Relationship {
        id: rel.id(),
        start: rel.start_node_id(),
        end: rel.end_node_id(),
        rel_type: rel.typ().to_owned(),
        properties,
    })
}

// ============================================================================
// BoltRunner over a live connection
// ============================================================================

/// The destination's Bolt connection. Each operation executes a statement
/// and drains its result before returning, so the connection never has more
/// than one cursor in flight.
pub struct BoltConnection {
    graph: Graph,
}

impl BoltConnection {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }
}

#[async_trait]
impl BoltRunner for BoltConnection {
    async fn run(&mut self, statement: &str, params: OrderedMap) -> Result<()> {
        let mut rows = self.graph.execute(build_query(statement, &params)).await?;
        if rows.next().await?.is_some() {
            return Err(Error::Protocol(format!(
                "unexpected data received while executing '{statement}'"
            )));
        }
        Ok(())
    }

    async fn run_returning_count(
        &mut self,
        statement: &str,
        params: OrderedMap,
        column: &str,
    ) -> Result<i64> {
        let mut rows = self.graph.execute(build_query(statement, &params)).await?;
        let row = rows.next().await?.ok_or_else(|| {
            Error::Protocol(format!("missing result row for '{statement}'"))
        })?;
        let count: i64 = row
            .get(column)
            .map_err(|e| shape_err("unexpected result while counting", e))?;
        if rows.next().await?.is_some() {
            return Err(Error::Protocol(format!(
                "more than one result row for '{statement}'"
            )));
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_to_value_number_split() {
        assert_eq!(json_to_value(serde_json::json!(3)), Value::Int(3));
        assert_eq!(json_to_value(serde_json::json!(3.5)), Value::Float(3.5));
        assert_eq!(json_to_value(serde_json::json!(null)), Value::Null);
    }

    #[test]
    fn test_json_to_value_containers() {
        let value = json_to_value(serde_json::json!([1, "a", [true]]));
        assert_eq!(
            value,
            Value::List(vec![
                Value::Int(1),
                Value::String("a".into()),
                Value::List(vec![Value::Bool(true)]),
            ])
        );
    }
}
