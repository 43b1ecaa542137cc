//! # Destination Writer
//!
//! A thin, synchronous query emitter over the Bolt client: it builds
//! parameterized openCypher statements for node/edge creation, index and
//! constraint management, and scaffolding teardown. It does not interpret
//! results; it asserts their shape.
//!
//! Rendering discipline:
//! - Identifiers (labels, relationship types, property keys) are wrapped in
//!   backticks with embedded backticks doubled. The internal scaffolding
//!   names are emitted verbatim.
//! - Matcher maps are rendered inline as Cypher literals; payload
//!   properties are bound as `$p0, $p1, ...` parameters, numbered fresh per
//!   statement in emission order.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use async_trait::async_trait;

use crate::model::{OrderedMap, Value};
use crate::Result;

/// Label carried by every node created during a graph-to-graph migration,
/// so relationship writes can address nodes by source identity. Removed at
/// teardown.
pub const INTERNAL_VERTEX_LABEL: &str = "__mg_vertex__";

/// Property holding the source-side node identity during migration.
/// Removed at teardown.
pub const INTERNAL_ID_PROPERTY: &str = "__mg_id__";

// ============================================================================
// BoltRunner Trait
// ============================================================================

/// The contract between the writer and the Bolt connection.
///
/// Both operations execute a statement and fully drain its result before
/// returning, so the connection never has more than one cursor in flight.
/// Tests substitute a recording implementation.
#[async_trait]
pub trait BoltRunner: Send {
    /// Execute a statement that must not produce rows.
    async fn run(&mut self, statement: &str, params: OrderedMap) -> Result<()>;

    /// Execute a statement that must produce exactly one row holding a
    /// single integer in the named column, and return that integer.
    async fn run_returning_count(
        &mut self,
        statement: &str,
        params: OrderedMap,
        column: &str,
    ) -> Result<i64>;
}

// ============================================================================
// Identifier and literal rendering
// ============================================================================

/// Escape a label, edge type or property name by wrapping it in backticks
/// and doubling any embedded backtick. The internal scaffolding names are
/// trusted compile-time constants and pass through unquoted.
fn write_name(out: &mut String, name: &str) {
    if name == INTERNAL_VERTEX_LABEL || name == INTERNAL_ID_PROPERTY {
        out.push_str(name);
        return;
    }
    out.push('`');
    for c in name.chars() {
        if c == '`' {
            out.push_str("``");
        } else {
            out.push(c);
        }
    }
    out.push('`');
}

/// Render a value as a Cypher literal. Used for matcher values, which must
/// appear inline so the `$p` counter is reserved for payload properties.
fn write_literal(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Float(f) => {
            let _ = write!(out, "{f:?}");
        }
        Value::String(s) => {
            out.push('\'');
            for c in s.chars() {
                match c {
                    '\\' => out.push_str("\\\\"),
                    '\'' => out.push_str("\\'"),
                    _ => out.push(c),
                }
            }
            out.push('\'');
        }
        Value::List(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_literal(out, item);
            }
            out.push(']');
        }
        Value::Map(map) => {
            out.push('{');
            for (i, (k, v)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_name(out, k);
                out.push_str(": ");
                write_literal(out, v);
            }
            out.push('}');
        }
        // Graph values never reach a statement; property maps are scalar
        // and container values only.
        _ => out.push_str("null"),
    }
}

// ============================================================================
// ParamsBuilder
// ============================================================================

/// Assigns `$p0, $p1, ...` names to payload values in emission order and
/// collects the bound parameter map for the statement.
struct ParamsBuilder {
    counter: usize,
    params: OrderedMap,
}

impl ParamsBuilder {
    fn new() -> Self {
        Self {
            counter: 0,
            params: OrderedMap::new(),
        }
    }

    /// Bind `value` to a fresh parameter and return its '$'-prefixed name.
    fn create(&mut self, value: &Value) -> String {
        let key = format!("p{}", self.counter);
        self.counter += 1;
        // Keys are generated sequentially and cannot collide.
        self.params.insert_unchecked(key.clone(), value.clone());
        format!("${key}")
    }

    fn finish(self) -> OrderedMap {
        self.params
    }
}

/// Write `{k: $p0, ...}`. An `__mg_id__` entry is rendered inline instead
/// of bound: it is matcher scaffolding, not payload.
fn write_properties(out: &mut String, params: &mut ParamsBuilder, properties: &OrderedMap) {
    out.push('{');
    for (i, (key, value)) in properties.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_name(out, key);
        out.push_str(": ");
        if key == INTERNAL_ID_PROPERTY {
            write_literal(out, value);
        } else {
            out.push_str(&params.create(value));
        }
    }
    out.push('}');
}

/// Write `node.k = <literal> AND node.k2 = <literal> ...` for a matcher map.
fn write_id_matcher(out: &mut String, node: &str, id_properties: &OrderedMap) {
    for (i, (key, value)) in id_properties.iter().enumerate() {
        if i > 0 {
            out.push_str(" AND ");
        }
        out.push_str(node);
        out.push('.');
        write_name(out, key);
        out.push_str(" = ");
        write_literal(out, value);
    }
}

// ============================================================================
// Destination
// ============================================================================

/// The destination writer. Owns the single Bolt connection for the
/// lifetime of the migration.
pub struct Destination<R> {
    runner: R,
}

impl<R: BoltRunner> Destination<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Access the underlying runner (for advanced use and inspection).
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// `CREATE (u:L1:L2 {k: $p0, ...});`
    pub async fn create_node(&mut self, labels: &[String], properties: &OrderedMap) -> Result<()> {
        let mut params = ParamsBuilder::new();
        let mut stmt = String::from("CREATE (u");
        for label in labels {
            stmt.push(':');
            write_name(&mut stmt, label);
        }
        stmt.push(' ');
        write_properties(&mut stmt, &mut params, properties);
        stmt.push_str(");");
        self.runner.run(&stmt, params.finish()).await
    }

    /// `MATCH (u:L1), (v:L2) WHERE <id1 on u> AND <id2 on v>
    ///  CREATE|MERGE (u)-[:T {...}]->(v) RETURN COUNT(u);`
    ///
    /// Returns the count reported by the destination. Callers using
    /// `CREATE` expect exactly one; `MERGE` callers accept any count.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_relationships(
        &mut self,
        label1: &str,
        id1: &OrderedMap,
        label2: &str,
        id2: &OrderedMap,
        edge_type: &str,
        properties: &OrderedMap,
        use_merge: bool,
    ) -> Result<i64> {
        let mut params = ParamsBuilder::new();
        let mut stmt = String::from("MATCH (u:");
        write_name(&mut stmt, label1);
        stmt.push_str("), (v:");
        write_name(&mut stmt, label2);
        stmt.push_str(") WHERE ");
        write_id_matcher(&mut stmt, "u", id1);
        stmt.push_str(" AND ");
        write_id_matcher(&mut stmt, "v", id2);
        stmt.push_str(if use_merge { " MERGE " } else { " CREATE " });
        stmt.push_str("(u)-[:");
        write_name(&mut stmt, edge_type);
        if !properties.is_empty() {
            stmt.push(' ');
            write_properties(&mut stmt, &mut params, properties);
        }
        stmt.push_str("]->(v) RETURN COUNT(u);");
        self.runner
            .run_returning_count(&stmt, params.finish(), "COUNT(u)")
            .await
    }

    /// `CREATE INDEX ON :L;`
    pub async fn create_label_index(&mut self, label: &str) -> Result<()> {
        let mut stmt = String::from("CREATE INDEX ON :");
        write_name(&mut stmt, label);
        stmt.push(';');
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `CREATE INDEX ON :L(p);`
    pub async fn create_label_property_index(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<()> {
        let mut stmt = String::from("CREATE INDEX ON :");
        write_name(&mut stmt, label);
        stmt.push('(');
        write_name(&mut stmt, property);
        stmt.push_str(");");
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `DROP INDEX ON :L;`
    pub async fn drop_label_index(&mut self, label: &str) -> Result<()> {
        let mut stmt = String::from("DROP INDEX ON :");
        write_name(&mut stmt, label);
        stmt.push(';');
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `DROP INDEX ON :L(p);`
    pub async fn drop_label_property_index(&mut self, label: &str, property: &str) -> Result<()> {
        let mut stmt = String::from("DROP INDEX ON :");
        write_name(&mut stmt, label);
        stmt.push('(');
        write_name(&mut stmt, property);
        stmt.push_str(");");
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `CREATE CONSTRAINT ON (u:L) ASSERT EXISTS (u.p);`
    pub async fn create_existence_constraint(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<()> {
        let mut stmt = String::from("CREATE CONSTRAINT ON (u:");
        write_name(&mut stmt, label);
        stmt.push_str(") ASSERT EXISTS (u.");
        write_name(&mut stmt, property);
        stmt.push_str(");");
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `CREATE CONSTRAINT ON (u:L) ASSERT u.p1, u.p2 IS UNIQUE;`
    pub async fn create_unique_constraint(
        &mut self,
        label: &str,
        properties: &BTreeSet<String>,
    ) -> Result<()> {
        let mut stmt = String::from("CREATE CONSTRAINT ON (u:");
        write_name(&mut stmt, label);
        stmt.push_str(") ASSERT ");
        for (i, property) in properties.iter().enumerate() {
            if i > 0 {
                stmt.push_str(", ");
            }
            stmt.push_str("u.");
            write_name(&mut stmt, property);
        }
        stmt.push_str(" IS UNIQUE;");
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `MATCH (u) REMOVE u:L;` — scaffolding teardown.
    pub async fn remove_label_from_nodes(&mut self, label: &str) -> Result<()> {
        let mut stmt = String::from("MATCH (u) REMOVE u:");
        write_name(&mut stmt, label);
        stmt.push(';');
        self.runner.run(&stmt, OrderedMap::new()).await
    }

    /// `MATCH (u) REMOVE u.p;` — scaffolding teardown.
    pub async fn remove_property_from_nodes(&mut self, property: &str) -> Result<()> {
        let mut stmt = String::from("MATCH (u) REMOVE u.");
        write_name(&mut stmt, property);
        stmt.push(';');
        self.runner.run(&stmt, OrderedMap::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every statement with its bound parameters and answers edge
    /// creations with a scripted count.
    struct RecordingRunner {
        statements: Vec<(String, OrderedMap)>,
        count: i64,
    }

    impl RecordingRunner {
        fn new() -> Self {
            Self {
                statements: Vec::new(),
                count: 1,
            }
        }
    }

    #[async_trait]
    impl BoltRunner for RecordingRunner {
        async fn run(&mut self, statement: &str, params: OrderedMap) -> Result<()> {
            self.statements.push((statement.to_owned(), params));
            Ok(())
        }

        async fn run_returning_count(
            &mut self,
            statement: &str,
            params: OrderedMap,
            _column: &str,
        ) -> Result<i64> {
            self.statements.push((statement.to_owned(), params));
            Ok(self.count)
        }
    }

    fn props(entries: &[(&str, Value)]) -> OrderedMap {
        let mut map = OrderedMap::new();
        for (k, v) in entries {
            map.insert_unchecked(*k, v.clone());
        }
        map
    }

    #[tokio::test]
    async fn test_create_node_statement() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_node(
            &["__mg_vertex__".into(), "person".into()],
            &props(&[
                ("__mg_id__", Value::Int(7)),
                ("name", Value::String("Ada".into())),
            ]),
        )
        .await
        .unwrap();

        let (stmt, params) = &dest.runner.statements[0];
        assert_eq!(
            stmt,
            "CREATE (u:__mg_vertex__:`person` {__mg_id__: 7, `name`: $p0});"
        );
        assert_eq!(params.get("p0"), Some(&Value::String("Ada".into())));
        assert_eq!(params.len(), 1);
    }

    #[tokio::test]
    async fn test_create_node_without_properties() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_node(&["t".into()], &OrderedMap::new())
            .await
            .unwrap();
        assert_eq!(dest.runner.statements[0].0, "CREATE (u:`t` {});");
    }

    #[tokio::test]
    async fn test_create_relationships_statement() {
        let mut dest = Destination::new(RecordingRunner::new());
        let count = dest
            .create_relationships(
                "__mg_vertex__",
                &props(&[("__mg_id__", Value::Int(1))]),
                "__mg_vertex__",
                &props(&[("__mg_id__", Value::Int(2))]),
                "KNOWS",
                &props(&[("since", Value::Int(1999))]),
                false,
            )
            .await
            .unwrap();

        assert_eq!(count, 1);
        let (stmt, params) = &dest.runner.statements[0];
        assert_eq!(
            stmt,
            "MATCH (u:__mg_vertex__), (v:__mg_vertex__) \
             WHERE u.__mg_id__ = 1 AND v.__mg_id__ = 2 \
             CREATE (u)-[:`KNOWS` {`since`: $p0}]->(v) RETURN COUNT(u);"
        );
        assert_eq!(params.get("p0"), Some(&Value::Int(1999)));
    }

    #[tokio::test]
    async fn test_create_relationships_merge_without_properties() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_relationships(
            "a",
            &props(&[("x", Value::Int(1)), ("y", Value::String("s'".into()))]),
            "b",
            &props(&[("z", Value::Bool(true))]),
            "a_to_b",
            &OrderedMap::new(),
            true,
        )
        .await
        .unwrap();

        assert_eq!(
            dest.runner.statements[0].0,
            "MATCH (u:`a`), (v:`b`) \
             WHERE u.`x` = 1 AND u.`y` = 's\\'' AND v.`z` = true \
             MERGE (u)-[:`a_to_b`]->(v) RETURN COUNT(u);"
        );
        assert!(dest.runner.statements[0].1.is_empty());
    }

    #[tokio::test]
    async fn test_index_statements() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_label_index("label1").await.unwrap();
        dest.create_label_property_index("label1", "prop2").await.unwrap();
        dest.create_label_property_index("label `1`", "prop 3").await.unwrap();
        dest.drop_label_index("label1").await.unwrap();
        dest.drop_label_property_index("label1", "prop2").await.unwrap();

        let stmts: Vec<_> = dest.runner.statements.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            stmts,
            vec![
                "CREATE INDEX ON :`label1`;",
                "CREATE INDEX ON :`label1`(`prop2`);",
                "CREATE INDEX ON :`label ``1```(`prop 3`);",
                "DROP INDEX ON :`label1`;",
                "DROP INDEX ON :`label1`(`prop2`);",
            ]
        );
    }

    #[tokio::test]
    async fn test_escaping_doubles_backticks() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_label_index("`weird`").await.unwrap();
        assert_eq!(
            dest.runner.statements[0].0,
            "CREATE INDEX ON :```weird```;"
        );
    }

    #[tokio::test]
    async fn test_constraint_statements() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.create_existence_constraint("label`1`", "prop1").await.unwrap();
        dest.create_unique_constraint("label1", &BTreeSet::from(["prop 1".to_owned()]))
            .await
            .unwrap();
        dest.create_unique_constraint(
            "label1",
            &BTreeSet::from(["prop2".to_owned(), "prop1".to_owned()]),
        )
        .await
        .unwrap();

        let stmts: Vec<_> = dest.runner.statements.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            stmts,
            vec![
                "CREATE CONSTRAINT ON (u:`label``1```) ASSERT EXISTS (u.`prop1`);",
                "CREATE CONSTRAINT ON (u:`label1`) ASSERT u.`prop 1` IS UNIQUE;",
                "CREATE CONSTRAINT ON (u:`label1`) ASSERT u.`prop1`, u.`prop2` IS UNIQUE;",
            ]
        );
    }

    #[tokio::test]
    async fn test_teardown_statements() {
        let mut dest = Destination::new(RecordingRunner::new());
        dest.remove_label_from_nodes(INTERNAL_VERTEX_LABEL).await.unwrap();
        dest.remove_property_from_nodes(INTERNAL_ID_PROPERTY).await.unwrap();

        let stmts: Vec<_> = dest.runner.statements.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(
            stmts,
            vec![
                "MATCH (u) REMOVE u:__mg_vertex__;",
                "MATCH (u) REMOVE u.__mg_id__;",
            ]
        );
    }
}
