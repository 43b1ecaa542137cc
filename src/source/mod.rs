//! # Source Adapters
//!
//! A family of readers (Memgraph, PostgreSQL, MySQL), each exposing a
//! uniform capability set behind two traits. The relational-only and
//! graph-only capabilities are disjoint, so they live on separate traits
//! and the orchestrator selects a strategy by source kind; there are no
//! runtime downcasts.
//!
//! Adapters are single-threaded, cursor-style readers. A cursor borrows
//! its adapter mutably, so at most one cursor is active per adapter, and a
//! cursor closes itself when it reaches the end of the result.

pub mod memgraph;
pub mod mysql;
pub mod postgres;
pub mod schema;

pub use memgraph::MemgraphSource;
pub use mysql::MysqlSource;
pub use postgres::PostgresSource;
pub use schema::{
    Column, ColumnType, ExistenceConstraint, ForeignKey, SchemaInfo, Table, UniqueConstraint,
};

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::model::{Node, Relationship, Value};
use crate::Result;

// ============================================================================
// Cursors
// ============================================================================

/// A pull-based result cursor. `next` returns `None` exactly once, at the
/// end of the result; the cursor is closed at that point.
#[async_trait]
pub trait Cursor<T>: Send {
    async fn next(&mut self) -> Result<Option<T>>;
}

// ============================================================================
// Graph-source cursor state
// ============================================================================

/// Indices read from the source graph, replayed into the destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexInfo {
    pub label: Vec<String>,
    pub label_property: Vec<(String, String)>,
}

/// Constraints read from the source graph, replayed into the destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstraintInfo {
    pub existence: Vec<(String, String)>,
    pub unique: Vec<(String, BTreeSet<String>)>,
}

// ============================================================================
// Capability traits
// ============================================================================

/// Capabilities of a graph source: stream every vertex and edge, read the
/// index and constraint catalogs.
#[async_trait]
pub trait GraphSource: Send {
    async fn nodes<'a>(&'a mut self) -> Result<Box<dyn Cursor<Node> + Send + 'a>>;

    async fn relationships<'a>(
        &'a mut self,
    ) -> Result<Box<dyn Cursor<Relationship> + Send + 'a>>;

    async fn indices(&mut self) -> Result<IndexInfo>;

    async fn constraints(&mut self) -> Result<ConstraintInfo>;
}

/// Capabilities of a relational source: introspect the schema once, then
/// stream table rows. Each row is an ordered list of values, one entry per
/// column in `table.columns`; SQL `NULL` becomes `Value::Null`.
#[async_trait]
pub trait RelationalSource: Send {
    async fn schema_info(&mut self) -> Result<SchemaInfo>;

    async fn table_rows<'a>(
        &'a mut self,
        table: &Table,
    ) -> Result<Box<dyn Cursor<Vec<Value>> + Send + 'a>>;
}
