//! Shared test doubles: a recording destination runner and scripted
//! sources. These stand in for the live drivers exactly at the trait
//! seams the production code uses.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;

use async_trait::async_trait;

use graft::destination::BoltRunner;
use graft::model::{Node, OrderedMap, Relationship, Value};
use graft::source::{
    Column, ColumnType, ConstraintInfo, Cursor, ForeignKey, GraphSource, IndexInfo,
    RelationalSource, SchemaInfo, Table,
};
use graft::Result;

// ============================================================================
// Recording destination
// ============================================================================

pub type Statement = (String, OrderedMap);

/// Saves every statement that was supposed to be executed, together with
/// its bound parameters. Counting statements answer with `count`.
pub struct RecordingRunner {
    pub statements: Vec<Statement>,
    pub count: i64,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self {
            statements: Vec::new(),
            count: 1,
        }
    }

    pub fn with_count(count: i64) -> Self {
        Self {
            statements: Vec::new(),
            count,
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        self.statements.iter().map(|(s, _)| s.as_str()).collect()
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

// ============================================================================
// Scripted cursors and sources
// ============================================================================

pub struct VecCursor<T> {
    items: std::vec::IntoIter<T>,
}

impl<T> VecCursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

#[async_trait]
impl<T: Send> Cursor<T> for VecCursor<T> {
    async fn next(&mut self) -> Result<Option<T>> {
        Ok(self.items.next())
    }
}

#[derive(Default)]
pub struct FakeGraphSource {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    pub index_info: IndexInfo,
    pub constraint_info: ConstraintInfo,
}

#[async_trait]
impl GraphSource for FakeGraphSource {
    async fn nodes<'a>(&'a mut self) -> Result<Box<dyn Cursor<Node> + Send + 'a>> {
        Ok(Box::new(VecCursor::new(self.nodes.clone())))
    }

    async fn relationships<'a>(
        &'a mut self,
    ) -> Result<Box<dyn Cursor<Relationship> + Send + 'a>> {
        Ok(Box::new(VecCursor::new(self.relationships.clone())))
    }

    async fn indices(&mut self) -> Result<IndexInfo> {
        Ok(self.index_info.clone())
    }

    async fn constraints(&mut self) -> Result<ConstraintInfo> {
        Ok(self.constraint_info.clone())
    }
}

pub struct FakeRelationalSource {
    pub schema: SchemaInfo,
    /// Rows per table name.
    pub rows: HashMap<String, Vec<Vec<Value>>>,
}

impl FakeRelationalSource {
    pub fn new(schema: SchemaInfo) -> Self {
        Self {
            schema,
            rows: HashMap::new(),
        }
    }

    pub fn with_rows(mut self, table: &str, rows: Vec<Vec<Value>>) -> Self {
        self.rows.insert(table.to_owned(), rows);
        self
    }
}

#[async_trait]
impl RelationalSource for FakeRelationalSource {
    async fn schema_info(&mut self) -> Result<SchemaInfo> {
        Ok(self.schema.clone())
    }

    async fn table_rows<'a>(
        &'a mut self,
        table: &Table,
    ) -> Result<Box<dyn Cursor<Vec<Value>> + Send + 'a>> {
        let rows = self.rows.get(&table.name).cloned().unwrap_or_default();
        Ok(Box::new(VecCursor::new(rows)))
    }
}

// ============================================================================
// Schema fixture helpers
// ============================================================================

pub fn table(schema: &str, name: &str, columns: &[&str], primary_key: &[usize]) -> Table {
    Table {
        schema: schema.into(),
        name: name.into(),
        columns: columns
            .iter()
            .map(|c| Column {
                name: (*c).into(),
                ty: ColumnType::Text,
            })
            .collect(),
        primary_key: primary_key.to_vec(),
        foreign_keys: Vec::new(),
        primary_key_referenced: false,
    }
}

pub fn foreign_key(
    child_table: usize,
    parent_table: usize,
    child_columns: &[usize],
    parent_columns: &[usize],
) -> ForeignKey {
    ForeignKey {
        child_table,
        parent_table,
        child_columns: child_columns.to_vec(),
        parent_columns: parent_columns.to_vec(),
    }
}

/// Wire up table/foreign-key cross references the way the adapters do
/// after ingest.
pub fn link(schema: &mut SchemaInfo) {
    for (id, fk) in schema.foreign_keys.clone().into_iter().enumerate() {
        schema.tables[fk.child_table].foreign_keys.push(id);
        schema.tables[fk.parent_table].primary_key_referenced = true;
    }
}
