//! Relational schema model.
//!
//! Built once at migration start by the active relational adapter, consumed
//! by the orchestrator, then discarded. Tables are indexed by position;
//! foreign keys and constraints reference tables and columns by position.

use tracing::debug;

use crate::{Error, Result};

// ============================================================================
// Column categories
// ============================================================================

/// Coarse decode category of a relational column, classified from
/// `information_schema` type names at discovery time. Drives how row values
/// are fetched and converted; storage types beyond these categories are not
/// preserved.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnType {
    Bool,
    Int,
    Float,
    /// Character data, and any type without a recognized category (read as
    /// raw text).
    Text,
    /// One- or multi-dimensional array with the given element category.
    Array(Box<ColumnType>),
    /// JSON/document and binary columns. Discovery tolerates them; reading
    /// a table that contains one is a fatal error.
    Unsupported(String),
}

/// A column: its name and how to decode it.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
}

// ============================================================================
// Schema entities
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub schema: String,
    pub name: String,
    pub columns: Vec<Column>,
    /// Positions into `columns`.
    pub primary_key: Vec<usize>,
    /// Positions into `SchemaInfo::foreign_keys`.
    pub foreign_keys: Vec<usize>,
    /// Whether some foreign key references this table's primary key.
    pub primary_key_referenced: bool,
}

impl Table {
    /// A table becomes edges instead of nodes iff it has exactly two
    /// foreign keys and nothing references its primary key.
    pub fn is_join_table(&self) -> bool {
        self.foreign_keys.len() == 2 && !self.primary_key_referenced
    }

    pub fn column_name(&self, position: usize) -> &str {
        &self.columns[position].name
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub child_table: usize,
    pub parent_table: usize,
    /// Positions into the child table's columns.
    pub child_columns: Vec<usize>,
    /// Positions into the parent table's columns, pairwise with
    /// `child_columns`.
    pub parent_columns: Vec<usize>,
}

/// A UNIQUE or PRIMARY KEY constraint: table position plus column positions.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConstraint {
    pub table: usize,
    pub columns: Vec<usize>,
}

/// A NOT NULL column: table position plus column position.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistenceConstraint {
    pub table: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaInfo {
    /// The schema whose name is elided from labels: `public` for
    /// PostgreSQL, the connected database for MySQL.
    pub default_schema: String,
    pub tables: Vec<Table>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub existence_constraints: Vec<ExistenceConstraint>,
}

impl SchemaInfo {
    /// The table name as used for node labels and edge types.
    pub fn table_label(&self, table: &Table) -> String {
        if table.schema == self.default_schema {
            table.name.clone()
        } else {
            format!("{}_{}", table.schema, table.name)
        }
    }
}

// ============================================================================
// Ingest helpers (shared by the relational adapters)
// ============================================================================

pub(crate) fn table_index(tables: &[Table], schema: &str, name: &str) -> Option<usize> {
    tables
        .iter()
        .position(|t| t.schema == schema && t.name == name)
}

pub(crate) fn column_index(columns: &[Column], name: &str) -> Option<usize> {
    columns.iter().position(|c| c.name == name)
}

/// Resolve named key columns to positions in the table's column list.
pub(crate) fn resolve_positions(table: &Table, names: &[String]) -> Result<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            column_index(&table.columns, name).ok_or_else(|| {
                Error::Protocol(format!(
                    "couldn't find key column '{}' in table '{}'",
                    name, table.name
                ))
            })
        })
        .collect()
}

/// One row of a foreign-key listing, as both adapters produce it: grouped
/// by constraint and ordered by child ordinal.
#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyRow {
    pub constraint_schema: String,
    pub constraint_name: String,
    pub child_schema: String,
    pub child_table: String,
    pub child_column: String,
    pub parent_schema: String,
    pub parent_table: String,
    pub parent_column: String,
}

/// Fold ordered foreign-key rows into one `ForeignKey` per constraint.
/// A row naming an unknown table or column is fatal: edge construction
/// depends on every foreign key resolving.
pub(crate) fn group_foreign_keys(
    rows: &[ForeignKeyRow],
    tables: &[Table],
) -> Result<Vec<ForeignKey>> {
    let mut foreign_keys: Vec<ForeignKey> = Vec::new();
    let mut prev_key: Option<(String, String)> = None;
    for row in rows {
        let child_table =
            table_index(tables, &row.child_schema, &row.child_table).ok_or_else(|| {
                Error::Protocol(format!(
                    "foreign key '{}' references unknown table '{}.{}'",
                    row.constraint_name, row.child_schema, row.child_table
                ))
            })?;
        let parent_table =
            table_index(tables, &row.parent_schema, &row.parent_table).ok_or_else(|| {
                Error::Protocol(format!(
                    "foreign key '{}' references unknown table '{}.{}'",
                    row.constraint_name, row.parent_schema, row.parent_table
                ))
            })?;
        let child_column = column_index(&tables[child_table].columns, &row.child_column)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "foreign key '{}' references unknown column '{}'",
                    row.constraint_name, row.child_column
                ))
            })?;
        let parent_column = column_index(&tables[parent_table].columns, &row.parent_column)
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "foreign key '{}' references unknown column '{}'",
                    row.constraint_name, row.parent_column
                ))
            })?;

        let key = (row.constraint_schema.clone(), row.constraint_name.clone());
        if prev_key.as_ref() != Some(&key) {
            debug!(constraint = %row.constraint_name, "found foreign key");
            foreign_keys.push(ForeignKey {
                child_table,
                parent_table,
                child_columns: Vec::new(),
                parent_columns: Vec::new(),
            });
            prev_key = Some(key);
        }
        let current = foreign_keys.last_mut().expect("pushed above");
        current.child_columns.push(child_column);
        current.parent_columns.push(parent_column);
    }
    Ok(foreign_keys)
}

/// Register every foreign key on its child table and mark referenced
/// parents.
pub(crate) fn link_foreign_keys(tables: &mut [Table], foreign_keys: &[ForeignKey]) {
    for (id, foreign_key) in foreign_keys.iter().enumerate() {
        tables[foreign_key.child_table].foreign_keys.push(id);
        tables[foreign_key.parent_table].primary_key_referenced = true;
    }
}

/// One row of a unique-constraint listing (UNIQUE and PRIMARY KEY),
/// ordered by constraint name.
#[derive(Debug, Clone)]
pub(crate) struct UniqueRow {
    pub constraint_name: String,
    pub table_schema: String,
    pub table_name: String,
    pub column_name: String,
}

/// Fold ordered unique-constraint rows into one constraint per
/// (constraint name, table) pair. MySQL names every primary key `PRIMARY`,
/// so the name alone does not identify a constraint. Rows for tables
/// outside the discovered base-table list (views, partitions) are skipped.
pub(crate) fn group_unique_constraints(rows: &[UniqueRow], tables: &[Table]) -> Vec<UniqueConstraint> {
    let mut constraints: Vec<UniqueConstraint> = Vec::new();
    let mut prev_key: Option<(String, usize)> = None;
    for row in rows {
        let Some(table) = table_index(tables, &row.table_schema, &row.table_name) else {
            debug!(
                table = %row.table_name,
                constraint = %row.constraint_name,
                "skipping unique constraint on unknown table"
            );
            continue;
        };
        let Some(column) = column_index(&tables[table].columns, &row.column_name) else {
            debug!(
                column = %row.column_name,
                constraint = %row.constraint_name,
                "skipping unique constraint with unknown column"
            );
            continue;
        };
        let key = (row.constraint_name.clone(), table);
        if prev_key.as_ref() != Some(&key) {
            constraints.push(UniqueConstraint {
                table,
                columns: Vec::new(),
            });
            prev_key = Some(key);
        }
        constraints
            .last_mut()
            .expect("pushed above")
            .columns
            .push(column);
    }
    constraints
}

/// Resolve NOT-NULL listings to existence constraints, skipping rows for
/// unknown tables or columns (views and the like).
pub(crate) fn collect_existence_constraints(
    rows: &[(String, String, String)],
    tables: &[Table],
) -> Vec<ExistenceConstraint> {
    let mut constraints = Vec::new();
    for (schema, table_name, column_name) in rows {
        let Some(table) = table_index(tables, schema, table_name) else {
            debug!(table = %table_name, "skipping NOT NULL column of unknown table");
            continue;
        };
        let Some(column) = column_index(&tables[table].columns, column_name) else {
            debug!(column = %column_name, "skipping unknown NOT NULL column");
            continue;
        };
        constraints.push(ExistenceConstraint { table, column });
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(schema: &str, name: &str, columns: &[&str]) -> Table {
        Table {
            schema: schema.into(),
            name: name.into(),
            columns: columns
                .iter()
                .map(|c| Column {
                    name: (*c).into(),
                    ty: ColumnType::Int,
                })
                .collect(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key_referenced: false,
        }
    }

    fn fk_row(constraint: &str, child: (&str, &str), parent: (&str, &str)) -> ForeignKeyRow {
        ForeignKeyRow {
            constraint_schema: "public".into(),
            constraint_name: constraint.into(),
            child_schema: "public".into(),
            child_table: child.0.into(),
            child_column: child.1.into(),
            parent_schema: "public".into(),
            parent_table: parent.0.into(),
            parent_column: parent.1.into(),
        }
    }

    #[test]
    fn test_group_foreign_keys_by_constraint() {
        let tables = vec![
            table("public", "orders", &["id", "c1", "c2"]),
            table("public", "customers", &["k1", "k2"]),
        ];
        let rows = vec![
            fk_row("fk_a", ("orders", "c1"), ("customers", "k1")),
            fk_row("fk_a", ("orders", "c2"), ("customers", "k2")),
            fk_row("fk_b", ("orders", "c1"), ("customers", "k1")),
        ];
        let fks = group_foreign_keys(&rows, &tables).unwrap();
        assert_eq!(fks.len(), 2);
        assert_eq!(fks[0].child_columns, vec![1, 2]);
        assert_eq!(fks[0].parent_columns, vec![0, 1]);
        assert_eq!(fks[1].child_columns, vec![1]);
    }

    #[test]
    fn test_group_foreign_keys_unknown_table_is_fatal() {
        let tables = vec![table("public", "orders", &["id"])];
        let rows = vec![fk_row("fk", ("orders", "id"), ("missing", "id"))];
        assert!(group_foreign_keys(&rows, &tables).is_err());
    }

    #[test]
    fn test_link_foreign_keys_marks_referenced_parents() {
        let mut tables = vec![
            table("public", "child", &["p"]),
            table("public", "parent", &["id"]),
        ];
        let fks = vec![ForeignKey {
            child_table: 0,
            parent_table: 1,
            child_columns: vec![0],
            parent_columns: vec![0],
        }];
        link_foreign_keys(&mut tables, &fks);
        assert_eq!(tables[0].foreign_keys, vec![0]);
        assert!(tables[1].primary_key_referenced);
        assert!(!tables[0].primary_key_referenced);
    }

    #[test]
    fn test_join_table_classification() {
        let mut t = table("public", "membership", &["user_id", "group_id"]);
        t.foreign_keys = vec![0, 1];
        assert!(t.is_join_table());

        // A referenced primary key disqualifies it.
        t.primary_key_referenced = true;
        assert!(!t.is_join_table());

        // So does any foreign-key count other than two.
        let mut t = table("public", "orders", &["id"]);
        t.foreign_keys = vec![0];
        assert!(!t.is_join_table());
        t.foreign_keys = vec![0, 1, 2];
        assert!(!t.is_join_table());
    }

    #[test]
    fn test_unique_constraints_group_by_name_and_table() {
        let tables = vec![
            table("a", "t1", &["x", "y"]),
            table("a", "t2", &["x"]),
        ];
        let rows = vec![
            UniqueRow {
                constraint_name: "PRIMARY".into(),
                table_schema: "a".into(),
                table_name: "t1".into(),
                column_name: "x".into(),
            },
            UniqueRow {
                constraint_name: "PRIMARY".into(),
                table_schema: "a".into(),
                table_name: "t1".into(),
                column_name: "y".into(),
            },
            UniqueRow {
                constraint_name: "PRIMARY".into(),
                table_schema: "a".into(),
                table_name: "t2".into(),
                column_name: "x".into(),
            },
        ];
        let constraints = group_unique_constraints(&rows, &tables);
        assert_eq!(constraints.len(), 2);
        assert_eq!(constraints[0].table, 0);
        assert_eq!(constraints[0].columns, vec![0, 1]);
        assert_eq!(constraints[1].table, 1);
    }

    #[test]
    fn test_table_label_elides_default_schema() {
        let schema = SchemaInfo {
            default_schema: "public".into(),
            tables: vec![
                table("public", "users", &["id"]),
                table("audit", "log", &["id"]),
            ],
            ..Default::default()
        };
        assert_eq!(schema.table_label(&schema.tables[0]), "users");
        assert_eq!(schema.table_label(&schema.tables[1]), "audit_log");
    }
}
