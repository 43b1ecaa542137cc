//! MySQL source adapter.
//!
//! Schema discovery walks `information_schema`, excluding the MySQL system
//! schemas. Row streaming uses the driver's native streaming fetch. Values
//! arrive through per-category `CAST`s (`SIGNED`, `DOUBLE`, `CHAR`);
//! `tinyint(1)` is recognized as boolean.

use std::pin::Pin;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{Connection, Row};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::model::Value;
use crate::source::schema::{self, Column, ColumnType, SchemaInfo, Table};
use crate::source::{Cursor, RelationalSource};
use crate::{Error, Result};

/// Schemas that are never migrated.
const SCHEMA_BLACKLIST: &str = "('information_schema', 'sys', 'mysql', 'performance_schema')";

type RowStream<'a> = Pin<Box<dyn Stream<Item = sqlx::Result<MySqlRow>> + Send + 'a>>;

pub struct MysqlSource {
    conn: MySqlConnection,
    database: String,
    /// The SELECT currently being streamed. Kept on the adapter because the
    /// row stream borrows the statement text for its whole lifetime.
    active_select: String,
}

impl MysqlSource {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        database: &str,
    ) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(host)
            .port(port)
            .username(username)
            .password(password)
            .database(database);
        let conn = MySqlConnection::connect_with(&options).await.map_err(|e| {
            Error::Connect(format!("unable to connect to MySQL server: {e}"))
        })?;
        Ok(Self {
            conn,
            database: database.to_owned(),
            active_select: String::new(),
        })
    }

    async fn list_tables(&mut self) -> Result<Vec<(String, String)>> {
        let statement = format!(
            "SELECT table_schema, table_name \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND table_schema NOT IN {SCHEMA_BLACKLIST} \
             ORDER BY table_schema, table_name"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
        if rows.is_empty() {
            warn!("no tables found in the database");
        }
        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let table_schema: String = row.try_get(0)?;
            let table_name: String = row.try_get(1)?;
            debug!(schema = %table_schema, table = %table_name, "found table");
            tables.push((table_schema, table_name));
        }
        Ok(tables)
    }

    async fn list_columns(&mut self, table_schema: &str, table_name: &str) -> Result<Vec<Column>> {
        let rows = sqlx::query(
            "SELECT column_name, data_type, column_type \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? \
             ORDER BY ordinal_position",
        )
        .bind(table_schema)
        .bind(table_name)
        .fetch_all(&mut self.conn)
        .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let data_type: String = row.try_get(1)?;
            let column_type: String = row.try_get(2)?;
            if data_type.eq_ignore_ascii_case("bigint")
                && column_type.to_ascii_lowercase().contains("unsigned")
            {
                warn!(
                    column = %name,
                    table = %table_name,
                    "unsigned bigint values are narrowed to signed integers"
                );
            }
            debug!(column = %name, ty = %column_type, "found column");
            columns.push(Column {
                ty: classify_column(&data_type, &column_type),
                name,
            });
        }
        Ok(columns)
    }

    async fn list_primary_key(
        &mut self,
        table_schema: &str,
        table_name: &str,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT kcu.column_name \
             FROM information_schema.table_constraints AS tc \
             JOIN information_schema.key_column_usage AS kcu \
               USING (constraint_schema, constraint_name, table_name) \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = ? AND tc.table_name = ? \
             ORDER BY kcu.ordinal_position",
        )
        .bind(table_schema)
        .bind(table_name)
        .fetch_all(&mut self.conn)
        .await?;
        if rows.is_empty() {
            warn!(table = %table_name, "no primary key found");
        }
        rows.into_iter()
            .map(|row| row.try_get::<String, _>(0).map_err(Error::from))
            .collect()
    }

    async fn list_foreign_keys(&mut self) -> Result<Vec<schema::ForeignKeyRow>> {
        let statement = format!(
            "SELECT \
               constraints.constraint_schema, \
               constraints.constraint_name, \
               child.table_schema, \
               child.table_name, \
               child.column_name, \
               child.referenced_table_schema, \
               child.referenced_table_name, \
               child.referenced_column_name \
             FROM \
               information_schema.referential_constraints AS constraints \
               JOIN information_schema.key_column_usage AS child \
                 USING (constraint_schema, constraint_name) \
             WHERE constraints.constraint_schema NOT IN {SCHEMA_BLACKLIST} \
               AND child.table_schema NOT IN {SCHEMA_BLACKLIST} \
               AND child.referenced_table_name IS NOT NULL \
             ORDER BY constraints.constraint_schema, constraints.constraint_name, \
                      child.ordinal_position"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
        if rows.is_empty() {
            warn!("no foreign keys found");
        }
        rows.into_iter()
            .map(|row| {
                Ok(schema::ForeignKeyRow {
                    constraint_schema: row.try_get(0)?,
                    constraint_name: row.try_get(1)?,
                    child_schema: row.try_get(2)?,
                    child_table: row.try_get(3)?,
                    child_column: row.try_get(4)?,
                    parent_schema: row.try_get(5)?,
                    parent_table: row.try_get(6)?,
                    parent_column: row.try_get(7)?,
                })
            })
            .collect()
    }

    async fn list_not_null_columns(&mut self) -> Result<Vec<(String, String, String)>> {
        let statement = format!(
            "SELECT table_schema, table_name, column_name \
             FROM information_schema.columns \
             WHERE is_nullable = 'NO' AND table_schema NOT IN {SCHEMA_BLACKLIST}"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
        rows.into_iter()
            .map(|row| Ok((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?)))
            .collect()
    }

    async fn list_unique_constraints(&mut self) -> Result<Vec<schema::UniqueRow>> {
        let statement = format!(
            "SELECT tc.constraint_name, tc.table_schema, tc.table_name, kcu.column_name \
             FROM \
               information_schema.table_constraints AS tc \
               JOIN information_schema.key_column_usage AS kcu \
                 USING (constraint_name, table_schema, table_name) \
             WHERE tc.constraint_type IN ('UNIQUE', 'PRIMARY KEY') \
               AND tc.table_schema NOT IN {SCHEMA_BLACKLIST} \
             ORDER BY tc.constraint_name, tc.table_schema, tc.table_name"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
        rows.into_iter()
            .map(|row| {
                Ok(schema::UniqueRow {
                    constraint_name: row.try_get(0)?,
                    table_schema: row.try_get(1)?,
                    table_name: row.try_get(2)?,
                    column_name: row.try_get(3)?,
                })
            })
            .collect()
    }
}

// ============================================================================
// RelationalSource
// ============================================================================

#[async_trait]
impl RelationalSource for MysqlSource {
    async fn schema_info(&mut self) -> Result<SchemaInfo> {
        let table_names = self.list_tables().await?;
        let mut tables = Vec::with_capacity(table_names.len());
        for (table_schema, table_name) in table_names {
            let columns = self.list_columns(&table_schema, &table_name).await?;
            let key_columns = self.list_primary_key(&table_schema, &table_name).await?;
            let mut table = Table {
                schema: table_schema,
                name: table_name,
                columns,
                primary_key: Vec::new(),
                foreign_keys: Vec::new(),
                primary_key_referenced: false,
            };
            table.primary_key = schema::resolve_positions(&table, &key_columns)?;
            tables.push(table);
        }

        let fk_rows = self.list_foreign_keys().await?;
        let foreign_keys = schema::group_foreign_keys(&fk_rows, &tables)?;
        schema::link_foreign_keys(&mut tables, &foreign_keys);

        let not_null = self.list_not_null_columns().await?;
        let existence_constraints = schema::collect_existence_constraints(&not_null, &tables);
        let unique_rows = self.list_unique_constraints().await?;
        let unique_constraints = schema::group_unique_constraints(&unique_rows, &tables);

        Ok(SchemaInfo {
            default_schema: self.database.clone(),
            tables,
            foreign_keys,
            unique_constraints,
            existence_constraints,
        })
    }

    async fn table_rows<'a>(
        &'a mut self,
        table: &Table,
    ) -> Result<Box<dyn Cursor<Vec<Value>> + Send + 'a>> {
        for column in &table.columns {
            if let ColumnType::Unsupported(kind) = &column.ty {
                return Err(Error::Protocol(format!(
                    "column '{}' of table '{}' has unsupported type '{}'",
                    column.name, table.name, kind
                )));
            }
        }
        debug!(schema = %table.schema, table = %table.name, "reading table");
        self.active_select = build_select(table);
        // Split borrows: the stream holds both the statement text and the
        // connection until it is dropped.
        let Self {
            conn,
            active_select,
            ..
        } = self;
        let rows: RowStream<'a> = sqlx::query(active_select.as_str()).fetch(conn);
        Ok(Box::new(MysqlRowCursor {
            rows,
            categories: table.columns.iter().map(|c| c.ty.clone()).collect(),
            table: table.name.clone(),
        }))
    }
}

// ============================================================================
// Row cursor
// ============================================================================

struct MysqlRowCursor<'a> {
    rows: RowStream<'a>,
    categories: Vec<ColumnType>,
    table: String,
}

#[async_trait]
impl Cursor<Vec<Value>> for MysqlRowCursor<'_> {
    async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        match self.rows.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(e.into()),
            Some(Ok(row)) => Ok(Some(decode_row(&row, &self.categories, &self.table)?)),
        }
    }
}

// ============================================================================
// Statement building and decoding
// ============================================================================

/// Quote a SQL identifier the MySQL way: wrap in backticks, doubling
/// embedded ones.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Per-category cast so every value decodes as a signed integer, a double
/// or a character string.
fn cast_expr(column: &Column) -> String {
    let ident = quote_ident(&column.name);
    match &column.ty {
        ColumnType::Bool | ColumnType::Int => format!("CAST({ident} AS SIGNED)"),
        ColumnType::Float => format!("CAST({ident} AS DOUBLE)"),
        ColumnType::Text => format!("CAST({ident} AS CHAR)"),
        // MySQL has no array columns; rejected before any statement is built.
        ColumnType::Array(_) | ColumnType::Unsupported(_) => ident,
    }
}

fn build_select(table: &Table) -> String {
    let columns = table
        .columns
        .iter()
        .map(cast_expr)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "SELECT {} FROM {}.{}",
        columns,
        quote_ident(&table.schema),
        quote_ident(&table.name)
    )
}

/// Classify a column by `information_schema` type names. `tinyint(1)` is
/// MySQL's boolean spelling. Unrecognized types are read as raw text.
fn classify_column(data_type: &str, column_type: &str) -> ColumnType {
    let data_type = data_type.to_ascii_lowercase();
    if column_type.to_ascii_lowercase().starts_with("tinyint(1)") {
        return ColumnType::Bool;
    }
    match data_type.as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" => {
            ColumnType::Int
        }
        "float" | "double" | "decimal" => ColumnType::Float,
        "char" | "varchar" | "text" | "tinytext" | "mediumtext" | "longtext" | "enum" | "set" => {
            ColumnType::Text
        }
        "json" | "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob"
        | "bit" => ColumnType::Unsupported(data_type),
        _ => ColumnType::Text,
    }
}

fn decode_row(row: &MySqlRow, categories: &[ColumnType], table: &str) -> Result<Vec<Value>> {
    if row.len() != categories.len() {
        return Err(Error::Protocol(format!(
            "received unexpected result while reading table '{table}'"
        )));
    }
    categories
        .iter()
        .enumerate()
        .map(|(i, ty)| decode_field(row, i, ty))
        .collect()
}

fn decode_field(row: &MySqlRow, idx: usize, ty: &ColumnType) -> Result<Value> {
    Ok(match ty {
        ColumnType::Bool => row
            .try_get::<Option<i64>, _>(idx)?
            .map(|v| Value::Bool(v != 0))
            .unwrap_or(Value::Null),
        ColumnType::Int => row
            .try_get::<Option<i64>, _>(idx)?
            .map(Value::Int)
            .unwrap_or(Value::Null),
        ColumnType::Float => row
            .try_get::<Option<f64>, _>(idx)?
            .map(Value::Float)
            .unwrap_or(Value::Null),
        ColumnType::Text => row
            .try_get::<Option<String>, _>(idx)?
            .map(Value::String)
            .unwrap_or(Value::Null),
        ColumnType::Array(_) | ColumnType::Unsupported(_) => {
            return Err(Error::Protocol(format!(
                "unsupported column category {ty:?}"
            )));
        }
    })
}
