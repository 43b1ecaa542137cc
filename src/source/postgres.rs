//! PostgreSQL source adapter.
//!
//! Schema discovery walks `information_schema`, excluding the built-in
//! schemas. Row streaming uses a server-side cursor (`DECLARE` / `FETCH`
//! inside an explicit transaction) so tables of any size stream in bounded
//! memory. Values are fetched through per-category casts; arrays arrive in
//! the native text format and are parsed here, including nesting and NULL
//! elements.

use std::collections::VecDeque;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Connection, Row};
use tracing::debug;

use crate::model::Value;
use crate::source::schema::{
    self, Column, ColumnType, SchemaInfo, Table,
};
use crate::source::{Cursor, RelationalSource};
use crate::{Error, Result};

/// Schemas that are never migrated.
const SCHEMA_BLACKLIST: &str = "('information_schema', 'pg_catalog')";

const CURSOR_NAME: &str = "graft_cursor";
const FETCH_SIZE: usize = 1000;

pub struct PostgresSource {
    conn: PgConnection,
}

impl PostgresSource {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        database: &str,
    ) -> Result<Self> {
        let options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .username(username)
            .password(password)
            .database(database);
        let conn = PgConnection::connect_with(&options).await.map_err(|e| {
            Error::Connect(format!("unable to connect to PostgreSQL server: {e}"))
        })?;
        Ok(Self { conn })
    }

    async fn list_tables(&mut self) -> Result<Vec<(String, String)>> {
        let statement = format!(
            "SELECT table_schema, table_name \
             FROM information_schema.tables \
             WHERE table_type = 'BASE TABLE' AND table_schema NOT IN {SCHEMA_BLACKLIST} \
             ORDER BY table_schema, table_name"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
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
            "SELECT column_name, udt_name \
             FROM information_schema.columns \
             WHERE table_schema = $1 AND table_name = $2 \
             ORDER BY ordinal_position",
        )
        .bind(table_schema)
        .bind(table_name)
        .fetch_all(&mut self.conn)
        .await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get(0)?;
            let udt_name: String = row.try_get(1)?;
            debug!(column = %name, udt = %udt_name, "found column");
            columns.push(Column {
                name,
                ty: classify_column(&udt_name),
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
               USING (constraint_schema, constraint_name) \
             WHERE tc.constraint_type = 'PRIMARY KEY' \
               AND tc.table_schema = $1 AND tc.table_name = $2 \
             ORDER BY kcu.ordinal_position",
        )
        .bind(table_schema)
        .bind(table_name)
        .fetch_all(&mut self.conn)
        .await?;
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
               parent.table_schema, \
               parent.table_name, \
               parent.column_name \
             FROM \
               information_schema.referential_constraints AS constraints \
               JOIN information_schema.key_column_usage AS child \
                 USING (constraint_schema, constraint_name) \
               JOIN information_schema.key_column_usage AS parent \
                 ON parent.ordinal_position = child.position_in_unique_constraint \
                AND parent.constraint_name = constraints.unique_constraint_name \
             WHERE constraints.constraint_schema NOT IN {SCHEMA_BLACKLIST} \
               AND child.table_schema NOT IN {SCHEMA_BLACKLIST} \
               AND parent.table_schema NOT IN {SCHEMA_BLACKLIST} \
             ORDER BY constraints.constraint_schema, constraints.constraint_name, \
                      child.ordinal_position"
        );
        let rows = sqlx::query(&statement).fetch_all(&mut self.conn).await?;
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
            "SELECT tc.constraint_name, tc.table_schema, tc.table_name, ccu.column_name \
             FROM \
               information_schema.table_constraints AS tc \
               JOIN information_schema.constraint_column_usage AS ccu \
                 USING (constraint_name, table_schema) \
             WHERE tc.constraint_type IN ('UNIQUE', 'PRIMARY KEY') \
               AND tc.table_schema NOT IN {SCHEMA_BLACKLIST} \
             ORDER BY tc.constraint_name"
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
impl RelationalSource for PostgresSource {
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
            default_schema: "public".to_owned(),
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
        let select = build_select(table);
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        let declare = format!("DECLARE {CURSOR_NAME} NO SCROLL CURSOR FOR {select}");
        sqlx::query(&declare).execute(&mut self.conn).await?;
        Ok(Box::new(PgRowCursor {
            categories: table.columns.iter().map(|c| c.ty.clone()).collect(),
            table: table.name.clone(),
            buffer: VecDeque::new(),
            done: false,
            conn: &mut self.conn,
        }))
    }
}

// ============================================================================
// Row cursor
// ============================================================================

struct PgRowCursor<'a> {
    conn: &'a mut PgConnection,
    categories: Vec<ColumnType>,
    table: String,
    buffer: VecDeque<Vec<Value>>,
    done: bool,
}

#[async_trait]
impl Cursor<Vec<Value>> for PgRowCursor<'_> {
    async fn next(&mut self) -> Result<Option<Vec<Value>>> {
        if let Some(row) = self.buffer.pop_front() {
            return Ok(Some(row));
        }
        if self.done {
            return Ok(None);
        }
        let fetch = format!("FETCH {FETCH_SIZE} FROM {CURSOR_NAME}");
        let rows = sqlx::query(&fetch).fetch_all(&mut *self.conn).await?;
        if rows.is_empty() {
            let close = format!("CLOSE {CURSOR_NAME}");
            sqlx::query(&close).execute(&mut *self.conn).await?;
            sqlx::query("COMMIT").execute(&mut *self.conn).await?;
            self.done = true;
            return Ok(None);
        }
        for row in &rows {
            self.buffer
                .push_back(decode_row(row, &self.categories, &self.table)?);
        }
        Ok(self.buffer.pop_front())
    }
}

// ============================================================================
// Statement building and decoding
// ============================================================================

/// Quote a SQL identifier: wrap in double quotes, doubling embedded ones.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Per-category cast so every value decodes through one of four shapes:
/// bool, int8, float8 or text. Arrays are fetched as text and parsed.
fn cast_expr(column: &Column) -> String {
    let ident = quote_ident(&column.name);
    match &column.ty {
        ColumnType::Bool => ident,
        ColumnType::Int => format!("{ident}::int8"),
        ColumnType::Float => format!("{ident}::float8"),
        ColumnType::Text => format!("{ident}::text"),
        ColumnType::Array(_) => format!("{ident}::text"),
        // Rejected before any statement is built.
        ColumnType::Unsupported(_) => ident,
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

/// Classify a column by its `udt_name`. Arrays carry a leading underscore.
/// Unrecognized types are read as raw text.
fn classify_column(udt_name: &str) -> ColumnType {
    if let Some(element) = udt_name.strip_prefix('_') {
        return ColumnType::Array(Box::new(classify_column(element)));
    }
    match udt_name {
        "bool" => ColumnType::Bool,
        "int2" | "int4" | "int8" => ColumnType::Int,
        "float4" | "float8" | "numeric" => ColumnType::Float,
        "char" | "bpchar" | "varchar" | "text" => ColumnType::Text,
        "json" | "jsonb" | "bytea" => ColumnType::Unsupported(udt_name.to_owned()),
        _ => ColumnType::Text,
    }
}

fn decode_row(row: &PgRow, categories: &[ColumnType], table: &str) -> Result<Vec<Value>> {
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

fn decode_field(row: &PgRow, idx: usize, ty: &ColumnType) -> Result<Value> {
    Ok(match ty {
        ColumnType::Bool => row
            .try_get::<Option<bool>, _>(idx)?
            .map(Value::Bool)
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
        ColumnType::Array(element) => match row.try_get::<Option<String>, _>(idx)? {
            None => Value::Null,
            Some(text) => parse_array(&text, element)?,
        },
        ColumnType::Unsupported(kind) => {
            return Err(Error::Protocol(format!(
                "unsupported column type '{kind}'"
            )));
        }
    })
}

// ============================================================================
// Text array parsing
// ============================================================================

/// Parse the native text form of a PostgreSQL array (possibly
/// multidimensional) into a list value. NULL elements become `Value::Null`;
/// quoted elements never do.
fn parse_array(text: &str, element: &ColumnType) -> Result<Value> {
    // Arrays with explicit bounds carry a "[lo:hi]=" prefix.
    let start = text.find('{').ok_or_else(|| {
        Error::Protocol(format!("malformed array value '{text}'"))
    })?;
    let mut chars = text[start..].chars().peekable();
    let value = parse_array_body(&mut chars, element, text)?;
    if chars.any(|c| !c.is_whitespace()) {
        return Err(Error::Protocol(format!(
            "trailing data in array value '{text}'"
        )));
    }
    Ok(value)
}

fn parse_array_body(
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    element: &ColumnType,
    original: &str,
) -> Result<Value> {
    let malformed = || Error::Protocol(format!("malformed array value '{original}'"));
    if chars.next() != Some('{') {
        return Err(malformed());
    }
    let mut items = Vec::new();
    if chars.peek() == Some(&'}') {
        chars.next();
        return Ok(Value::List(items));
    }
    loop {
        match chars.peek() {
            Some('{') => items.push(parse_array_body(chars, element, original)?),
            Some('"') => {
                chars.next();
                let mut token = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => token.push(chars.next().ok_or_else(malformed)?),
                        Some('"') => break,
                        Some(c) => token.push(c),
                        None => return Err(malformed()),
                    }
                }
                items.push(convert_element(&token, element, original)?);
            }
            Some(_) => {
                let mut token = String::new();
                while let Some(&c) = chars.peek() {
                    if c == ',' || c == '}' {
                        break;
                    }
                    token.push(c);
                    chars.next();
                }
                if token.eq_ignore_ascii_case("null") {
                    items.push(Value::Null);
                } else {
                    items.push(convert_element(&token, element, original)?);
                }
            }
            None => return Err(malformed()),
        }
        match chars.next() {
            Some(',') => continue,
            Some('}') => break,
            _ => return Err(malformed()),
        }
    }
    Ok(Value::List(items))
}

fn convert_element(token: &str, element: &ColumnType, original: &str) -> Result<Value> {
    let bad_element = || {
        Error::Protocol(format!(
            "couldn't parse array element '{token}' in '{original}'"
        ))
    };
    Ok(match element {
        ColumnType::Bool => match token {
            "t" | "true" => Value::Bool(true),
            "f" | "false" => Value::Bool(false),
            _ => return Err(bad_element()),
        },
        ColumnType::Int => Value::Int(token.parse().map_err(|_| bad_element())?),
        ColumnType::Float => Value::Float(token.parse().map_err(|_| bad_element())?),
        _ => Value::String(token.to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_column() {
        assert_eq!(classify_column("bool"), ColumnType::Bool);
        assert_eq!(classify_column("int4"), ColumnType::Int);
        assert_eq!(classify_column("numeric"), ColumnType::Float);
        assert_eq!(classify_column("varchar"), ColumnType::Text);
        assert_eq!(classify_column("timestamptz"), ColumnType::Text);
        assert_eq!(
            classify_column("_int8"),
            ColumnType::Array(Box::new(ColumnType::Int))
        );
        assert_eq!(
            classify_column("jsonb"),
            ColumnType::Unsupported("jsonb".into())
        );
    }

    #[test]
    fn test_build_select_casts_by_category() {
        let table = Table {
            schema: "public".into(),
            name: "t".into(),
            columns: vec![
                Column { name: "a".into(), ty: ColumnType::Bool },
                Column { name: "b".into(), ty: ColumnType::Int },
                Column { name: "c".into(), ty: ColumnType::Array(Box::new(ColumnType::Int)) },
            ],
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            primary_key_referenced: false,
        };
        assert_eq!(
            build_select(&table),
            "SELECT \"a\", \"b\"::int8, \"c\"::text FROM \"public\".\"t\""
        );
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_parse_flat_array() {
        assert_eq!(
            parse_array("{1,2,3}", &ColumnType::Int).unwrap(),
            Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
        assert_eq!(
            parse_array("{}", &ColumnType::Int).unwrap(),
            Value::List(vec![])
        );
    }

    #[test]
    fn test_parse_array_with_nulls() {
        assert_eq!(
            parse_array("{1,NULL,3}", &ColumnType::Int).unwrap(),
            Value::List(vec![Value::Int(1), Value::Null, Value::Int(3)])
        );
        // A quoted NULL is the string, not the null.
        assert_eq!(
            parse_array("{\"NULL\",NULL}", &ColumnType::Text).unwrap(),
            Value::List(vec![Value::String("NULL".into()), Value::Null])
        );
    }

    #[test]
    fn test_parse_nested_array() {
        assert_eq!(
            parse_array("{{1,2},{NULL,4}}", &ColumnType::Int).unwrap(),
            Value::List(vec![
                Value::List(vec![Value::Int(1), Value::Int(2)]),
                Value::List(vec![Value::Null, Value::Int(4)]),
            ])
        );
    }

    #[test]
    fn test_parse_quoted_strings_and_escapes() {
        assert_eq!(
            parse_array(r#"{"a b","c\"d","e\\f",plain}"#, &ColumnType::Text).unwrap(),
            Value::List(vec![
                Value::String("a b".into()),
                Value::String("c\"d".into()),
                Value::String("e\\f".into()),
                Value::String("plain".into()),
            ])
        );
    }

    #[test]
    fn test_parse_array_with_bounds_prefix() {
        assert_eq!(
            parse_array("[0:1]={t,f}", &ColumnType::Bool).unwrap(),
            Value::List(vec![Value::Bool(true), Value::Bool(false)])
        );
    }

    #[test]
    fn test_parse_array_rejects_garbage() {
        assert!(parse_array("{1,2", &ColumnType::Int).is_err());
        assert!(parse_array("{a}", &ColumnType::Int).is_err());
        assert!(parse_array("1,2}", &ColumnType::Int).is_err());
    }
}
