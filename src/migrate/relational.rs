//! Relational-to-graph migration.
//!
//! Classification: a table becomes edges iff it has exactly two foreign
//! keys and no other table references its primary key; every other table
//! becomes nodes. Four phases, strictly ordered: node loads (with scaffold
//! indices for cheap matching), edge loads, constraint replay, scaffold
//! teardown.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::destination::{BoltRunner, Destination};
use crate::model::{OrderedMap, Value};
use crate::source::schema::{ForeignKey, SchemaInfo, Table};
use crate::source::RelationalSource;
use crate::{Error, Result};

/// Run the relational strategy against an introspected schema.
pub async fn migrate_relational<S, R>(
    source: &mut S,
    destination: &mut Destination<R>,
) -> Result<()>
where
    S: RelationalSource + ?Sized,
    R: BoltRunner,
{
    let schema = source.schema_info().await?;
    info!(
        tables = schema.tables.len(),
        foreign_keys = schema.foreign_keys.len(),
        "schema discovered"
    );

    migrate_nodes(source, destination, &schema).await?;
    migrate_edges(source, destination, &schema).await?;
    migrate_constraints(destination, &schema).await?;
    drop_scaffold_indices(destination, &schema).await?;
    Ok(())
}

// ============================================================================
// Phase 1 — nodes
// ============================================================================

async fn migrate_nodes<S, R>(
    source: &mut S,
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
) -> Result<()>
where
    S: RelationalSource + ?Sized,
    R: BoltRunner,
{
    info!("migrating rows");
    for table in &schema.tables {
        // Tables representable as relationships are skipped here and
        // handled in the edge phase.
        if table.is_join_table() {
            continue;
        }
        let label = schema.table_label(table);
        debug!(table = %table.name, label = %label, "streaming rows as nodes");
        let mut rows_written = 0u64;
        {
            let mut rows = source.table_rows(table).await?;
            while let Some(row) = rows.next().await? {
                let properties = row_properties(table, &row)?;
                destination
                    .create_node(std::slice::from_ref(&label), &properties)
                    .await?;
                rows_written += 1;
            }
        }
        if rows_written == 0 {
            warn!(table = %table.name, "table is empty");
        }

        // Scaffold index for fast node matching in the edge phase. The
        // destination indexes a single property, so a composite primary
        // key is indexed by its first column only.
        match table.primary_key.first() {
            Some(&position) => {
                destination
                    .create_label_property_index(&label, table.column_name(position))
                    .await?;
            }
            None => destination.create_label_index(&label).await?,
        }
    }
    Ok(())
}

/// Zip a row with its table's column names.
fn row_properties(table: &Table, row: &[Value]) -> Result<OrderedMap> {
    if row.len() != table.columns.len() {
        return Err(Error::Protocol(format!(
            "result size doesn't match column count of table '{}'",
            table.name
        )));
    }
    let mut properties = OrderedMap::with_capacity(row.len());
    for (column, value) in table.columns.iter().zip(row) {
        properties.insert_unchecked(column.name.as_str(), value.clone());
    }
    Ok(properties)
}

// ============================================================================
// Phase 2 — edges
// ============================================================================

async fn migrate_edges<S, R>(
    source: &mut S,
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
) -> Result<()>
where
    S: RelationalSource + ?Sized,
    R: BoltRunner,
{
    info!("migrating edges");
    for table in &schema.tables {
        if table.foreign_keys.is_empty() {
            continue;
        }
        if table.is_join_table() {
            migrate_join_table(source, destination, schema, table).await?;
        } else {
            migrate_table_foreign_keys(source, destination, schema, table).await?;
        }
    }
    Ok(())
}

/// A join table becomes one edge per row, between the two parents matched
/// by its foreign keys. Rows with a null in either matcher are skipped.
async fn migrate_join_table<S, R>(
    source: &mut S,
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
    table: &Table,
) -> Result<()>
where
    S: RelationalSource + ?Sized,
    R: BoltRunner,
{
    let fk1 = &schema.foreign_keys[table.foreign_keys[0]];
    let fk2 = &schema.foreign_keys[table.foreign_keys[1]];
    let label1 = schema.table_label(&schema.tables[fk1.parent_table]);
    let label2 = schema.table_label(&schema.tables[fk2.parent_table]);
    let edge_type = schema.table_label(table);
    debug!(table = %table.name, edge_type = %edge_type, "streaming join table as edges");

    let mut rows = source.table_rows(table).await?;
    while let Some(row) = rows.next().await? {
        let id1 = foreign_key_matcher(schema, fk1, &row)?;
        let id2 = foreign_key_matcher(schema, fk2, &row)?;
        if !is_matcher_well_defined(&id1) || !is_matcher_well_defined(&id2) {
            debug!(table = %table.name, "skipping row with null foreign key");
            continue;
        }

        // Edge properties are the row minus the foreign-key columns.
        let mut properties = OrderedMap::with_capacity(row.len());
        for (position, (column, value)) in table.columns.iter().zip(&row).enumerate() {
            if !fk1.child_columns.contains(&position) && !fk2.child_columns.contains(&position) {
                properties.insert_unchecked(column.name.as_str(), value.clone());
            }
        }

        let created = destination
            .create_relationships(&label1, &id1, &label2, &id2, &edge_type, &properties, false)
            .await?;
        if created != 1 {
            return Err(Error::Protocol(format!(
                "unexpected number of relationships created ({created}) for join \
                 table '{}'",
                table.name
            )));
        }
    }
    Ok(())
}

/// Every foreign key of a node table becomes one edge per row, from the
/// row's node to the matched parent. Without a primary key the row cannot
/// be uniquely identified, so `MERGE` guards against duplicate edges and
/// the created count is not asserted.
async fn migrate_table_foreign_keys<S, R>(
    source: &mut S,
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
    table: &Table,
) -> Result<()>
where
    S: RelationalSource + ?Sized,
    R: BoltRunner,
{
    let label1 = schema.table_label(table);
    let use_merge = table.primary_key.is_empty();
    debug!(table = %table.name, "streaming foreign keys as edges");

    let mut rows = source.table_rows(table).await?;
    while let Some(row) = rows.next().await? {
        let mut id1 = OrderedMap::with_capacity(row.len());
        if table.primary_key.is_empty() {
            // No primary key: match the node by every column.
            for (column, value) in table.columns.iter().zip(&row) {
                id1.insert_unchecked(column.name.as_str(), value.clone());
            }
        } else {
            for &position in &table.primary_key {
                let value = row.get(position).ok_or_else(|| {
                    Error::Protocol(format!(
                        "row of table '{}' is missing key column {position}",
                        table.name
                    ))
                })?;
                id1.insert_unchecked(table.column_name(position), value.clone());
            }
        }

        for &fk_position in &table.foreign_keys {
            let foreign_key = &schema.foreign_keys[fk_position];
            let id2 = foreign_key_matcher(schema, foreign_key, &row)?;
            if !is_matcher_well_defined(&id2) {
                debug!(table = %table.name, "skipping foreign key with null column");
                continue;
            }
            let label2 = schema.table_label(&schema.tables[foreign_key.parent_table]);
            let edge_type = format!("{label1}_to_{label2}");
            let created = destination
                .create_relationships(
                    &label1,
                    &id1,
                    &label2,
                    &id2,
                    &edge_type,
                    &OrderedMap::new(),
                    use_merge,
                )
                .await?;
            if !use_merge && created != 1 {
                return Err(Error::Protocol(format!(
                    "unexpected number of relationships created ({created}) for \
                     '{edge_type}'"
                )));
            }
        }
    }
    Ok(())
}

/// Map of parent-column name to this row's foreign-key value, used to match
/// the corresponding parent node.
fn foreign_key_matcher(
    schema: &SchemaInfo,
    foreign_key: &ForeignKey,
    row: &[Value],
) -> Result<OrderedMap> {
    let parent = &schema.tables[foreign_key.parent_table];
    let mut matcher = OrderedMap::with_capacity(foreign_key.child_columns.len());
    for (&child_position, &parent_position) in foreign_key
        .child_columns
        .iter()
        .zip(&foreign_key.parent_columns)
    {
        let value = row.get(child_position).ok_or_else(|| {
            Error::Protocol(format!(
                "row of table '{}' is missing foreign-key column {child_position}",
                schema.tables[foreign_key.child_table].name
            ))
        })?;
        let column = parent.columns.get(parent_position).ok_or_else(|| {
            Error::Protocol(format!(
                "table '{}' has no column at position {parent_position}",
                parent.name
            ))
        })?;
        matcher.insert_unchecked(column.name.as_str(), value.clone());
    }
    Ok(matcher)
}

/// A matcher with a null value can never match a node.
fn is_matcher_well_defined(matcher: &OrderedMap) -> bool {
    matcher.values().all(|value| !value.is_null())
}

// ============================================================================
// Phase 3 — constraints
// ============================================================================

async fn migrate_constraints<R>(
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
) -> Result<()>
where
    R: BoltRunner,
{
    info!("migrating existence constraints");
    for constraint in &schema.existence_constraints {
        let table = &schema.tables[constraint.table];
        if table.is_join_table() {
            continue;
        }
        destination
            .create_existence_constraint(
                &schema.table_label(table),
                table.column_name(constraint.column),
            )
            .await?;
    }

    info!("migrating unique constraints");
    for constraint in &schema.unique_constraints {
        let table = &schema.tables[constraint.table];
        if table.is_join_table() {
            continue;
        }
        let properties: BTreeSet<String> = constraint
            .columns
            .iter()
            .map(|&position| table.column_name(position).to_owned())
            .collect();
        destination
            .create_unique_constraint(&schema.table_label(table), &properties)
            .await?;
    }
    Ok(())
}

// ============================================================================
// Phase 4 — teardown
// ============================================================================

/// Drop every scaffold index created in the node phase.
async fn drop_scaffold_indices<R>(
    destination: &mut Destination<R>,
    schema: &SchemaInfo,
) -> Result<()>
where
    R: BoltRunner,
{
    info!("dropping scaffold indices");
    for table in &schema.tables {
        if table.is_join_table() {
            continue;
        }
        let label = schema.table_label(table);
        match table.primary_key.first() {
            Some(&position) => {
                destination
                    .drop_label_property_index(&label, table.column_name(position))
                    .await?;
            }
            None => destination.drop_label_index(&label).await?,
        }
    }
    Ok(())
}
