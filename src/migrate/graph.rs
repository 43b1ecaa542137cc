//! Graph-to-graph migration with identity preservation.
//!
//! The destination assigns new internal IDs, so every created node
//! additionally carries the internal label and an internal property holding
//! the source-side identity. Relationships are then matched through an
//! index over that pair. The scaffolding is dropped once everything is in.

use tracing::info;

use crate::destination::{
    BoltRunner, Destination, INTERNAL_ID_PROPERTY, INTERNAL_VERTEX_LABEL,
};
use crate::model::{OrderedMap, Value};
use crate::source::GraphSource;
use crate::{Error, Result};

/// Run the graph strategy: nodes, then relationships, then index and
/// constraint replay, then teardown. Reading all nodes first guarantees no
/// relationship is written before both of its endpoints.
pub async fn migrate_graph<S, R>(source: &mut S, destination: &mut Destination<R>) -> Result<()>
where
    S: GraphSource + ?Sized,
    R: BoltRunner,
{
    info!("migrating nodes");
    let mut bootstrapped = false;
    let mut nodes_written = 0u64;
    {
        let mut nodes = source.nodes().await?;
        while let Some(node) = nodes.next().await? {
            // The bootstrap index goes in with the first node so the
            // relationship matches stay cheap.
            if !bootstrapped {
                destination
                    .create_label_property_index(INTERNAL_VERTEX_LABEL, INTERNAL_ID_PROPERTY)
                    .await?;
                bootstrapped = true;
            }
            let mut labels = Vec::with_capacity(node.labels.len() + 1);
            labels.push(INTERNAL_VERTEX_LABEL.to_owned());
            labels.extend(node.labels.iter().cloned());

            let mut properties = OrderedMap::with_capacity(node.properties.len() + 1);
            properties.insert_unchecked(INTERNAL_ID_PROPERTY, Value::Int(node.id));
            for (key, value) in node.properties.iter() {
                properties.insert_unchecked(key, value.clone());
            }
            destination.create_node(&labels, &properties).await?;
            nodes_written += 1;
        }
    }
    info!(nodes = nodes_written, "nodes written");

    info!("migrating relationships");
    let mut relationships_written = 0u64;
    {
        let mut relationships = source.relationships().await?;
        while let Some(rel) = relationships.next().await? {
            let mut id1 = OrderedMap::with_capacity(1);
            id1.insert_unchecked(INTERNAL_ID_PROPERTY, Value::Int(rel.start));
            let mut id2 = OrderedMap::with_capacity(1);
            id2.insert_unchecked(INTERNAL_ID_PROPERTY, Value::Int(rel.end));

            let created = destination
                .create_relationships(
                    INTERNAL_VERTEX_LABEL,
                    &id1,
                    INTERNAL_VERTEX_LABEL,
                    &id2,
                    &rel.rel_type,
                    &rel.properties,
                    false,
                )
                .await?;
            if created != 1 {
                return Err(Error::Protocol(format!(
                    "unexpected number of relationships created ({created}) for \
                     ({})-[:{}]->({})",
                    rel.start, rel.rel_type, rel.end
                )));
            }
            relationships_written += 1;
        }
    }
    info!(relationships = relationships_written, "relationships written");

    info!("migrating indices");
    let index_info = source.indices().await?;
    for label in &index_info.label {
        destination.create_label_index(label).await?;
    }
    for (label, property) in &index_info.label_property {
        destination.create_label_property_index(label, property).await?;
    }

    info!("migrating constraints");
    let constraint_info = source.constraints().await?;
    for (label, property) in &constraint_info.existence {
        destination.create_existence_constraint(label, property).await?;
    }
    for (label, properties) in &constraint_info.unique {
        destination.create_unique_constraint(label, properties).await?;
    }

    // A source with no nodes created no scaffolding, so there is nothing
    // to tear down.
    if bootstrapped {
        info!("removing internal labels, properties and indices");
        destination
            .drop_label_property_index(INTERNAL_VERTEX_LABEL, INTERNAL_ID_PROPERTY)
            .await?;
        destination.remove_label_from_nodes(INTERNAL_VERTEX_LABEL).await?;
        destination
            .remove_property_from_nodes(INTERNAL_ID_PROPERTY)
            .await?;
    }
    Ok(())
}
