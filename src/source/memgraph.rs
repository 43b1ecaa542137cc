//! Memgraph source adapter: streams every vertex and edge and reads the
//! index/constraint catalogs over Bolt.
//!
//! Any unrecognized index or constraint kind, and any row of unexpected
//! shape, is a fatal error; proceeding would corrupt the destination.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, TryStreamExt};
use neo4rs::Graph;

use crate::bolt;
use crate::model::{Node, Relationship};
use crate::source::{ConstraintInfo, Cursor, GraphSource, IndexInfo};
use crate::{Error, Result};

type RowStream<'a> = Pin<Box<dyn Stream<Item = neo4rs::Result<neo4rs::Row>> + Send + 'a>>;

fn box_row_stream<'a, S>(stream: S) -> RowStream<'a>
where
    S: Stream<Item = neo4rs::Result<neo4rs::Row>> + Send + 'a,
{
    Box::pin(stream)
}

const READ_NODES: &str = "MATCH (u) RETURN u;";
const READ_RELATIONSHIPS: &str = "MATCH (u)-[e]->(v) RETURN e;";
const READ_INDICES: &str = "SHOW INDEX INFO;";
const READ_CONSTRAINTS: &str = "SHOW CONSTRAINT INFO;";

pub struct MemgraphSource {
    graph: Graph,
}

impl MemgraphSource {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }
}

// ============================================================================
// Cursors
// ============================================================================

/// Streams `MATCH (u) RETURN u`. The phantom borrow pins the adapter for
/// the cursor's lifetime, so a second cursor cannot be opened while this
/// one is live.
struct NodeCursor<'a> {
    rows: RowStream<'a>,
    _source: PhantomData<&'a mut MemgraphSource>,
}

#[async_trait]
impl Cursor<Node> for NodeCursor<'_> {
    async fn next(&mut self) -> Result<Option<Node>> {
        let Some(row) = self.rows.next().await.transpose()? else {
            return Ok(None);
        };
        let node: neo4rs::Node = row.get("u").map_err(|e| {
            Error::Protocol(format!("unexpected result while reading vertices: {e}"))
        })?;
        Ok(Some(bolt::node_from_bolt(&node)?))
    }
}

/// Streams `MATCH (u)-[e]->(v) RETURN e`.
struct RelationshipCursor<'a> {
    rows: RowStream<'a>,
    _source: PhantomData<&'a mut MemgraphSource>,
}

#[async_trait]
impl Cursor<Relationship> for RelationshipCursor<'_> {
    async fn next(&mut self) -> Result<Option<Relationship>> {
        let Some(row) = self.rows.next().await.transpose()? else {
            return Ok(None);
        };
        let rel: neo4rs::Relation = row.get("e").map_err(|e| {
            Error::Protocol(format!("unexpected result while reading edges: {e}"))
        })?;
        Ok(Some(bolt::relationship_from_bolt(&rel)?))
    }
}

// ============================================================================
// GraphSource
// ============================================================================

#[async_trait]
impl GraphSource for MemgraphSource {
    async fn nodes<'a>(&'a mut self) -> Result<Box<dyn Cursor<Node> + Send + 'a>> {
        let rows = self.graph.execute(neo4rs::query(READ_NODES)).await?;
        Ok(Box::new(NodeCursor {
            rows: box_row_stream(TryStreamExt::into_stream(rows.into_stream())),
            _source: PhantomData,
        }))
    }

    async fn relationships<'a>(
        &'a mut self,
    ) -> Result<Box<dyn Cursor<Relationship> + Send + 'a>> {
        let rows = self.graph.execute(neo4rs::query(READ_RELATIONSHIPS)).await?;
        Ok(Box::new(RelationshipCursor {
            rows: box_row_stream(TryStreamExt::into_stream(rows.into_stream())),
            _source: PhantomData,
        }))
    }

    async fn indices(&mut self) -> Result<IndexInfo> {
        let mut info = IndexInfo::default();
        let mut rows = self.graph.execute(neo4rs::query(READ_INDICES)).await?;
        while let Some(row) = rows.next().await? {
            let kind: String = row.get("index type").map_err(|e| {
                Error::Protocol(format!("unexpected result while reading indices: {e}"))
            })?;
            let label: String = row.get("label").map_err(|e| {
                Error::Protocol(format!("unexpected result while reading indices: {e}"))
            })?;
            match kind.as_str() {
                "label" => info.label.push(label),
                "label+property" => {
                    let property: String = row.get("property").map_err(|e| {
                        Error::Protocol(format!(
                            "unexpected result while reading indices: {e}"
                        ))
                    })?;
                    info.label_property.push((label, property));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unsupported index type '{other}'"
                    )));
                }
            }
        }
        Ok(info)
    }

    async fn constraints(&mut self) -> Result<ConstraintInfo> {
        let mut info = ConstraintInfo::default();
        let mut rows = self.graph.execute(neo4rs::query(READ_CONSTRAINTS)).await?;
        while let Some(row) = rows.next().await? {
            let kind: String = row.get("constraint type").map_err(|e| {
                Error::Protocol(format!("unexpected result while reading constraints: {e}"))
            })?;
            let label: String = row.get("label").map_err(|e| {
                Error::Protocol(format!("unexpected result while reading constraints: {e}"))
            })?;
            match kind.as_str() {
                "existence" => {
                    let property: String = row.get("properties").map_err(|e| {
                        Error::Protocol(format!(
                            "unexpected result while reading constraints: {e}"
                        ))
                    })?;
                    info.existence.push((label, property));
                }
                "unique" => {
                    let properties: Vec<String> = row.get("properties").map_err(|e| {
                        Error::Protocol(format!(
                            "unexpected result while reading constraints: {e}"
                        ))
                    })?;
                    info.unique
                        .push((label, properties.into_iter().collect::<BTreeSet<_>>()));
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "unsupported constraint type '{other}'"
                    )));
                }
            }
        }
        Ok(info)
    }
}
