//! # graft — migrate a database into Memgraph
//!
//! A one-shot, stop-the-world migration tool. It reads a source database in
//! full and issues write queries to a destination Memgraph over Bolt. Three
//! source kinds are supported: another Memgraph instance, PostgreSQL, and
//! MySQL. The destination is assumed empty; graft never writes back to the
//! source.
//!
//! ## Pipeline
//!
//! | Component | Module | Role |
//! |-----------|--------|------|
//! | Value model | [`model`] | tagged values crossing every boundary |
//! | Source adapters | [`source`] | uniform cursor-style readers |
//! | Destination writer | [`destination`] | parameterized Cypher emission |
//! | Orchestrator | [`migrate`] | the translation rules |
//!
//! The orchestrator selects a strategy by source kind: graph-to-graph
//! transfer with identity preservation, or relational-to-graph translation
//! (tables become nodes, or edges when they are pure join tables). Both
//! strategies bootstrap temporary scaffolding in the destination and tear
//! it down once the data is in.

pub mod bolt;
pub mod config;
pub mod destination;
pub mod migrate;
pub mod model;
pub mod source;

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{Node, OrderedMap, Path, Relationship, UnboundRelationship, Value};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid command-line configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A source or destination endpoint could not be reached.
    #[error("connection error: {0}")]
    Connect(String),

    /// A database returned a result of unexpected shape. Fatal: the schema
    /// was introspected moments earlier, so a mismatch means the source
    /// changed under us or the driver misbehaved.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("bolt driver error: {0}")]
    Bolt(#[from] neo4rs::Error),

    #[error("sql driver error: {0}")]
    Sql(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
