//! graft binary: parse flags, connect, dispatch the migration strategy.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use graft::config::{Config, SourceKind};
use graft::destination::Destination;
use graft::source::{MemgraphSource, MysqlSource, PostgresSource};
use graft::{bolt, migrate};

// The migration is a single cooperative stream of reads and writes; the
// current-thread runtime is all it needs.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let graph = bolt::connect(
        &config.destination_host,
        config.destination_port,
        &config.destination_username,
        &config.destination_password,
        config.destination_use_ssl,
    )
    .await
    .context("couldn't connect to the destination Memgraph database")?;
    let mut destination = Destination::new(bolt::BoltConnection::new(graph));

    match config.source_kind {
        SourceKind::Memgraph => {
            let graph = bolt::connect(
                &config.source_host,
                config.source_port(),
                &config.source_username,
                &config.source_password,
                config.source_use_ssl,
            )
            .await
            .context("couldn't connect to the source database")?;
            let mut source = MemgraphSource::new(graph);
            info!("migrating Memgraph database");
            migrate::migrate_graph(&mut source, &mut destination).await?;
        }
        SourceKind::Postgresql => {
            let mut source = PostgresSource::connect(
                &config.source_host,
                config.source_port(),
                &config.source_username,
                &config.source_password,
                &config.source_database,
            )
            .await
            .context("couldn't connect to the source database")?;
            info!("migrating PostgreSQL database");
            migrate::migrate_relational(&mut source, &mut destination).await?;
        }
        SourceKind::Mysql => {
            let mut source = MysqlSource::connect(
                &config.source_host,
                config.source_port(),
                &config.source_username,
                &config.source_password,
                &config.source_database,
            )
            .await
            .context("couldn't connect to the source database")?;
            info!("migrating MySQL database");
            migrate::migrate_relational(&mut source, &mut destination).await?;
        }
    }

    info!("migration finished");
    Ok(())
}
