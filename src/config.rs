//! Command-line surface and startup validation.
//!
//! Flag names keep the underscore spelling of the original tool so existing
//! invocations keep working. Unknown source kinds are rejected at parse
//! time, before any connection is opened.

use clap::{ArgAction, Parser, ValueEnum};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    Memgraph,
    Postgresql,
    Mysql,
}

impl SourceKind {
    /// Default server port for the kind, used when `source_port` is 0.
    pub fn default_port(self) -> u16 {
        match self {
            SourceKind::Memgraph => 7687,
            SourceKind::Postgresql => 5432,
            SourceKind::Mysql => 3306,
        }
    }

    pub fn is_relational(self) -> bool {
        matches!(self, SourceKind::Postgresql | SourceKind::Mysql)
    }
}

/// A tool that imports data to the destination Memgraph from the given
/// source database.
#[derive(Debug, Parser)]
#[command(name = "graft", version, about)]
pub struct Config {
    /// The kind of the source server.
    #[arg(long = "source_kind", value_enum, default_value = "memgraph")]
    pub source_kind: SourceKind,

    /// Server address of the source database. It can be a DNS resolvable
    /// hostname.
    #[arg(long = "source_host", default_value = "127.0.0.1")]
    pub source_host: String,

    /// Server port of the source database. If set to 0, the default port
    /// for the given source kind is used, i.e. 7687 for Memgraph, 5432 for
    /// PostgreSQL and 3306 for MySQL.
    #[arg(long = "source_port", default_value_t = 0)]
    pub source_port: u16,

    /// Username for the source database.
    #[arg(long = "source_username", default_value = "")]
    pub source_username: String,

    /// Password for the source database.
    #[arg(long = "source_password", default_value = "")]
    pub source_password: String,

    /// Use SSL when connecting to the source database.
    #[arg(long = "source_use_ssl", default_value_t = true, action = ArgAction::Set)]
    pub source_use_ssl: bool,

    /// Database name. Required for relational sources.
    #[arg(long = "source_database", default_value = "")]
    pub source_database: String,

    /// Server address of the destination database. It can be a DNS
    /// resolvable hostname.
    #[arg(long = "destination_host", default_value = "127.0.0.1")]
    pub destination_host: String,

    /// Server port of the destination database.
    #[arg(long = "destination_port", default_value_t = 7687)]
    pub destination_port: u16,

    /// Username for the destination database.
    #[arg(long = "destination_username", default_value = "")]
    pub destination_username: String,

    /// Password for the destination database.
    #[arg(long = "destination_password", default_value = "")]
    pub destination_password: String,

    /// Use SSL when connecting to the destination database.
    #[arg(long = "destination_use_ssl", default_value_t = true, action = ArgAction::Set)]
    pub destination_use_ssl: bool,
}

impl Config {
    /// The source port after kind-based defaulting.
    pub fn source_port(&self) -> u16 {
        if self.source_port == 0 {
            self.source_kind.default_port()
        } else {
            self.source_port
        }
    }

    /// Startup validation. The endpoint comparison is textual; it does not
    /// try to resolve hostnames.
    pub fn validate(&self) -> Result<()> {
        if self.source_host.is_empty() {
            return Err(Error::Config(
                "please specify a valid server address for the source database".into(),
            ));
        }
        if self.destination_host.is_empty() {
            return Err(Error::Config(
                "please specify a valid server address for the destination database".into(),
            ));
        }
        if self.destination_port == 0 {
            return Err(Error::Config(
                "please specify a valid server port for the destination database".into(),
            ));
        }
        if self.source_host == self.destination_host
            && self.source_port() == self.destination_port
        {
            return Err(Error::Config(
                "the source and destination endpoints match; use two different endpoints"
                    .into(),
            ));
        }
        if self.source_kind.is_relational() && self.source_database.is_empty() {
            return Err(Error::Config(format!(
                "please specify a {} database name",
                match self.source_kind {
                    SourceKind::Postgresql => "PostgreSQL",
                    _ => "MySQL",
                }
            )));
        }
        Ok(())
    }
}
