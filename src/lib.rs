//! phl-ingest library
//!
//! Bulk ingestion of the Philadelphia civic datasets (demolitions, appeals,
//! licenses, property assessments, master address and entity tables) from
//! CSV exports into PostgreSQL.
//!
//! # Crates
//!
//! - `ingest_core` - column/table specs, typed values, the built-in registry
//! - `phl_ingest_csv_source` - tokenizer, row mapper, accumulator and driver
//! - `table_sink` - sink trait, loader strategies and retry policy
//! - `postgresql_sink` - PostgreSQL pool, INSERT/COPY writers and DDL
//!
//! # CLI Usage
//!
//! ```bash
//! # Load every table with grouped inserts
//! phl-ingest load --connection-string "host=localhost user=postgres dbname=phl"
//!
//! # Bulk-copy two tables, truncating first
//! phl-ingest load --strategy bulk --tables demolitions,appeals ...
//!
//! # Inspect a source file
//! phl-ingest scan data/dbo.philly_business_licenses.csv
//! ```

use anyhow::Context;
use clap::Parser;
use ingest_core::TableRegistry;
use std::path::{Path, PathBuf};
use std::time::Duration;
use table_sink::{LoadPolicy, RetryPolicy, Strategy};

pub mod config;

pub use config::parse_duration;
pub use phl_ingest_csv_source as csv;

/// PostgreSQL connection options
#[derive(Parser, Clone, Debug)]
pub struct PostgresOpts {
    /// PostgreSQL connection string (e.g. "host=localhost user=postgres dbname=phl")
    #[arg(long, env = "PHL_INGEST_CONNECTION_STRING")]
    pub connection_string: Option<String>,

    /// Startup connection attempts before giving up
    #[arg(long, default_value = "5")]
    pub connect_attempts: u32,

    /// Delay between startup connection attempts
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub connect_delay: Duration,
}

/// Run parameters for `phl-ingest load`
#[derive(Parser, Clone, Debug)]
pub struct LoadArgs {
    /// Directory holding the source CSV files
    #[arg(long, env = "PHL_INGEST_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// YAML table registry (defaults to the built-in Philadelphia registry)
    #[arg(long)]
    pub schema_file: Option<PathBuf>,

    /// Loading strategy: insert (grouped INSERT) or bulk (binary COPY)
    #[arg(long, default_value = "insert")]
    pub strategy: Strategy,

    /// truncate or idempotent (defaults: idempotent for insert, truncate for bulk)
    #[arg(long)]
    pub policy: Option<LoadPolicy>,

    /// Rows per batch (defaults: 500 for insert, 50000 for bulk)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Concurrent batch writers per table (defaults: 4 for insert, 1 for bulk)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// PostgreSQL connections (defaults to the concurrency)
    #[arg(long)]
    pub pool_size: Option<usize>,

    /// Retries after a transient write failure
    #[arg(long, default_value = "5")]
    pub max_retries: u32,

    /// Base retry delay; retry n waits n times this
    #[arg(long, default_value = "1s", value_parser = parse_duration)]
    pub retry_delay: Duration,

    /// Time limit for a single write
    #[arg(long, default_value = "600s", value_parser = parse_duration)]
    pub write_timeout: Duration,

    /// Largest multi-line record buffered before it is rejected
    #[arg(long, default_value_t = csv::tokenizer::DEFAULT_MAX_RECORD_BYTES)]
    pub max_record_bytes: usize,

    /// Tables to load (comma separated, default: all)
    #[arg(long, value_delimiter = ',')]
    pub tables: Vec<String>,

    /// Create missing tables from the registry before loading
    #[arg(long)]
    pub create_tables: bool,

    /// Write JSON-lines progress metrics to this file
    #[arg(long)]
    pub emit_metrics: Option<PathBuf>,

    /// Tokenize and map everything but write nothing
    #[arg(long)]
    pub dry_run: bool,
}

impl LoadArgs {
    /// Driver configuration with strategy defaults filled in.
    pub fn to_config(&self) -> csv::Config {
        let defaults = csv::Config::for_strategy(self.strategy);
        csv::Config {
            data_dir: self.data_dir.clone(),
            tables: self.tables.clone(),
            policy: self.policy.unwrap_or(defaults.policy),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            concurrency: self.concurrency.unwrap_or(defaults.concurrency),
            retry: RetryPolicy::new(self.max_retries, self.retry_delay),
            max_record_bytes: self.max_record_bytes,
            create_tables: self.create_tables,
            emit_metrics: self.emit_metrics.clone(),
            dry_run: self.dry_run,
            ..defaults
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
            .or(self.concurrency)
            .unwrap_or_else(|| self.strategy.default_concurrency())
            .max(1)
    }
}

/// Load a registry file, or the built-in Philadelphia registry.
pub fn load_registry(schema_file: Option<&Path>) -> anyhow::Result<TableRegistry> {
    match schema_file {
        Some(path) => TableRegistry::from_file(path)
            .with_context(|| format!("Failed to load table registry from {}", path.display())),
        None => ingest_core::registry::philadelphia().context("Built-in table registry is invalid"),
    }
}
