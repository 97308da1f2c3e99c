//! Command-line interface for phl-ingest
//!
//! # Usage Examples
//!
//! ## Load
//! ```bash
//! # Grouped INSERTs, idempotent reload of every table
//! phl-ingest load \
//!   --connection-string "host=localhost user=postgres dbname=phl" \
//!   --data-dir ./data
//!
//! # Binary COPY of two tables, truncating first
//! phl-ingest load --strategy bulk --tables demolitions,appeals \
//!   --connection-string "host=localhost user=postgres dbname=phl"
//!
//! # Tokenize and map without a database
//! phl-ingest load --dry-run --data-dir ./data
//! ```
//!
//! ## Inspection
//! ```bash
//! phl-ingest scan data/dbo.philly_business_licenses.csv
//! phl-ingest ddl --tables master_address
//! phl-ingest tables
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use ingest_core::TableRegistry;
use phl_ingest::csv::{self, TableStatus};
use phl_ingest::{load_registry, LoadArgs, PostgresOpts};
use postgresql_sink::{PgPool, PgPoolConfig, PostgresDdl, PostgresSink};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "phl-ingest")]
#[command(about = "Bulk loader for the Philadelphia civic CSV exports into PostgreSQL")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load CSV exports into PostgreSQL
    Load {
        /// PostgreSQL connection options
        #[command(flatten)]
        pg_opts: PostgresOpts,

        /// Run parameters
        #[command(flatten)]
        args: LoadArgs,
    },

    /// Report record structure of a CSV file without loading it
    Scan {
        /// CSV file to scan
        file: PathBuf,

        /// Largest multi-line record buffered before it is rejected
        #[arg(long, default_value_t = csv::tokenizer::DEFAULT_MAX_RECORD_BYTES)]
        max_record_bytes: usize,
    },

    /// Print CREATE TABLE statements for the registry
    Ddl {
        /// YAML table registry (defaults to the built-in registry)
        #[arg(long, value_name = "PATH")]
        schema_file: Option<PathBuf>,

        /// Tables to print (comma separated, default: all)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// List registry tables and their source files
    Tables {
        /// YAML table registry (defaults to the built-in registry)
        #[arg(long, value_name = "PATH")]
        schema_file: Option<PathBuf>,

        /// Print the full registry as YAML
        #[arg(long)]
        yaml: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing, info unless RUST_LOG says otherwise
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Load { pg_opts, args } => run_load(pg_opts, args).await?,
        Commands::Scan {
            file,
            max_record_bytes,
        } => {
            let report = csv::scan_file(&file, max_record_bytes).await?;
            println!("{}", file.display());
            println!("{report}");
        }
        Commands::Ddl {
            schema_file,
            tables,
        } => {
            let registry = load_registry(schema_file.as_deref())?;
            for spec in registry.select(&tables)? {
                println!("{}\n", PostgresDdl.create_table(spec));
            }
        }
        Commands::Tables { schema_file, yaml } => {
            let registry = load_registry(schema_file.as_deref())?;
            print_tables(&registry, yaml)?;
        }
    }

    Ok(())
}

async fn run_load(pg_opts: PostgresOpts, args: LoadArgs) -> anyhow::Result<()> {
    let registry = load_registry(args.schema_file.as_deref())?;
    let config = args.to_config();

    tracing::info!(
        "Loading from {} with strategy={} policy={} batch_size={} concurrency={}",
        config.data_dir.display(),
        config.strategy,
        config.policy,
        config.batch_size,
        config.concurrency
    );

    let report = if config.dry_run {
        csv::sync::<PostgresSink>(None, &registry, &config).await?
    } else {
        let connection_string = pg_opts.connection_string.context(
            "--connection-string (or PHL_INGEST_CONNECTION_STRING) is required unless --dry-run is set",
        )?;
        let pool = PgPool::connect(PgPoolConfig {
            connect_attempts: pg_opts.connect_attempts,
            connect_delay: pg_opts.connect_delay,
            ..PgPoolConfig::new(connection_string, args.pool_size())
        })
        .await
        .context("Failed to connect to PostgreSQL")?;
        let sink = Arc::new(PostgresSink::new(pool).with_write_timeout(args.write_timeout));
        csv::sync(Some(sink), &registry, &config).await?
    };

    println!("{report}");

    let failed: Vec<&str> = report
        .tables
        .iter()
        .filter(|t| t.status == TableStatus::Failed)
        .map(|t| t.table.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("{} table(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn print_tables(registry: &TableRegistry, yaml: bool) -> anyhow::Result<()> {
    if yaml {
        let text = serde_yaml::to_string(registry).context("Failed to serialize registry")?;
        print!("{text}");
        return Ok(());
    }
    for spec in &registry.tables {
        println!(
            "{:<32} {:<48} {} columns",
            spec.name,
            spec.source_file.display(),
            spec.columns.len()
        );
    }
    Ok(())
}
