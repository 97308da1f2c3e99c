//! Pipeline driver.
//!
//! Loads each selected table in turn: the source file is read line by line
//! through the tokenizer, row mapper and batch accumulator on the calling
//! task, and full batches are written by up to `concurrency` loader tasks.

use crate::batch::BatchAccumulator;
use crate::lines::LineReader;
use crate::mapper::{map_row, Mapped};
use crate::metrics::RunMetrics;
use crate::tokenizer::{tokenize_final, Record, RecordAssembler, DEFAULT_MAX_RECORD_BYTES};
use anyhow::{Context, Result};
use ingest_core::{Batch, TableRegistry, TableSpec};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use table_sink::{
    BatchStatus, Delay, LoadOutcome, LoadPolicy, Loader, LoaderConfig, RetryPolicy, Strategy,
    TableSink, TokioDelay,
};
use tokio::io::BufReader;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Configuration for an ingestion run
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the source files named by the table specs
    pub data_dir: PathBuf,

    /// Tables to load, in registry order; empty means all
    pub tables: Vec<String>,

    pub strategy: Strategy,

    pub policy: LoadPolicy,

    /// Rows per batch handed to the loader
    pub batch_size: usize,

    /// Batches written concurrently within one table
    pub concurrency: usize,

    pub retry: RetryPolicy,

    /// Ceiling for a buffered multi-line record
    pub max_record_bytes: usize,

    /// Issue CREATE TABLE IF NOT EXISTS before loading
    pub create_tables: bool,

    /// Optional path to emit metrics during execution
    pub emit_metrics: Option<PathBuf>,

    /// Whether to perform a dry run without writing data
    pub dry_run: bool,

    /// Minimum time between progress log lines
    pub progress_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_strategy(Strategy::Insert)
    }
}

impl Config {
    /// Defaults for a loading strategy.
    pub fn for_strategy(strategy: Strategy) -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            tables: Vec::new(),
            strategy,
            policy: strategy.default_policy(),
            batch_size: strategy.default_batch_size(),
            concurrency: strategy.default_concurrency(),
            retry: RetryPolicy::default(),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
            create_tables: false,
            emit_metrics: None,
            dry_run: false,
            progress_interval: Duration::from_secs(5),
        }
    }

    /// Reject option combinations the loader cannot honour.
    ///
    /// COPY has no conflict handling, so a bulk reload over existing keys
    /// would abandon every batch touching one of them.
    pub fn validate(&self) -> Result<()> {
        if self.strategy == Strategy::Bulk && self.policy == LoadPolicy::IdempotentReload {
            anyhow::bail!(
                "the bulk strategy cannot reload idempotently; use --policy truncate or --strategy insert"
            );
        }
        Ok(())
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig::new(self.strategy)
            .with_policy(self.policy)
            .with_retry(self.retry)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Loaded,
    /// The source file does not exist; nothing was done
    MissingSource,
    /// Table preparation or source reading failed
    Failed,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded => f.write_str("loaded"),
            Self::MissingSource => f.write_str("no source"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// Counters for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReport {
    pub table: String,
    pub status: TableStatus,
    pub error: Option<String>,
    /// Rows present before loading started
    pub existing_rows: Option<u64>,
    pub physical_lines: u64,
    /// Logical data records, header excluded
    pub records: u64,
    /// Records rejected by the row mapper
    pub rejected: u64,
    /// Records discarded for exceeding the record size ceiling
    pub unparseable: u64,
    pub lossy_lines: u64,
    pub batches: u64,
    pub failed_batches: u64,
    pub inserted: u64,
    pub duplicates: u64,
    /// Rows dropped by the loader
    pub write_skipped: u64,
    pub elapsed: Duration,
    /// Row count re-queried at the end of the run
    pub final_count: Option<u64>,
}

impl TableReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: TableStatus::Loaded,
            error: None,
            existing_rows: None,
            physical_lines: 0,
            records: 0,
            rejected: 0,
            unparseable: 0,
            lossy_lines: 0,
            batches: 0,
            failed_batches: 0,
            inserted: 0,
            duplicates: 0,
            write_skipped: 0,
            elapsed: Duration::ZERO,
            final_count: None,
        }
    }

    /// Rows that did not reach the store for any reason.
    pub fn skipped(&self) -> u64 {
        self.rejected + self.unparseable + self.write_skipped
    }

    pub fn rows_per_second(&self) -> f64 {
        if self.elapsed.as_secs_f64() > 0.0 {
            self.inserted as f64 / self.elapsed.as_secs_f64()
        } else {
            0.0
        }
    }

    fn absorb(&mut self, outcome: &LoadOutcome) {
        self.batches += 1;
        self.inserted += outcome.inserted;
        self.duplicates += outcome.duplicates;
        self.write_skipped += outcome.skipped;
        if outcome.status == BatchStatus::Failed {
            self.failed_batches += 1;
        }
    }
}

/// Counters for a whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub tables: Vec<TableReport>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.tables.iter().map(TableReport::skipped).sum()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<32} {:<10} {:>12} {:>12} {:>10} {:>12}",
            "table", "status", "inserted", "duplicates", "skipped", "final rows"
        )?;
        for t in &self.tables {
            let final_count = t
                .final_count
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "{:<32} {:<10} {:>12} {:>12} {:>10} {:>12}",
                t.table,
                t.status.to_string(),
                t.inserted,
                t.duplicates,
                t.skipped(),
                final_count
            )?;
        }
        write!(
            f,
            "total: {} inserted, {} skipped in {:.1}s",
            self.inserted(),
            self.skipped(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Load the selected tables into the store.
///
/// `sink` may be `None` only for a dry run.
pub async fn sync<S>(
    sink: Option<Arc<S>>,
    registry: &TableRegistry,
    config: &Config,
) -> Result<RunReport>
where
    S: TableSink + 'static,
{
    sync_with_delay(sink, registry, config, TokioDelay).await
}

/// [`sync`] with an explicit retry delay.
pub async fn sync_with_delay<S, D>(
    sink: Option<Arc<S>>,
    registry: &TableRegistry,
    config: &Config,
    delay: D,
) -> Result<RunReport>
where
    S: TableSink + 'static,
    D: Delay + 'static,
{
    config.validate().context("Invalid run configuration")?;
    let started = Instant::now();
    let specs = registry
        .select(&config.tables)
        .context("Invalid table selection")?;

    info!("Starting ingestion of {} table(s)", specs.len());
    info!("Data directory: {}", config.data_dir.display());

    let loader = if config.dry_run {
        warn!("Running in dry-run mode - no data will be written");
        None
    } else {
        let sink = sink.context("A store connection is required unless running a dry run")?;
        Some(Arc::new(Loader::with_delay(
            sink,
            config.loader_config(),
            delay,
        )))
    };

    let metrics_task = config.emit_metrics.as_ref().map(|path| {
        info!("Metrics emission enabled: {}", path.display());
        let metrics = RunMetrics::new();
        let task = metrics.spawn_writer(path.clone(), Duration::from_secs(1));
        (metrics, task)
    });
    let metrics_ref = metrics_task.as_ref().map(|(metrics, _)| metrics);

    let mut reports = Vec::with_capacity(specs.len());
    for spec in specs {
        let report = match process_table(loader.as_ref(), spec, config, metrics_ref).await {
            Ok(report) => report,
            Err(e) => {
                error!("{}: table load failed: {e:#}", spec.name);
                let mut report = TableReport::new(&spec.name);
                report.status = TableStatus::Failed;
                report.error = Some(format!("{e:#}"));
                report
            }
        };
        reports.push(report);
    }

    if let Some(loader) = &loader {
        for report in reports
            .iter_mut()
            .filter(|r| r.status == TableStatus::Loaded)
        {
            match loader.sink().row_count(&report.table).await {
                Ok(count) => report.final_count = Some(count),
                Err(e) => warn!("{}: could not count rows: {}", report.table, e),
            }
        }
    }

    if let (Some((metrics, task)), Some(path)) = (metrics_task, &config.emit_metrics) {
        task.abort();
        if let Err(e) = metrics.append_snapshot(path).await {
            warn!("Failed to write final metrics: {e:#}");
        }
    }

    let run = RunReport {
        tables: reports,
        elapsed: started.elapsed(),
    };
    for line in run.to_string().lines() {
        info!("{line}");
    }
    Ok(run)
}

/// Largest batch the configured sink accepts for this table.
fn effective_batch_size<S: TableSink, D: Delay>(
    config: &Config,
    loader: Option<&Arc<Loader<S, D>>>,
    spec: &TableSpec,
) -> usize {
    let limit = match (config.strategy, loader) {
        (Strategy::Insert, Some(loader)) => loader.sink().max_insert_rows(spec),
        _ => None,
    };
    match limit {
        Some(max) if config.batch_size > max => {
            warn!(
                "{}: batch size {} exceeds the statement limit, using {}",
                spec.name, config.batch_size, max
            );
            max
        }
        _ => config.batch_size.max(1),
    }
}

async fn process_table<S, D>(
    loader: Option<&Arc<Loader<S, D>>>,
    spec: &TableSpec,
    config: &Config,
    metrics: Option<&RunMetrics>,
) -> Result<TableReport>
where
    S: TableSink + 'static,
    D: Delay + 'static,
{
    let started = Instant::now();
    let mut report = TableReport::new(&spec.name);
    let path = config.data_dir.join(&spec.source_file);
    if let Some(m) = metrics {
        m.set_table(&spec.name);
    }

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "{}: source file {} not found, skipping table",
                spec.name,
                path.display()
            );
            report.status = TableStatus::MissingSource;
            return Ok(report);
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open {}", path.display()));
        }
    };

    let batch_size = effective_batch_size(config, loader, spec);
    info!(
        "{}: loading {} (strategy: {}, policy: {}, batch size: {}, concurrency: {})",
        spec.name,
        path.display(),
        config.strategy,
        config.policy,
        batch_size,
        config.concurrency
    );

    if let Some(loader) = loader {
        prepare_table(loader.sink().as_ref(), spec, config, &mut report).await?;
    }

    let mut dispatcher = Dispatcher::new(loader.cloned(), spec, config.concurrency);
    let mut progress = Progress::new(config.progress_interval);
    let mut lines = LineReader::new(BufReader::new(file));
    let mut assembler = RecordAssembler::new(config.max_record_bytes);
    let mut accumulator = BatchAccumulator::new(batch_size);
    let mut header_seen = false;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?
    {
        report.physical_lines += 1;
        if line.lossy {
            report.lossy_lines += 1;
        }
        if let Some(m) = metrics {
            m.add_bytes(line.bytes as u64);
        }

        // The header is exactly one physical line, whatever its quoting.
        if !header_seen {
            header_seen = true;
            assembler.skip_line();
            debug!(
                "{}: header has {} fields",
                spec.name,
                tokenize_final(&line.text).len()
            );
            continue;
        }

        let record = match assembler.push_line(&line.text) {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                warn!("{}: {}", spec.name, e);
                report.unparseable += 1;
                if let Some(m) = metrics {
                    m.add_skipped(1);
                }
                continue;
            }
        };

        if let Some(batch) = accept_record(&record, spec, &mut accumulator, &mut report, metrics) {
            dispatcher.submit(batch, &mut report, metrics).await?;
            progress.maybe_log(&report, started);
        }
    }

    if let Some(record) = assembler.finish() {
        warn!(
            "{}: source ends inside a quoted field opened at line {}",
            spec.name, record.start_line
        );
        if let Some(batch) = accept_record(&record, spec, &mut accumulator, &mut report, metrics)
        {
            dispatcher.submit(batch, &mut report, metrics).await?;
        }
    }

    if let Some(batch) = accumulator.flush() {
        dispatcher.submit(batch, &mut report, metrics).await?;
    }
    dispatcher.drain(&mut report, metrics).await?;

    report.elapsed = started.elapsed();
    if report.lossy_lines > 0 {
        warn!(
            "{}: {} lines contained invalid UTF-8 and were decoded lossily",
            spec.name, report.lossy_lines
        );
    }
    info!(
        "{}: done, {} inserted, {} duplicates, {} skipped in {:.1}s ({:.0} rows/sec)",
        spec.name,
        report.inserted,
        report.duplicates,
        report.skipped(),
        report.elapsed.as_secs_f64(),
        report.rows_per_second()
    );
    Ok(report)
}

/// Create, inspect and clear the target table as configured.
async fn prepare_table<S: TableSink>(
    sink: &S,
    spec: &TableSpec,
    config: &Config,
    report: &mut TableReport,
) -> Result<()> {
    if config.create_tables {
        sink.create_table(spec)
            .await
            .with_context(|| format!("Failed to create table {}", spec.name))?;
    }

    match sink.row_count(&spec.name).await {
        Ok(existing) => {
            report.existing_rows = Some(existing);
            if existing > 0 {
                if config.policy.truncates_first() {
                    info!("{}: {} existing rows will be truncated", spec.name, existing);
                } else {
                    info!(
                        "{}: {} existing rows, duplicate keys will be ignored",
                        spec.name, existing
                    );
                }
            }
        }
        Err(e) => warn!("{}: could not count existing rows: {}", spec.name, e),
    }

    if config.policy.truncates_first() {
        sink.truncate(spec)
            .await
            .with_context(|| format!("Failed to truncate table {}", spec.name))?;
    }
    Ok(())
}

fn accept_record(
    record: &Record,
    spec: &TableSpec,
    accumulator: &mut BatchAccumulator,
    report: &mut TableReport,
    metrics: Option<&RunMetrics>,
) -> Option<Batch> {
    report.records += 1;
    match map_row(&record.fields, spec) {
        Mapped::Row(row) => accumulator.push(row),
        Mapped::Rejected { column } => {
            debug!(
                "{}: record at line {} rejected, {} is null",
                spec.name, record.start_line, column
            );
            report.rejected += 1;
            if let Some(m) = metrics {
                m.add_skipped(1);
            }
            None
        }
    }
}

/// Runs loader calls for one table with bounded concurrency.
struct Dispatcher<S, D> {
    loader: Option<Arc<Loader<S, D>>>,
    spec: Arc<TableSpec>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<LoadOutcome>,
}

impl<S, D> Dispatcher<S, D>
where
    S: TableSink + 'static,
    D: Delay + 'static,
{
    fn new(loader: Option<Arc<Loader<S, D>>>, spec: &TableSpec, concurrency: usize) -> Self {
        Self {
            loader,
            spec: Arc::new(spec.clone()),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            tasks: JoinSet::new(),
        }
    }

    async fn submit(
        &mut self,
        batch: Batch,
        report: &mut TableReport,
        metrics: Option<&RunMetrics>,
    ) -> Result<()> {
        let Some(loader) = &self.loader else {
            debug!("Dry run: Would insert batch of {} records", batch.len());
            record_outcome(report, &dry_run_outcome(&batch), metrics);
            return Ok(());
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .context("Writer pool closed")?;

        while let Some(result) = self.tasks.try_join_next() {
            let outcome = result.context("Batch writer task failed")?;
            record_outcome(report, &outcome, metrics);
        }

        let loader = Arc::clone(loader);
        let spec = Arc::clone(&self.spec);
        self.tasks.spawn(async move {
            let _permit = permit;
            loader.load(&spec, batch).await
        });
        Ok(())
    }

    async fn drain(
        &mut self,
        report: &mut TableReport,
        metrics: Option<&RunMetrics>,
    ) -> Result<()> {
        while let Some(result) = self.tasks.join_next().await {
            let outcome = result.context("Batch writer task failed")?;
            record_outcome(report, &outcome, metrics);
        }
        Ok(())
    }
}

fn record_outcome(
    report: &mut TableReport,
    outcome: &LoadOutcome,
    metrics: Option<&RunMetrics>,
) {
    report.absorb(outcome);
    if let Some(m) = metrics {
        m.add_outcome(outcome.inserted, outcome.duplicates, outcome.skipped);
    }
}

fn dry_run_outcome(batch: &Batch) -> LoadOutcome {
    LoadOutcome {
        sequence: batch.sequence,
        rows: batch.len(),
        inserted: batch.len() as u64,
        duplicates: 0,
        skipped: 0,
        attempts: 0,
        elapsed: Duration::ZERO,
        status: BatchStatus::Committed,
        error: None,
    }
}

/// Rate-limited progress logging.
struct Progress {
    interval: Duration,
    last: Instant,
}

impl Progress {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    fn maybe_log(&mut self, report: &TableReport, started: Instant) {
        if self.last.elapsed() < self.interval {
            return;
        }
        self.last = Instant::now();
        let elapsed = started.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 {
            report.inserted as f64 / elapsed
        } else {
            0.0
        };
        info!(
            "{}: {} rows ({:.0}/sec, {} skipped)",
            report.table,
            report.inserted,
            rate,
            report.skipped()
        );
    }
}
