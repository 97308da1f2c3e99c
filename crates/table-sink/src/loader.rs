//! Batch loader.
//!
//! A [`Loader`] writes one [`Batch`] to a [`TableSink`] using one of two
//! strategies and always reports a [`LoadOutcome`]; write failures are
//! folded into the outcome and never abort the caller.
//!
//! Grouped inserts move through an explicit state machine:
//!
//! ```text
//! Writing ──ok──────────────► Committed
//!    │
//!    ├─truncation──► TruncationFallback ──► (row committed | row skipped)*
//!    │
//!    ├─transient, retries left──► Retrying ──reconnect + backoff──► Writing
//!    │
//!    └─transient exhausted / rejected──► Exhausted
//! ```

use crate::error::{truncate_message, ErrorClass, SinkError};
use crate::retry::{Delay, RetryPolicy, TokioDelay};
use crate::traits::{OnConflict, TableSink};
use ingest_core::{Batch, TableSpec};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Maximum characters of a store error message written to the log.
pub const LOG_MESSAGE_CHARS: usize = 120;

/// How a batch is transferred to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The store's native bulk-copy protocol; all or nothing per batch
    Bulk,
    /// One multi-row INSERT per batch with retry and per-row fallback
    Insert,
}

impl Strategy {
    pub fn default_batch_size(&self) -> usize {
        match self {
            Self::Bulk => 50_000,
            Self::Insert => 500,
        }
    }

    pub fn default_concurrency(&self) -> usize {
        match self {
            Self::Bulk => 1,
            Self::Insert => 4,
        }
    }

    pub fn default_policy(&self) -> LoadPolicy {
        match self {
            Self::Bulk => LoadPolicy::Truncate,
            Self::Insert => LoadPolicy::IdempotentReload,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bulk => f.write_str("bulk"),
            Self::Insert => f.write_str("insert"),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bulk" | "copy" => Ok(Self::Bulk),
            "insert" => Ok(Self::Insert),
            other => Err(format!("unknown strategy '{other}' (expected bulk or insert)")),
        }
    }
}

/// What happens to a table's prior contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Remove all rows before the first batch
    Truncate,
    /// Keep existing rows and ignore primary-key collisions
    IdempotentReload,
}

impl LoadPolicy {
    /// Conflict handling for INSERT statements under this policy.
    pub fn on_conflict(&self) -> OnConflict {
        match self {
            Self::Truncate => OnConflict::Error,
            Self::IdempotentReload => OnConflict::Ignore,
        }
    }

    pub fn truncates_first(&self) -> bool {
        matches!(self, Self::Truncate)
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncate => f.write_str("truncate"),
            Self::IdempotentReload => f.write_str("idempotent"),
        }
    }
}

impl FromStr for LoadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "truncate" => Ok(Self::Truncate),
            "idempotent" | "idempotent-reload" | "reload" => Ok(Self::IdempotentReload),
            other => Err(format!(
                "unknown policy '{other}' (expected truncate or idempotent)"
            )),
        }
    }
}

/// Loader settings shared by every batch of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    pub strategy: Strategy,
    pub policy: LoadPolicy,
    pub retry: RetryPolicy,
}

impl LoaderConfig {
    /// Settings for a strategy with its default policy and retry bounds.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            policy: strategy.default_policy(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: LoadPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Final state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    /// Every row reached the store (possibly as an ignored duplicate)
    Committed,
    /// Some rows were dropped during per-row fallback
    PartiallyCommitted,
    /// Nothing was written
    Failed,
}

/// Result of loading one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOutcome {
    pub sequence: u64,
    pub rows: usize,
    /// Rows newly written
    pub inserted: u64,
    /// Rows absorbed by an existing primary key
    pub duplicates: u64,
    /// Rows dropped because of write failures
    pub skipped: u64,
    /// Statement attempts made for the whole batch
    pub attempts: u32,
    pub elapsed: Duration,
    pub status: BatchStatus,
    /// Truncated message of the failure that caused skips
    pub error: Option<String>,
}

impl LoadOutcome {
    pub fn elapsed_ms(&self) -> u128 {
        self.elapsed.as_millis()
    }
}

/// Per-batch state for grouped inserts.
#[derive(Debug)]
enum BatchState {
    Writing { attempt: u32 },
    Retrying { failed_attempts: u32, error: SinkError },
    TruncationFallback { attempts: u32 },
    Committed { inserted: u64, attempts: u32 },
    Exhausted { attempts: u32, error: SinkError },
}

/// Writes batches for one run.
///
/// The sink is shared by every concurrent writer; the delay is injectable so
/// retry behavior can be exercised without waiting.
pub struct Loader<S, D = TokioDelay> {
    sink: Arc<S>,
    delay: D,
    config: LoaderConfig,
}

impl<S: TableSink> Loader<S, TokioDelay> {
    pub fn new(sink: Arc<S>, config: LoaderConfig) -> Self {
        Self::with_delay(sink, config, TokioDelay)
    }
}

impl<S: TableSink, D: Delay> Loader<S, D> {
    pub fn with_delay(sink: Arc<S>, config: LoaderConfig, delay: D) -> Self {
        Self {
            sink,
            delay,
            config,
        }
    }

    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Write one batch and report what happened to its rows.
    pub async fn load(&self, spec: &TableSpec, batch: Batch) -> LoadOutcome {
        let started = Instant::now();
        let mut outcome = match self.config.strategy {
            Strategy::Bulk => self.load_bulk(spec, &batch).await,
            Strategy::Insert => self.load_insert(spec, &batch).await,
        };
        outcome.elapsed = started.elapsed();
        outcome
    }

    async fn load_bulk(&self, spec: &TableSpec, batch: &Batch) -> LoadOutcome {
        let mut outcome = empty_outcome(batch);
        outcome.attempts = 1;

        match self.sink.copy_rows(spec, &batch.rows).await {
            Ok(written) => {
                outcome.inserted = written;
                outcome.status = BatchStatus::Committed;
            }
            Err(e) => {
                let message = e.short_message(LOG_MESSAGE_CHARS);
                error!(
                    "{}: bulk batch {} failed, {} rows skipped: {}",
                    spec.name,
                    batch.sequence,
                    batch.len(),
                    message
                );
                // The next batch must not reuse a broken connection
                if let Some(epoch) = e.epoch() {
                    self.reconnect(spec, epoch).await;
                }
                outcome.skipped = batch.len() as u64;
                outcome.error = Some(message);
            }
        }
        outcome
    }

    async fn load_insert(&self, spec: &TableSpec, batch: &Batch) -> LoadOutcome {
        let on_conflict = self.config.policy.on_conflict();
        let retry = self.config.retry;
        let mut state = BatchState::Writing { attempt: 1 };

        loop {
            state = match state {
                BatchState::Writing { attempt } => {
                    match self.sink.insert_rows(spec, &batch.rows, on_conflict).await {
                        Ok(inserted) => BatchState::Committed {
                            inserted,
                            attempts: attempt,
                        },
                        Err(e) => match e.class() {
                            ErrorClass::Truncation => {
                                debug!(
                                    "{}: batch {} hit a truncation error, writing rows individually",
                                    spec.name, batch.sequence
                                );
                                BatchState::TruncationFallback { attempts: attempt }
                            }
                            ErrorClass::Transient if retry.allows_retry(attempt) => {
                                BatchState::Retrying {
                                    failed_attempts: attempt,
                                    error: e,
                                }
                            }
                            ErrorClass::Transient | ErrorClass::Rejected => BatchState::Exhausted {
                                attempts: attempt,
                                error: e,
                            },
                        },
                    }
                }
                BatchState::Retrying {
                    failed_attempts,
                    error,
                } => {
                    warn!(
                        "{}: batch {} attempt {}/{} failed, retrying: {}",
                        spec.name,
                        batch.sequence,
                        failed_attempts,
                        retry.max_retries + 1,
                        error.short_message(LOG_MESSAGE_CHARS)
                    );
                    if let Some(epoch) = error.epoch() {
                        self.reconnect(spec, epoch).await;
                    }
                    self.delay.wait(retry.delay_for(failed_attempts)).await;
                    BatchState::Writing {
                        attempt: failed_attempts + 1,
                    }
                }
                BatchState::TruncationFallback { attempts } => {
                    return self.insert_row_by_row(spec, batch, on_conflict, attempts).await;
                }
                BatchState::Committed { inserted, attempts } => {
                    let mut outcome = empty_outcome(batch);
                    outcome.inserted = inserted;
                    outcome.duplicates = (batch.len() as u64).saturating_sub(inserted);
                    outcome.attempts = attempts;
                    outcome.status = BatchStatus::Committed;
                    return outcome;
                }
                BatchState::Exhausted { attempts, error } => {
                    let message = error.short_message(LOG_MESSAGE_CHARS);
                    error!(
                        "{}: batch {} abandoned after {} attempt(s), {} rows skipped: {}",
                        spec.name,
                        batch.sequence,
                        attempts,
                        batch.len(),
                        message
                    );
                    let mut outcome = empty_outcome(batch);
                    outcome.skipped = batch.len() as u64;
                    outcome.attempts = attempts;
                    outcome.error = Some(message);
                    return outcome;
                }
            };
        }
    }

    async fn insert_row_by_row(
        &self,
        spec: &TableSpec,
        batch: &Batch,
        on_conflict: OnConflict,
        attempts: u32,
    ) -> LoadOutcome {
        let mut outcome = empty_outcome(batch);
        outcome.attempts = attempts;

        for (offset, row) in batch.rows.iter().enumerate() {
            match self
                .sink
                .insert_rows(spec, std::slice::from_ref(row), on_conflict)
                .await
            {
                Ok(inserted) => {
                    outcome.inserted += inserted;
                    outcome.duplicates += 1u64.saturating_sub(inserted);
                }
                Err(e) => {
                    let message = e.short_message(LOG_MESSAGE_CHARS);
                    warn!(
                        "{}: batch {} row {} skipped: {}",
                        spec.name, batch.sequence, offset, message
                    );
                    if let Some(epoch) = e.epoch() {
                        self.reconnect(spec, epoch).await;
                    }
                    outcome.skipped += 1;
                    outcome.error.get_or_insert(message);
                }
            }
        }

        outcome.status = if outcome.skipped == 0 {
            BatchStatus::Committed
        } else if outcome.skipped < batch.len() as u64 {
            BatchStatus::PartiallyCommitted
        } else {
            BatchStatus::Failed
        };
        outcome
    }

    async fn reconnect(&self, spec: &TableSpec, epoch: u64) {
        if let Err(e) = self.sink.reconnect(epoch).await {
            warn!(
                "{}: reconnect failed: {}",
                spec.name,
                truncate_message(e.message(), LOG_MESSAGE_CHARS)
            );
        }
    }
}

fn empty_outcome(batch: &Batch) -> LoadOutcome {
    LoadOutcome {
        sequence: batch.sequence,
        rows: batch.len(),
        inserted: 0,
        duplicates: 0,
        skipped: 0,
        attempts: 0,
        elapsed: Duration::ZERO,
        status: BatchStatus::Failed,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemorySink, ScriptedFailure};
    use ingest_core::{ColumnSpec, ColumnType, TypedRow, TypedValue};
    use std::sync::Mutex;

    /// Records requested delays instead of sleeping.
    #[derive(Default)]
    struct RecordingDelay {
        waits: Mutex<Vec<Duration>>,
    }

    #[async_trait::async_trait]
    impl Delay for RecordingDelay {
        async fn wait(&self, duration: Duration) {
            self.waits.lock().unwrap().push(duration);
        }
    }

    fn spec() -> TableSpec {
        TableSpec::new(
            "permits",
            "permits.csv",
            vec![
                ColumnSpec::required(0, "id", ColumnType::Int),
                ColumnSpec::nullable(1, "address", ColumnType::string(10)),
            ],
        )
        .with_primary_key(["id"])
    }

    fn row(id: i32, address: &str) -> TypedRow {
        TypedRow::new(vec![
            TypedValue::Int(id),
            TypedValue::Text(address.to_string()),
        ])
    }

    fn batch(rows: Vec<TypedRow>) -> Batch {
        Batch::new(0, rows)
    }

    fn loader(
        sink: &Arc<MemorySink>,
        config: LoaderConfig,
    ) -> Loader<MemorySink, RecordingDelay> {
        Loader::with_delay(Arc::clone(sink), config, RecordingDelay::default())
    }

    fn insert_config(max_retries: u32) -> LoaderConfig {
        LoaderConfig::new(Strategy::Insert)
            .with_retry(RetryPolicy::new(max_retries, Duration::from_millis(100)))
    }

    #[tokio::test]
    async fn test_insert_commits_batch() {
        let sink = Arc::new(MemorySink::new());
        let loader = loader(&sink, insert_config(2));

        let outcome = loader
            .load(&spec(), batch(vec![row(1, "a"), row(2, "b")]))
            .await;

        assert_eq!(outcome.status, BatchStatus::Committed);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(sink.rows("permits").len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_with_linear_backoff() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next([ScriptedFailure::Transient, ScriptedFailure::Transient]);
        let loader = loader(&sink, insert_config(5));

        let outcome = loader.load(&spec(), batch(vec![row(1, "a")])).await;

        assert_eq!(outcome.status, BatchStatus::Committed);
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sink.reconnects(), 2);
        assert_eq!(
            *loader.delay.waits.lock().unwrap(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_retry_ceiling_skips_batch_once() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next([ScriptedFailure::Transient; 4]);
        let loader = loader(&sink, insert_config(2));

        let outcome = loader
            .load(&spec(), batch(vec![row(1, "a"), row(2, "b")]))
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(sink.insert_calls(), 3);
        assert!(outcome.error.is_some());

        // The fourth scripted failure was never consumed; the next batch sees it
        let next = loader.load(&spec(), Batch::new(1, vec![row(3, "c")])).await;
        assert_eq!(next.status, BatchStatus::Committed);
        assert_eq!(next.attempts, 2);
    }

    #[tokio::test]
    async fn test_rejected_failure_is_not_retried() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next([ScriptedFailure::Rejected]);
        let loader = loader(&sink, insert_config(5));

        let outcome = loader.load(&spec(), batch(vec![row(1, "a")])).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.skipped, 1);
        assert_eq!(sink.insert_calls(), 1);
        assert!(loader.delay.waits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_truncation_falls_back_to_single_rows() {
        let sink = Arc::new(MemorySink::new().with_max_text_chars(3));
        let loader = loader(&sink, insert_config(5));

        let outcome = loader
            .load(
                &spec(),
                batch(vec![row(1, "ok"), row(2, "too long"), row(3, "abc")]),
            )
            .await;

        assert_eq!(outcome.status, BatchStatus::PartiallyCommitted);
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.skipped, 1);
        // One grouped attempt, then one call per row
        assert_eq!(sink.insert_calls(), 4);
        let ids: Vec<_> = sink
            .rows("permits")
            .iter()
            .map(|r| r.get(0).and_then(TypedValue::as_i32))
            .collect();
        assert_eq!(ids, vec![Some(1), Some(3)]);
    }

    #[tokio::test]
    async fn test_idempotent_reload_counts_duplicates() {
        let sink = Arc::new(MemorySink::new());
        let loader = loader(&sink, insert_config(0));
        let rows = vec![row(1, "a"), row(2, "b")];

        let first = loader.load(&spec(), batch(rows.clone())).await;
        let second = loader.load(&spec(), batch(rows)).await;

        assert_eq!(first.inserted, 2);
        assert_eq!(second.status, BatchStatus::Committed);
        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 2);
        assert_eq!(sink.rows("permits").len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_failure_skips_whole_batch() {
        let sink = Arc::new(MemorySink::new().with_max_text_chars(3));
        let loader = loader(&sink, LoaderConfig::new(Strategy::Bulk));

        let outcome = loader
            .load(&spec(), batch(vec![row(1, "ok"), row(2, "too long")]))
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(sink.copy_calls(), 1);
        assert!(sink.rows("permits").is_empty());
    }

    #[tokio::test]
    async fn test_bulk_transient_failure_reconnects_without_retry() {
        let sink = Arc::new(MemorySink::new());
        sink.fail_next([ScriptedFailure::Transient]);
        let loader = loader(&sink, LoaderConfig::new(Strategy::Bulk));

        let outcome = loader.load(&spec(), batch(vec![row(1, "a")])).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(sink.copy_calls(), 1);
        assert_eq!(sink.reconnects(), 1);
    }

    #[test]
    fn test_strategy_defaults() {
        assert_eq!(Strategy::Insert.default_batch_size(), 500);
        assert_eq!(Strategy::Insert.default_concurrency(), 4);
        assert_eq!(Strategy::Insert.default_policy(), LoadPolicy::IdempotentReload);
        assert_eq!(Strategy::Bulk.default_batch_size(), 50_000);
        assert_eq!(Strategy::Bulk.default_concurrency(), 1);
        assert_eq!(Strategy::Bulk.default_policy(), LoadPolicy::Truncate);
    }

    #[test]
    fn test_parse_strategy_and_policy() {
        assert_eq!("bulk".parse::<Strategy>().unwrap(), Strategy::Bulk);
        assert_eq!("INSERT".parse::<Strategy>().unwrap(), Strategy::Insert);
        assert!("upsert".parse::<Strategy>().is_err());
        assert_eq!(
            "idempotent".parse::<LoadPolicy>().unwrap(),
            LoadPolicy::IdempotentReload
        );
        assert_eq!("truncate".parse::<LoadPolicy>().unwrap(), LoadPolicy::Truncate);
    }
}
