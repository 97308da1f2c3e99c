//! TableSink trait definition.
//!
//! This trait abstracts over the target relational store so the loader and
//! pipeline driver can be compiled against a single interface.

use crate::error::SinkError;
use ingest_core::{TableSpec, TypedRow};

/// What the store should do when an inserted row collides with an existing
/// primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail the statement
    Error,
    /// Silently skip the colliding row
    Ignore,
}

/// Trait for writing typed rows to a relational store.
///
/// # Usage Pattern
///
/// The loader is generic over the sink for static dispatch:
///
/// ```ignore
/// pub async fn run<S: TableSink + 'static>(sink: Arc<S>, spec: &TableSpec) -> Result<()> {
///     let inserted = sink.insert_rows(spec, &rows, OnConflict::Ignore).await?;
/// }
/// ```
///
/// Implementations own their connection resources. A reconnect replaces
/// them for every writer; writers that observed a failure on an older
/// connection generation pass that generation so only one reconnect happens
/// per failure event.
#[async_trait::async_trait]
pub trait TableSink: Send + Sync {
    /// Write rows with one grouped INSERT statement.
    ///
    /// Returns the number of rows actually inserted, which is lower than
    /// `rows.len()` when colliding rows are ignored.
    async fn insert_rows(
        &self,
        spec: &TableSpec,
        rows: &[TypedRow],
        on_conflict: OnConflict,
    ) -> Result<u64, SinkError>;

    /// Stream rows through the store's bulk-copy protocol.
    ///
    /// A single bad value fails the whole transfer.
    async fn copy_rows(&self, spec: &TableSpec, rows: &[TypedRow]) -> Result<u64, SinkError>;

    /// Replace the connection resources if they are still at `stale_epoch`.
    async fn reconnect(&self, stale_epoch: u64) -> Result<(), SinkError>;

    /// Remove every row of the table.
    async fn truncate(&self, spec: &TableSpec) -> Result<(), SinkError>;

    /// Current number of rows in a table.
    async fn row_count(&self, table: &str) -> Result<u64, SinkError>;

    /// Create the table if it does not exist yet.
    async fn create_table(&self, spec: &TableSpec) -> Result<(), SinkError>;

    /// Upper bound on rows per INSERT statement for this table, if the store
    /// imposes one.
    fn max_insert_rows(&self, _spec: &TableSpec) -> Option<usize> {
        None
    }
}
