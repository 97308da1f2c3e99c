//! In-memory [`TableSink`] for pipeline tests.
//!
//! Rows are deduplicated on the table's primary key, over-long text values
//! raise truncation errors, and failures can be scripted ahead of time.

use crate::error::SinkError;
use crate::traits::{OnConflict, TableSink};
use ingest_core::{TableSpec, TypedRow, TypedValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

/// A failure returned by the next write call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Transient,
    Truncation,
    Rejected,
}

#[derive(Debug, Default)]
struct MemoryTable {
    rows: Vec<TypedRow>,
    keys: HashSet<Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, MemoryTable>,
    failures: VecDeque<ScriptedFailure>,
}

/// Table store held in process memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    state: Mutex<MemoryState>,
    epoch: AtomicU64,
    max_text_chars: Option<usize>,
    insert_calls: AtomicUsize,
    copy_calls: AtomicUsize,
    reconnects: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any text value longer than `max_chars` with a truncation error.
    pub fn with_max_text_chars(mut self, max_chars: usize) -> Self {
        self.max_text_chars = Some(max_chars);
        self
    }

    /// Queue failures returned by the next write calls, in order.
    pub fn fail_next<I: IntoIterator<Item = ScriptedFailure>>(&self, failures: I) {
        self.lock().failures.extend(failures);
    }

    /// Rows currently stored for a table.
    pub fn rows(&self, table: &str) -> Vec<TypedRow> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A panicking test thread must not hide the stored rows from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn scripted_error(&self, failure: ScriptedFailure) -> SinkError {
        match failure {
            ScriptedFailure::Transient => SinkError::Transient {
                message: "connection reset by peer".to_string(),
                epoch: self.epoch(),
            },
            ScriptedFailure::Truncation => SinkError::Truncation {
                message: "value too long for type character varying".to_string(),
            },
            ScriptedFailure::Rejected => SinkError::Rejected {
                message: "statement rejected".to_string(),
            },
        }
    }

    fn check_text_lengths(&self, rows: &[TypedRow]) -> Result<(), SinkError> {
        let Some(max) = self.max_text_chars else {
            return Ok(());
        };
        let too_long = rows.iter().flat_map(|r| r.values()).any(|v| match v {
            TypedValue::Text(s) => s.chars().count() > max,
            _ => false,
        });
        if too_long {
            return Err(SinkError::Truncation {
                message: format!("value too long for type character varying({max})"),
            });
        }
        Ok(())
    }

    /// Write rows atomically; returns how many were new.
    fn write(
        &self,
        spec: &TableSpec,
        rows: &[TypedRow],
        on_conflict: OnConflict,
    ) -> Result<u64, SinkError> {
        let mut state = self.lock();
        if let Some(failure) = state.failures.pop_front() {
            return Err(self.scripted_error(failure));
        }
        self.check_text_lengths(rows)?;

        let pk = spec.primary_key_indexes();
        let table = state.tables.entry(spec.name.clone()).or_default();
        let mut staged_keys = HashSet::new();
        let mut staged = Vec::new();

        for row in rows {
            if !pk.is_empty() {
                let key: Vec<String> = pk
                    .iter()
                    .map(|&i| row.get(i).map(|v| v.to_string()).unwrap_or_default())
                    .collect();
                if table.keys.contains(&key) || staged_keys.contains(&key) {
                    match on_conflict {
                        OnConflict::Ignore => continue,
                        OnConflict::Error => {
                            return Err(SinkError::Rejected {
                                message: format!(
                                    "duplicate key value violates unique constraint \"{}_pkey\"",
                                    spec.name
                                ),
                            })
                        }
                    }
                }
                staged_keys.insert(key);
            }
            staged.push(row.clone());
        }

        let written = staged.len() as u64;
        table.keys.extend(staged_keys);
        table.rows.extend(staged);
        Ok(written)
    }
}

#[async_trait::async_trait]
impl TableSink for MemorySink {
    async fn insert_rows(
        &self,
        spec: &TableSpec,
        rows: &[TypedRow],
        on_conflict: OnConflict,
    ) -> Result<u64, SinkError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        self.write(spec, rows, on_conflict)
    }

    async fn copy_rows(&self, spec: &TableSpec, rows: &[TypedRow]) -> Result<u64, SinkError> {
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        self.write(spec, rows, OnConflict::Error)
    }

    async fn reconnect(&self, stale_epoch: u64) -> Result<(), SinkError> {
        if self
            .epoch
            .compare_exchange(stale_epoch, stale_epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn truncate(&self, spec: &TableSpec) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.tables.insert(spec.name.clone(), MemoryTable::default());
        Ok(())
    }

    async fn row_count(&self, table: &str) -> Result<u64, SinkError> {
        Ok(self
            .lock()
            .tables
            .get(table)
            .map(|t| t.rows.len() as u64)
            .unwrap_or(0))
    }

    async fn create_table(&self, spec: &TableSpec) -> Result<(), SinkError> {
        self.lock().tables.entry(spec.name.clone()).or_default();
        Ok(())
    }
}
