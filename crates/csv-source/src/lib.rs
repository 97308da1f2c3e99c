//! CSV ingestion for phl-ingest
//!
//! This crate turns the upstream CSV exports into typed batches and drives
//! them into a [`table_sink::TableSink`]:
//!
//! ```text
//! lines ──► RecordAssembler ──► map_row ──► BatchAccumulator ──► Loader (× concurrency)
//! ```

pub mod batch;
pub mod lines;
pub mod mapper;
mod metrics;
pub mod scan;
mod sync;
pub mod tokenizer;

pub use batch::BatchAccumulator;
pub use mapper::{map_row, Mapped};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use scan::{scan_file, ScanReport};
pub use sync::{sync, sync_with_delay, Config, RunReport, TableReport, TableStatus};
pub use tokenizer::{tokenize, tokenize_final, RecordAssembler, TokenizeError, Tokenized};
