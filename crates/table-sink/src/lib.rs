//! Table sink trait and batch loader for the phl-ingest pipeline.
//!
//! - [`TableSink`] abstracts the relational store (PostgreSQL in production,
//!   [`memory::MemorySink`] in tests).
//! - [`Loader`] writes one batch at a time with the bulk or grouped-insert
//!   strategy, retrying transient failures and falling back to per-row writes
//!   on truncation errors.

pub mod error;
pub mod loader;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod retry;
pub mod traits;

pub use error::{ErrorClass, SinkError};
pub use loader::{BatchStatus, LoadOutcome, LoadPolicy, Loader, LoaderConfig, Strategy};
pub use retry::{Delay, RetryPolicy, TokioDelay};
pub use traits::{OnConflict, TableSink};
