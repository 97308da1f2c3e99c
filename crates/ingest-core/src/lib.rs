//! Core types for the phl-ingest pipeline.
//!
//! This crate provides the static configuration and value types shared by
//! every stage of the pipeline:
//!
//! - [`ColumnType`] - Closed set of target column types
//! - [`ColumnSpec`] / [`TableSpec`] - Source-position to typed-column mapping
//! - [`TableRegistry`] - Ordered, validated table specs loaded from YAML
//! - [`TypedValue`] / [`TypedRow`] - Values produced by the row mapper
//!
//! # Architecture
//!
//! ```text
//! ingest-core (this crate)
//!    │
//!    ├─── csv-source        (tokenizer, row mapper, accumulator, driver)
//!    ├─── table-sink        (sink trait, loader strategies, retry)
//!    └─── postgresql-sink   (PostgreSQL implementation of the sink)
//! ```
//!
//! # Example
//!
//! ```rust
//! use ingest_core::{ColumnSpec, ColumnType, TableSpec};
//!
//! let spec = TableSpec::new(
//!     "master_entity",
//!     "dbo.masterentity.csv",
//!     vec![
//!         ColumnSpec::required(0, "master_entity_id", ColumnType::Uuid),
//!         ColumnSpec::nullable(1, "name_text", ColumnType::string(400)),
//!     ],
//! )
//! .with_primary_key(["master_entity_id"]);
//!
//! assert!(spec.validate().is_ok());
//! ```

pub mod registry;
pub mod schema;
pub mod types;
pub mod values;

// Re-exports for convenience
pub use schema::{ColumnSpec, SchemaError, TableRegistry, TableSpec};
pub use types::{ColumnType, ToDdl};
pub use values::{Batch, TypedRow, TypedValue};
