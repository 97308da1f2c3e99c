//! PostgreSQL sink for the phl-ingest pipeline.
//!
//! ```text
//! PostgresSink ──► PgPool (N clients, epoch) ──► tokio-postgres
//!     │
//!     ├── insert_rows: INSERT ... VALUES (...), (...) [ON CONFLICT DO NOTHING]
//!     └── copy_rows:   COPY ... FROM STDIN (FORMAT binary)
//! ```

pub mod error;
pub mod pool;
pub mod sink;
pub mod sql;
pub mod value;

pub use pool::{connect_with_retries, PgPool, PgPoolConfig};
pub use sink::{PostgresSink, DEFAULT_WRITE_TIMEOUT};
pub use sql::PostgresDdl;
