//! Classification of PostgreSQL failures into sink error classes.

use table_sink::{ErrorClass, SinkError};

/// Classify a SQLSTATE code.
///
/// Data exceptions (class 22) are truncation-class; connection, resource,
/// serialization and shutdown conditions are transient; everything else is
/// rejected.
pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code {
        c if c.starts_with("22") => ErrorClass::Truncation,
        c if c.starts_with("08") || c.starts_with("53") => ErrorClass::Transient,
        "40001" | "40P01" | "57P01" | "57P02" | "57P03" | "57014" => ErrorClass::Transient,
        _ => ErrorClass::Rejected,
    }
}

/// Convert a driver error observed on connection generation `epoch`.
pub fn classify(err: &tokio_postgres::Error, epoch: u64) -> SinkError {
    let message = match err.as_db_error() {
        Some(db) => format!("{} ({})", db.message(), db.code().code()),
        None => err.to_string(),
    };

    let class = match err.code() {
        Some(state) => classify_sqlstate(state.code()),
        None if err.is_closed() || is_io_error(err) => ErrorClass::Transient,
        None => ErrorClass::Rejected,
    };

    into_sink_error(class, message, epoch)
}

/// The write did not finish within the configured timeout.
pub fn timed_out(timeout: std::time::Duration, epoch: u64) -> SinkError {
    SinkError::Transient {
        message: format!("write timed out after {}s", timeout.as_secs_f64()),
        epoch,
    }
}

fn is_io_error(err: &tokio_postgres::Error) -> bool {
    use std::error::Error as _;
    err.source()
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false)
}

fn into_sink_error(class: ErrorClass, message: String, epoch: u64) -> SinkError {
    match class {
        ErrorClass::Truncation => SinkError::Truncation { message },
        ErrorClass::Transient => SinkError::Transient { message, epoch },
        ErrorClass::Rejected => SinkError::Rejected { message },
    }
}
