//! Write failure taxonomy shared by every sink implementation.

use thiserror::Error;

/// How a failed write should be handled by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// A value exceeds a column's capacity; retry the batch row by row
    Truncation,
    /// Connection reset, timeout or throttling; reconnect and retry
    Transient,
    /// Anything else; give up on the batch without retrying
    Rejected,
}

/// Errors returned by a [`crate::TableSink`].
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    /// A value exceeds a column's storage capacity.
    #[error("value exceeds column capacity: {message}")]
    Truncation { message: String },

    /// Transient failure on the connection generation `epoch`.
    #[error("transient write failure: {message}")]
    Transient { message: String, epoch: u64 },

    /// The store rejected the write for a reason retrying will not fix.
    #[error("write rejected: {message}")]
    Rejected { message: String },

    /// The store could not be reached.
    #[error("connection failed: {message}")]
    Connect { message: String },
}

impl SinkError {
    /// Classify this error for the loader's state machine.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Truncation { .. } => ErrorClass::Truncation,
            Self::Transient { .. } | Self::Connect { .. } => ErrorClass::Transient,
            Self::Rejected { .. } => ErrorClass::Rejected,
        }
    }

    /// Connection generation the failure was observed on, if any.
    pub fn epoch(&self) -> Option<u64> {
        match self {
            Self::Transient { epoch, .. } => Some(*epoch),
            _ => None,
        }
    }

    /// The underlying message.
    pub fn message(&self) -> &str {
        match self {
            Self::Truncation { message }
            | Self::Transient { message, .. }
            | Self::Rejected { message }
            | Self::Connect { message } => message,
        }
    }

    /// The message cut to at most `max_chars` characters, for log lines.
    pub fn short_message(&self, max_chars: usize) -> String {
        truncate_message(self.message(), max_chars)
    }
}

/// Cut a message to at most `max_chars` characters.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((idx, _)) => message[..idx].to_string(),
        None => message.to_string(),
    }
}
