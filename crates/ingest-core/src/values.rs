//! Typed values produced by the row mapper.
//!
//! The loader and accumulator only ever see these values; raw source strings
//! never travel past the row mapper.

use std::fmt;
use uuid::Uuid;

/// A single typed column value.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// 32-bit signed integer
    Int(i32),

    /// 64-bit floating point
    Float(f64),

    /// String value, already truncated to the column's capacity
    Text(String),

    /// UUID value
    Uuid(Uuid),

    /// Null value
    Null,
}

impl TypedValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to get this value as an i32.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Null => f.write_str("NULL"),
        }
    }
}

/// A positional row of typed values, one per column of its table spec.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedRow {
    values: Vec<TypedValue>,
}

impl TypedRow {
    /// Create a row from values in column order.
    pub fn new(values: Vec<TypedValue>) -> Self {
        Self { values }
    }

    /// Values in column order.
    pub fn values(&self) -> &[TypedValue] {
        &self.values
    }

    /// Value at a column index.
    pub fn get(&self, index: usize) -> Option<&TypedValue> {
        self.values.get(index)
    }

    /// Number of values in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<TypedValue>> for TypedRow {
    fn from(values: Vec<TypedValue>) -> Self {
        Self::new(values)
    }
}

/// Bounded group of typed rows destined for one table.
///
/// A batch is created by the accumulator and consumed exactly once by a
/// loader invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Position of this batch in the source stream, starting at 0
    pub sequence: u64,

    /// Rows in source order
    pub rows: Vec<TypedRow>,
}

impl Batch {
    /// Create a new batch.
    pub fn new(sequence: u64, rows: Vec<TypedRow>) -> Self {
        Self { sequence, rows }
    }

    /// Number of rows in the batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the batch holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        assert_eq!(TypedValue::Int(7).as_i32(), Some(7));
        assert_eq!(TypedValue::Float(1.5).as_f64(), Some(1.5));
        assert_eq!(TypedValue::Text("a".into()).as_str(), Some("a"));
        assert!(TypedValue::Null.is_null());
        assert_eq!(TypedValue::Int(7).as_str(), None);
    }

    #[test]
    fn test_row_access() {
        let row = TypedRow::new(vec![TypedValue::Int(1), TypedValue::Null]);
        assert_eq!(row.len(), 2);
        assert_eq!(row.get(0), Some(&TypedValue::Int(1)));
        assert_eq!(row.get(2), None);
    }
}
