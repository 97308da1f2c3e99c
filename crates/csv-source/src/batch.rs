//! Batch accumulation.

use ingest_core::{Batch, TypedRow};

/// Collects typed rows into batches of a fixed size.
#[derive(Debug)]
pub struct BatchAccumulator {
    batch_size: usize,
    rows: Vec<TypedRow>,
    next_sequence: u64,
}

impl BatchAccumulator {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            batch_size,
            rows: Vec::with_capacity(batch_size),
            next_sequence: 0,
        }
    }

    /// Add a row, returning a full batch when the size is reached.
    pub fn push(&mut self, row: TypedRow) -> Option<Batch> {
        self.rows.push(row);
        if self.rows.len() >= self.batch_size {
            self.take()
        } else {
            None
        }
    }

    /// Hand out whatever is buffered, if anything.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.rows.is_empty() {
            None
        } else {
            self.take()
        }
    }

    pub fn pending(&self) -> usize {
        self.rows.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn take(&mut self) -> Option<Batch> {
        let rows = std::mem::replace(&mut self.rows, Vec::with_capacity(self.batch_size));
        let batch = Batch::new(self.next_sequence, rows);
        self.next_sequence += 1;
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ingest_core::TypedValue;

    fn row(i: i32) -> TypedRow {
        TypedRow::new(vec![TypedValue::Int(i)])
    }

    #[test]
    fn test_emits_full_batches_in_order() {
        let mut acc = BatchAccumulator::new(2);
        assert!(acc.push(row(1)).is_none());
        let first = acc.push(row(2)).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.rows, vec![row(1), row(2)]);

        assert!(acc.push(row(3)).is_none());
        assert_eq!(acc.pending(), 1);
        let last = acc.flush().unwrap();
        assert_eq!(last.sequence, 1);
        assert_eq!(last.rows, vec![row(3)]);
        assert!(acc.flush().is_none());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut acc = BatchAccumulator::new(0);
        assert_eq!(acc.batch_size(), 1);
        assert!(acc.push(row(1)).is_some());
    }
}
